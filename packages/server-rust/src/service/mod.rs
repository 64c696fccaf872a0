//! Call dispatch framework.
//!
//! This module implements the path a call takes once the transport has
//! verified and decoded it:
//!
//! 1. **Middleware** (`middleware`): Tower layers (accounting, panic recovery, metrics)
//! 2. **Dispatcher** (`dispatcher`): validation, trace check, backend lookup, authorization
//! 3. **Authorization** (`auth`): default policy, anonymous methods, token handlers
//! 4. **Backend modules** (`backend`, `framework`): endpoint/operation trees
//! 5. **Registry** (`registry`): name → module, built at startup

pub mod auth;
pub mod backend;
pub mod dispatcher;
pub mod framework;
pub mod middleware;
pub mod registry;

// Re-export key types for convenient access.
pub use auth::{AuthorizationGate, DefaultPolicy, TokenHandler};
pub use backend::{BackendContext, BackendModule, DocumentsReply, Factory};
pub use dispatcher::{Call, Dispatcher};
pub use framework::{Backend, Endpoint, Invocation, Operation};
pub use middleware::{build_dispatch_pipeline, DispatchPipeline};
pub use registry::BackendRegistry;
