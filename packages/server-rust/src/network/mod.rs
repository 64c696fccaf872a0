//! HTTP transport: configuration, middleware, handlers, call accounting, and shutdown control.

pub mod config;
pub mod counter;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::*;
pub use counter::{CallGuard, ConnectionCounter, CounterSnapshot};
pub use handlers::AppState;
pub use module::{build_router, NetworkModule};
pub use shutdown::*;
