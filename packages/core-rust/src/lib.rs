//! Gantry Core: RPC envelope, error codes, operation shapes, and the signing protocol.

pub mod args;
pub mod envelope;
pub mod error;
pub mod schema;
pub mod sign;

pub use args::{Args, Connection, Headers, Identity, Pagination, Reply};
pub use envelope::{Envelope, MethodPath, Response};
pub use error::{DispatchError, DispatchResult, ErrorKind};
pub use schema::{FieldDef, FieldType, Shape, ValidationResult};
pub use sign::{canonical_bytes, KeyRing, SignType, Signable, Signer, SigningKey};
