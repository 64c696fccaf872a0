//! Backend modules shipped with the gateway binary.

pub mod account;

use crate::service::Factory;

/// Factories the binary registers, keyed by backend name.
#[must_use]
pub fn builtin() -> Vec<(&'static str, Factory)> {
    vec![("account", account::factory())]
}
