//! Request/response signing protocol.
//!
//! # Canonical form (v1)
//!
//! ```text
//! gantry-sign/v1\n
//! <field>=<canonical json>\n      (one line per field, fields in ascending name order)
//! ```
//!
//! The `sign` field is always excluded. Canonical JSON is the compact
//! `serde_json` rendering with the keys of every object sorted recursively.
//! The digest is a BLAKE3 keyed hash under a 32-byte key derived from the
//! shared secret, rendered as lower-case hex.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::{Map, Value};
use subtle::ConstantTimeEq;

use crate::envelope::{Envelope, Response};
use crate::error::{DispatchError, DispatchResult};

/// Header line that opens every canonical payload.
pub const CANONICAL_VERSION: &str = "gantry-sign/v1";

const KEY_CONTEXT: &str = "gantry envelope signing v1";

/// Digest algorithms a client may name in `sign_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignType {
    Blake3,
}

impl SignType {
    /// Parses a `sign_type` value. An empty value selects the default.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` for unsupported algorithms.
    pub fn parse(value: &str) -> DispatchResult<Self> {
        if value.is_empty() || value.eq_ignore_ascii_case("blake3") {
            Ok(Self::Blake3)
        } else {
            Err(DispatchError::InvalidSignature(format!(
                "unsupported sign type {value:?}"
            )))
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
        }
    }
}

/// A value that can be signed: it exposes every field except the signature.
pub trait Signable {
    /// All fields covered by the signature, keyed by wire name.
    fn canonical_fields(&self) -> BTreeMap<&'static str, Value>;

    /// Algorithm requested by the sender, if the payload names one.
    fn sign_type(&self) -> &str {
        ""
    }
}

impl Signable for Envelope {
    fn canonical_fields(&self) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([
            ("data", self.data.clone()),
            ("method", Value::String(self.method.clone())),
            ("sign_type", Value::String(self.sign_type.clone())),
            ("timestamp", Value::String(self.timestamp.clone())),
            ("version", Value::String(self.version.clone())),
        ])
    }

    fn sign_type(&self) -> &str {
        &self.sign_type
    }
}

impl Signable for Response {
    fn canonical_fields(&self) -> BTreeMap<&'static str, Value> {
        let mut fields = BTreeMap::from([
            ("code", Value::from(self.code)),
            ("content", self.content.clone()),
            ("message", Value::String(self.message.clone())),
            ("timestamp", Value::from(self.timestamp)),
            ("trace_id", Value::String(self.trace_id.clone())),
        ]);
        if let Some(pagination) = &self.pagination {
            fields.insert(
                "pagination",
                serde_json::to_value(pagination).unwrap_or(Value::Null),
            );
        }
        fields
    }
}

/// Renders the canonical byte form of `payload`.
#[must_use]
pub fn canonical_bytes(payload: &impl Signable) -> Vec<u8> {
    let mut out = String::with_capacity(256);
    out.push_str(CANONICAL_VERSION);
    out.push('\n');
    for (name, value) in payload.canonical_fields() {
        out.push_str(name);
        out.push('=');
        out.push_str(&canonical_json(&value).to_string());
        out.push('\n');
    }
    out.into_bytes()
}

/// Rebuilds `value` with every object's keys in ascending order.
fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonical_json(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

/// 32-byte MAC key derived from a shared secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey([u8; 32]);

impl SigningKey {
    /// Derives a key from a configured secret string.
    #[must_use]
    pub fn derive(secret: &str) -> Self {
        Self(blake3::derive_key(KEY_CONTEXT, secret.as_bytes()))
    }

    /// Keyed digest of raw bytes, hex encoded.
    #[must_use]
    pub fn digest(&self, bytes: &[u8]) -> String {
        hex::encode(blake3::keyed_hash(&self.0, bytes).as_bytes())
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

/// Shared secrets: one gateway key plus one key per registered client.
#[derive(Debug, Clone)]
pub struct KeyRing {
    global: SigningKey,
    clients: HashMap<String, SigningKey>,
}

impl KeyRing {
    #[must_use]
    pub fn new(global_secret: &str) -> Self {
        Self {
            global: SigningKey::derive(global_secret),
            clients: HashMap::new(),
        }
    }

    /// Registers (or replaces) the secret for `client_id`.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<String>, secret: &str) -> Self {
        self.clients
            .insert(client_id.into(), SigningKey::derive(secret));
        self
    }

    #[must_use]
    pub fn client(&self, client_id: &str) -> Option<&SigningKey> {
        self.clients.get(client_id)
    }

    #[must_use]
    pub fn global(&self) -> &SigningKey {
        &self.global
    }

    /// Number of registered clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

/// Computes and verifies payload signatures against a [`KeyRing`].
#[derive(Debug, Clone)]
pub struct Signer {
    keys: KeyRing,
}

impl Signer {
    #[must_use]
    pub fn new(keys: KeyRing) -> Self {
        Self { keys }
    }

    /// Signs `payload` with `key`.
    #[must_use]
    pub fn sign(key: &SigningKey, payload: &impl Signable) -> String {
        key.digest(&canonical_bytes(payload))
    }

    /// Verifies `supplied` against `payload` using the key of `client_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` when the client is unknown, the sign type is
    /// unsupported, the digest is malformed, or the digest does not match.
    pub fn verify(
        &self,
        client_id: &str,
        supplied: &str,
        payload: &impl Signable,
    ) -> DispatchResult<()> {
        SignType::parse(payload.sign_type())?;
        let key = self.keys.client(client_id).ok_or_else(|| {
            DispatchError::InvalidSignature(format!("unknown client id {client_id:?}"))
        })?;
        let supplied = hex::decode(supplied.trim()).map_err(|_| {
            DispatchError::InvalidSignature("signature is not valid hex".to_string())
        })?;
        let expected = blake3::keyed_hash(&key.0, &canonical_bytes(payload));
        if bool::from(expected.as_bytes().as_slice().ct_eq(supplied.as_slice())) {
            Ok(())
        } else {
            tracing::debug!(client_id, "signature mismatch");
            Err(DispatchError::InvalidSignature(
                "signature does not match payload".to_string(),
            ))
        }
    }

    /// Signs a fully populated response in place.
    ///
    /// Uses the caller's key when `client_id` is registered, otherwise the
    /// gateway key, so failure responses to unknown clients are still signed.
    pub fn seal(&self, client_id: Option<&str>, response: &mut Response) {
        let key = client_id
            .and_then(|id| self.keys.client(id))
            .unwrap_or(self.keys.global());
        response.sign = Self::sign(key, response);
    }

    #[must_use]
    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }
}

impl Envelope {
    /// Client-side helper: stamps `sign_type` and signs the envelope with `key`.
    #[must_use]
    pub fn signed(mut self, key: &SigningKey) -> Self {
        self.sign_type = SignType::Blake3.as_str().to_string();
        self.sign = Signer::sign(key, &self);
        self
    }
}
