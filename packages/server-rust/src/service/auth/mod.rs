//! Caller authorization: the gate and its token handlers.

pub mod gate;
pub mod token;

pub use gate::{AuthorizationGate, DefaultPolicy};
pub use token::{JwtTokenHandler, SessionTokenHandler, TokenError, TokenHandler};

/// Extracts the bearer token from an `Authorization` header value.
///
/// The `Bearer ` scheme prefix is optional and matched case-insensitively.
#[must_use]
pub fn bearer_token(header: &str) -> &str {
    let header = header.trim();
    match header.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => header[7..].trim_start(),
        _ => header,
    }
}

#[cfg(test)]
mod tests {
    use super::bearer_token;

    #[test]
    fn strips_optional_bearer_prefix() {
        assert_eq!(bearer_token("Bearer abc"), "abc");
        assert_eq!(bearer_token("bearer   abc"), "abc");
        assert_eq!(bearer_token("abc"), "abc");
        assert_eq!(bearer_token(""), "");
        assert_eq!(bearer_token("Bearer"), "Bearer");
    }
}
