//! `account`: user login, profile, and logout.
//!
//! Users come from the backend's settings table:
//!
//! ```toml
//! [backends.account.users]
//! alice = "wonderland"
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use gantry_core::{DispatchError, DispatchResult, FieldType, Identity, Reply, Shape};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::service::auth::bearer_token;
use crate::service::{Backend, BackendContext, BackendModule, Endpoint, Factory, Invocation, Operation};

/// Unknown user or wrong password.
pub const INVALID_CREDENTIALS: i32 = 4100;
/// `home` called without an identity.
pub const LOGIN_REQUIRED: i32 = 4101;

type Users = Arc<BTreeMap<String, String>>;

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

/// Factory registered under `account` by default.
#[must_use]
pub fn factory() -> Factory {
    Arc::new(|name: &str, ctx: &BackendContext| -> anyhow::Result<Arc<dyn BackendModule>> {
        Ok(Arc::new(backend(name, ctx)))
    })
}

/// Builds the module for `ctx`.
#[must_use]
pub fn backend(name: &str, ctx: &BackendContext) -> Backend {
    let users: Users = Arc::new(ctx.setting("users").unwrap_or_default());
    let user_count = users.len();

    let login = {
        let users = Arc::clone(&users);
        Operation::new("login", "Sign in with a username and password")
            .input(
                Shape::named("User")
                    .required("username", FieldType::String)
                    .required("password", FieldType::String),
            )
            .output(
                Shape::named("LoginReply")
                    .required("token", FieldType::String)
                    .required("token_type", FieldType::String),
            )
            .handler(move |call| {
                let users = Arc::clone(&users);
                async move { login(&users, call).await }
            })
    };

    Backend::new(name, "User accounts", ctx)
        .endpoint(
            Endpoint::new("user", "User management")
                .operation(login)
                .operation(
                    Operation::new("home", "Profile of the signed-in user")
                        .output(Shape::named("Profile").required("subject", FieldType::String))
                        .handler(home),
                )
                .operation(Operation::new("logout", "Sign out").handler(logout)),
        )
        .on_initialize(move |ctx| async move {
            info!(app = %ctx.app_name, users = user_count, "account backend ready");
            Ok(())
        })
        .before_request(|args| {
            debug!(operation = %args.operation, trace_id = %args.trace_id, "account call");
        })
        .on_cleanup(|_| async {
            info!("account backend stopped");
            Ok(())
        })
}

async fn login(users: &BTreeMap<String, String>, call: Invocation) -> DispatchResult<Reply> {
    let credentials: Credentials = call
        .args
        .decode()
        .map_err(|e| DispatchError::ValidationFailed(e.to_string()))?;

    let accepted = users.get(&credentials.username).is_some_and(|expected| {
        bool::from(expected.as_bytes().ct_eq(credentials.password.as_bytes()))
    });
    if !accepted {
        return Err(DispatchError::domain(
            INVALID_CREDENTIALS,
            "invalid username or password",
        ));
    }

    let tokens = call.context.tokens.as_ref().ok_or_else(|| {
        DispatchError::Internal(anyhow::anyhow!("no token handler configured"))
    })?;
    let login_at = unix_now();
    let identity = Identity::new(&credentials.username).with_claim("login_at", json!(login_at));
    let token = tokens.issue(&identity).await?;

    call.context
        .store
        .set(
            &last_login_key(&credentials.username),
            login_at.to_string(),
            None,
        )
        .await?;

    Ok(Reply::ok(json!({
        "token": token,
        "token_type": tokens.kind(),
    })))
}

async fn home(call: Invocation) -> DispatchResult<Reply> {
    let Some(identity) = &call.args.authorized else {
        return Err(DispatchError::domain(LOGIN_REQUIRED, "login required"));
    };
    let last_login = call
        .context
        .store
        .get(&last_login_key(&identity.subject))
        .await?
        .and_then(|value| value.parse::<u64>().ok());

    Ok(Reply::ok(json!({
        "subject": identity.subject,
        "claims": identity.claims,
        "last_login": last_login,
    })))
}

async fn logout(call: Invocation) -> DispatchResult<Reply> {
    let token = call.args.header("authorization").map_or("", bearer_token);
    let revoked = match &call.context.tokens {
        Some(tokens) if !token.is_empty() => tokens.revoke(token).await?,
        _ => false,
    };
    Ok(Reply::ok(json!({ "revoked": revoked })))
}

fn last_login_key(username: &str) -> String {
    format!("last_login:{username}")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gantry_core::{Args, ErrorKind, MethodPath};
    use serde_json::Value;

    use super::*;
    use crate::service::auth::{JwtTokenHandler, SessionTokenHandler};
    use crate::service::TokenHandler;
    use crate::store::{KeyValueStore, MemoryStore};

    fn context(tokens: TokenHandler) -> BackendContext {
        let mut settings = serde_json::Map::new();
        settings.insert("users".to_string(), json!({"alice": "wonderland"}));
        BackendContext::new("gantry", Arc::new(MemoryStore::new()))
            .with_tokens(Some(tokens))
            .with_settings(settings)
            .scoped("account")
    }

    fn jwt() -> TokenHandler {
        TokenHandler::Jwt(JwtTokenHandler::new("secret", "gantry", Duration::from_secs(60)))
    }

    fn args(operation: &str, data: Value) -> Args {
        let path = MethodPath::parse(&format!("account.user.{operation}")).unwrap();
        Args::new(path, data).with_trace_id("t")
    }

    async fn module(tokens: TokenHandler) -> Backend {
        let backend = backend("account", &context(tokens));
        backend.initialize().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn login_issues_a_verifiable_token() {
        let tokens = jwt();
        let backend = module(tokens.clone()).await;

        let reply = backend
            .handle_request(args(
                "login",
                json!({"username": "alice", "password": "wonderland"}),
            ))
            .await
            .unwrap();

        assert_eq!(reply.data["token_type"], "jwt");
        let identity = tokens
            .verify(reply.data["token"].as_str().unwrap())
            .await
            .unwrap();
        assert_eq!(identity.subject, "alice");
        assert!(identity.claims.contains_key("login_at"));
    }

    #[tokio::test]
    async fn wrong_password_is_a_domain_error() {
        let backend = module(jwt()).await;
        let err = backend
            .handle_request(args(
                "login",
                json!({"username": "alice", "password": "guess"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), INVALID_CREDENTIALS);

        let err = backend
            .handle_request(args("login", json!({"username": "mallory", "password": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn login_input_is_validated() {
        let backend = module(jwt()).await;
        let err = backend
            .handle_request(args("login", json!({"username": "alice"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn home_requires_identity() {
        let backend = module(jwt()).await;

        let err = backend.handle_request(args("home", json!({}))).await.unwrap_err();
        assert_eq!(err.code(), LOGIN_REQUIRED);

        let mut call = args("home", json!({}));
        call.authorized = Some(Identity::new("alice").with_claim("role", json!("admin")));
        let reply = backend.handle_request(call).await.unwrap();
        assert_eq!(reply.data["subject"], "alice");
        assert_eq!(reply.data["claims"]["role"], "admin");
        assert_eq!(reply.data["last_login"], Value::Null);
    }

    #[tokio::test]
    async fn home_reports_last_login() {
        let backend = module(jwt()).await;
        backend
            .handle_request(args(
                "login",
                json!({"username": "alice", "password": "wonderland"}),
            ))
            .await
            .unwrap();

        let mut call = args("home", json!({}));
        call.authorized = Some(Identity::new("alice"));
        let reply = backend.handle_request(call).await.unwrap();
        assert!(reply.data["last_login"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn logout_revokes_session_tokens() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let tokens = TokenHandler::Session(SessionTokenHandler::new(
            Arc::clone(&store),
            Duration::from_secs(60),
        ));
        let backend = module(tokens.clone()).await;
        let token = tokens.issue(&Identity::new("alice")).await.unwrap();

        let mut call = args("logout", json!({}));
        call.headers
            .insert("authorization".to_string(), vec![format!("Bearer {token}")]);
        let reply = backend.handle_request(call).await.unwrap();

        assert_eq!(reply.data["revoked"], true);
        assert!(tokens.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn logout_without_token_succeeds() {
        let backend = module(jwt()).await;
        let reply = backend.handle_request(args("logout", json!("{}"))).await.unwrap();
        assert_eq!(reply.code, 0);
        assert_eq!(reply.data["revoked"], false);
    }

    #[test]
    fn documents_describe_the_user_endpoint() {
        let backend = backend("account", &context(jwt()));
        let docs = backend.documents();
        assert_eq!(docs.name, "account");
        let user = &docs.endpoints[0];
        assert_eq!(user.pattern, "user");
        let names: Vec<_> = user.operations.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(names, ["home", "login", "logout"]);
    }
}
