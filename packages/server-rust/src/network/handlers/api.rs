//! `POST {path}/api`: the signed RPC transport.
//!
//! Body bytes are decoded into an [`Envelope`], the signature is verified
//! against the caller's key, and the call runs through the dispatch
//! pipeline. Every outcome, including transport failures, is answered with
//! HTTP 200 and a signed [`Response`].

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Request};
use axum::Json;
use gantry_core::{
    Args, Connection, DispatchError, DispatchResult, Envelope, Headers, Response,
};
use serde_json::Value;
use tower::ServiceExt;
use tracing::debug;

use super::AppState;
use crate::network::middleware::TRACE_ID_HEADER;
use crate::service::auth::bearer_token;
use crate::service::Call;

/// Selects the key used to verify the request and sign the response.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Carries the gateway's application name into every call.
pub const APPLICATION_HEADER: &str = "x-application";

pub async fn api_handler(State(state): State<AppState>, request: Request<Body>) -> Json<Response> {
    let (parts, body) = request.into_parts();
    let trace_id = header_value(&parts.headers, TRACE_ID_HEADER)
        .unwrap_or_default()
        .to_string();
    let client_id = header_value(&parts.headers, CLIENT_ID_HEADER);

    let mut response = match accept(&state, &parts, body, &trace_id).await {
        Ok(call) => {
            let outcome = state.pipeline.clone().oneshot(call).await;
            Response::from_outcome(trace_id, &outcome)
        }
        Err(err) => {
            debug!(trace_id = %trace_id, code = err.code(), error = %err, "request rejected");
            Response::from_error(trace_id, &err)
        }
    };

    state.signer.seal(client_id, &mut response);
    Json(response)
}

/// Reads, verifies, and converts the request into a dispatchable call.
async fn accept(
    state: &AppState,
    parts: &Parts,
    body: Body,
    trace_id: &str,
) -> DispatchResult<Call> {
    let bytes = axum::body::to_bytes(body, state.config.max_body_bytes)
        .await
        .map_err(|e| DispatchError::ValidationFailed(format!("cannot read body: {e}")))?;
    let envelope: Envelope = serde_json::from_slice(&bytes)
        .map_err(|e| DispatchError::ValidationFailed(format!("cannot decode envelope: {e}")))?;

    let client_id = header_value(&parts.headers, CLIENT_ID_HEADER).unwrap_or_default();
    state.signer.verify(client_id, &envelope.sign, &envelope)?;

    let path = envelope.method_path()?;
    let mut args = Args::new(path, normalize_data(envelope.data)).with_trace_id(trace_id);
    args.headers = collect_headers(&parts.headers);
    args.headers.insert(
        APPLICATION_HEADER.to_string(),
        vec![state.app_name.to_string()],
    );
    args.connection = Connection {
        remote_addr: parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string()),
        user_agent: header_value(&parts.headers, header::USER_AGENT.as_str()).map(str::to_string),
    };

    let token = header_value(&parts.headers, header::AUTHORIZATION.as_str())
        .map(bearer_token)
        .unwrap_or_default();
    Ok(Call::new(args, token))
}

/// Decodes `data` sent as a JSON-encoded object or array string.
fn normalize_data(data: Value) -> Value {
    if let Value::String(raw) = &data {
        if let Ok(decoded @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str(raw) {
            return decoded;
        }
    }
    data
}

fn collect_headers(headers: &HeaderMap) -> Headers {
    let mut collected = Headers::new();
    for (name, value) in headers {
        collected
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    collected
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use gantry_core::{ErrorKind, SigningKey};
    use serde_json::json;

    use super::*;
    use crate::network::handlers::test_support::{self, CLIENT, CLIENT_SECRET};
    use crate::service::DefaultPolicy;

    fn request(envelope: &Envelope, client: &str) -> Request<Body> {
        Request::post("/api")
            .header(TRACE_ID_HEADER, "trace-1")
            .header(CLIENT_ID_HEADER, client)
            .header(header::USER_AGENT, "unit-test")
            .body(Body::from(serde_json::to_vec(envelope).unwrap()))
            .unwrap()
    }

    fn signed(method: &str, data: Value) -> Envelope {
        Envelope::new(method, data).signed(&SigningKey::derive(CLIENT_SECRET))
    }

    #[test]
    fn string_data_is_decoded_only_for_objects_and_arrays() {
        assert_eq!(normalize_data(json!("{\"a\":1}")), json!({"a": 1}));
        assert_eq!(normalize_data(json!("[1,2]")), json!([1, 2]));
        assert_eq!(normalize_data(json!("42")), json!("42"));
        assert_eq!(normalize_data(json!("not json")), json!("not json"));
        assert_eq!(normalize_data(json!({"b": 2})), json!({"b": 2}));
    }

    #[test]
    fn headers_keep_every_value_in_order() {
        let mut headers = HeaderMap::new();
        headers.append("x-tag", HeaderValue::from_static("one"));
        headers.append("x-tag", HeaderValue::from_static("two"));
        headers.insert("X-Single", HeaderValue::from_static("v"));

        let collected = collect_headers(&headers);
        assert_eq!(collected["x-tag"], vec!["one", "two"]);
        assert_eq!(collected["x-single"], vec!["v"]);
    }

    #[tokio::test]
    async fn signed_call_reaches_the_backend() {
        let state = test_support::state(DefaultPolicy::Allow).await;
        let envelope = signed("demo.echo.data", json!("{\"k\":\"v\"}"));

        let Json(response) = api_handler(State(state.clone()), request(&envelope, CLIENT)).await;

        assert_eq!(response.code, 0, "{}", response.message);
        assert_eq!(response.trace_id, "trace-1");
        assert_eq!(response.content["data"], json!({"k": "v"}));
        assert_eq!(response.content["application"], "gantry");
        let key = state.signer.keys().client(CLIENT).unwrap();
        let mut unsigned = response.clone();
        unsigned.sign.clear();
        assert_eq!(response.sign, gantry_core::Signer::sign(key, &unsigned));
    }

    #[tokio::test]
    async fn undecodable_body_is_a_signed_validation_failure() {
        let state = test_support::state(DefaultPolicy::Allow).await;
        let request = Request::post("/api")
            .header(TRACE_ID_HEADER, "trace-2")
            .body(Body::from("{not json"))
            .unwrap();

        let Json(response) = api_handler(State(state.clone()), request).await;

        assert_eq!(response.code, ErrorKind::ValidationFailed.code());
        assert!(!response.sign.is_empty());
        assert_eq!(state.counter.snapshot().executed, 0);
    }

    #[tokio::test]
    async fn unknown_client_is_rejected_and_signed_with_global_key() {
        let state = test_support::state(DefaultPolicy::Allow).await;
        let envelope = signed("demo.echo.data", json!({}));

        let Json(response) = api_handler(State(state.clone()), request(&envelope, "stranger")).await;

        assert_eq!(response.code, ErrorKind::InvalidSignature.code());
        let mut unsigned = response.clone();
        unsigned.sign.clear();
        assert_eq!(
            response.sign,
            gantry_core::Signer::sign(state.signer.keys().global(), &unsigned)
        );
    }

    #[tokio::test]
    async fn malformed_method_after_valid_signature() {
        let state = test_support::state(DefaultPolicy::Allow).await;
        let envelope = signed("demo.echo", json!({}));

        let Json(response) = api_handler(State(state), request(&envelope, CLIENT)).await;

        assert_eq!(response.code, ErrorKind::ValidationFailed.code());
    }

    #[tokio::test]
    async fn missing_trace_id_reaches_the_dispatcher_check() {
        let state = test_support::state(DefaultPolicy::Allow).await;
        let envelope = signed("demo.echo.data", json!({}));
        let request = Request::post("/api")
            .header(CLIENT_ID_HEADER, CLIENT)
            .body(Body::from(serde_json::to_vec(&envelope).unwrap()))
            .unwrap();

        let Json(response) = api_handler(State(state), request).await;

        assert_eq!(response.code, ErrorKind::MissingTraceHeader.code());
    }
}
