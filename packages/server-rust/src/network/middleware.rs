//! HTTP middleware stack for the gateway.
//!
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost (processes the request first on the way
//! in, and the response last on the way out).

use axum::http::header::HeaderName;
use axum::http::Method;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;

/// Header carrying the per-call trace identifier.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// The composed Tower layer type produced by [`build_http_layers`].
///
/// Each layer wraps the next in a `Stack`, from outermost (first applied)
/// to innermost (last applied).
type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        CorsLayer,
        tower::layer::util::Stack<
            CompressionLayer,
            tower::layer::util::Stack<
                TraceLayer<
                    tower_http::classify::SharedClassifier<
                        tower_http::classify::ServerErrorsAsFailures,
                    >,
                >,
                tower::layer::util::Stack<
                    SetRequestIdLayer<MakeRequestUuid>,
                    tower::layer::util::Identity,
                >,
            >,
        >,
    >,
>;

/// Builds the HTTP-level Tower middleware stack from the network configuration.
///
/// The body size limit and the request timeout are enforced inside the API
/// path (handler and dispatch pipeline) so oversized or slow calls still get
/// a signed response.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `x-trace-id` when the client sent none
/// 2. `Tracing` -- logs request/response with structured trace spans
/// 3. `Compression` -- gzip response compression
/// 4. `CORS` -- Cross-Origin Resource Sharing based on configured origins
/// 5. `PropagateRequestId` -- copies `x-trace-id` from the request to the response
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let trace_id = HeaderName::from_static(TRACE_ID_HEADER);

    let cors = build_cors_layer(&config.cors_origins);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(trace_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(PropagateRequestIdLayer::new(trace_id))
        .into_inner()
}

/// Builds the CORS layer from the configured list of allowed origins.
///
/// A wildcard `"*"` in the origins list allows any origin. Otherwise,
/// each origin string is parsed and added to an explicit allowlist.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_http_layers_with_defaults_and_custom_origins() {
        let _layers = build_http_layers(&NetworkConfig::default());
        let _layers = build_http_layers(&NetworkConfig {
            cors_origins: vec!["https://app.example.com".to_string()],
            ..NetworkConfig::default()
        });
    }

    #[test]
    fn build_cors_layer_accepts_wildcard_and_lists() {
        let _cors = build_cors_layer(&["*".to_string()]);
        let _cors = build_cors_layer(&[
            "http://localhost:3000".to_string(),
            "not a header value\n".to_string(),
        ]);
    }
}
