//! Axum router construction and the single gateway entry point.
//!
//! The router has no per-path routes: S3 disambiguates operations by
//! method, path, query and headers together, and the console lives under a
//! reserved prefix, so every request falls through to [`gateway`].  The
//! gateway classifies the path, runs the pipeline, and consults exactly one
//! of the two route tables.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
    Router,
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::context::{RequestContext, Surface};
use crate::errors::{generate_request_id, S3Error};
use crate::metrics::{record_request, UNRESOLVED};
use crate::pipeline::Halt;
use crate::routes::decode_query;
use crate::{console, handlers, AppState};

/// Build the axum [`Router`] serving both the storage and console surfaces.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(gateway)
        .with_state(state)
        // common_headers_middleware runs around every response, including
        // pipeline rejections.
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(TraceLayer::new_for_http())
        // Disable the default 2MB body size limit (S3 objects can be large).
        .layer(DefaultBodyLimit::disable())
}

/// Every request enters here.
async fn gateway(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response {
    let started = Instant::now();
    let request_id = generate_request_id();

    let (parts, body) = req.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(err) => {
            return S3Error::InternalError(anyhow::anyhow!("failed to read request body: {err}"))
                .to_response(parts.uri.path(), &request_id);
        }
    };
    let req = Request::from_parts(parts, body);
    let body_len = req.body().len();
    let path = req.uri().path().to_string();

    let surface = Surface::classify(&path, &state.config.console.prefix);
    let mut ctx = RequestContext::new(request_id.clone(), Utc::now(), surface);

    let (operation, result) = match state.pipeline.run(&state.stage_env(), &req, &mut ctx) {
        Err(rejection) => (
            UNRESOLVED,
            match rejection.halt {
                Halt::Respond(resp) => Ok(resp),
                Halt::Reject(err) => Err(err),
            },
        ),
        Ok(()) => dispatch(&state, req, &ctx).await,
    };

    let mut response = match result {
        Ok(resp) => resp,
        Err(err) => err.to_response(&ctx.resource(&path), &request_id),
    };
    for (name, value) in &ctx.response_headers {
        response.headers_mut().insert(name.clone(), value.clone());
    }
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-amz-request-id", value);
    }

    record_request(operation, response.status().as_u16(), started.elapsed(), body_len);
    response
}

/// Route a request that passed the pipeline through the table of its surface.
async fn dispatch(
    state: &Arc<AppState>,
    req: Request<Bytes>,
    ctx: &RequestContext,
) -> (&'static str, Result<Response, S3Error>) {
    match ctx.surface {
        Surface::Console => {
            let operation = ctx.console_operation.map_or(UNRESOLVED, |op| op.name());
            (operation, console::serve(Arc::clone(state), req, ctx).await)
        }
        Surface::Storage => {
            let query = decode_query(req.uri().query());
            let route = match state.storage_routes.resolve(
                req.method(),
                req.uri().path(),
                &query,
                req.headers(),
            ) {
                Ok(route) => route,
                Err(err) => return (UNRESOLVED, Err(err)),
            };
            let operation = route.operation.name();
            debug!(request_id = %ctx.request_id, operation, "dispatching");
            (operation, handlers::serve(Arc::clone(state), route, req, ctx).await)
        }
    }
}

// -- Common headers middleware -----------------------------------------------

/// Tower middleware that adds common S3 response headers to every response:
/// - `x-amz-request-id`: 16-character uppercase hex string
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `BleepGate`
async fn common_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // The gateway sets its own id; this only covers responses it never saw.
    if !headers.contains_key("x-amz-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-amz-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static("BleepGate"));

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SigningContext;
    use crate::test_support::test_state;
    use axum::http::{Method, StatusCode};
    use tower::ServiceExt;

    fn signing() -> SigningContext {
        SigningContext::new("bleepgate", "bleepgate-secret", "us-east-1").unwrap()
    }

    /// A request signed now, with `body`.
    fn signed(method: Method, uri: &str, body: &'static [u8]) -> Request<Body> {
        let mut req = Request::builder()
            .method(method)
            .uri(format!("http://localhost:9000{uri}"))
            .body(Bytes::from_static(body))
            .unwrap();
        signing().sign(&mut req, Utc::now()).unwrap();
        req.map(Body::from)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_common_headers() {
        let app = app(test_state());
        let (status, headers, _) = send(&app, signed(Method::GET, "/", b"")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get("server").unwrap(), "BleepGate");
        assert!(headers.contains_key("date"));
        assert_eq!(headers.get("x-amz-request-id").unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_upload_part_scenario() {
        let state = test_state();
        let app = app(state.clone());

        send(&app, signed(Method::PUT, "/mybucket", b"")).await;
        let (_, _, body) = send(&app, signed(Method::POST, "/mybucket/obj.txt?uploads", b"")).await;
        let upload_id = body
            .split("<UploadId>")
            .nth(1)
            .and_then(|rest| rest.split("</UploadId>").next())
            .unwrap()
            .to_string();

        let uri = format!("/mybucket/obj.txt?uploadId={upload_id}&partNumber=3");
        let (status, headers, _) = send(&app, signed(Method::PUT, &uri, b"part three")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.contains_key("etag"));

        // The part landed in the upload, and no object was created.
        let page = state
            .engine
            .list_object_parts("mybucket", "obj.txt", &upload_id, 0, 1000)
            .unwrap();
        assert_eq!(page.parts.len(), 1);
        assert_eq!(page.parts[0].part_number, 3);
        assert!(state.engine.head_object("mybucket", "obj.txt").is_err());
    }

    #[tokio::test]
    async fn test_initiate_scenario() {
        let state = test_state();
        let app = app(state.clone());
        send(&app, signed(Method::PUT, "/mybucket", b"")).await;

        let (status, _, body) = send(&app, signed(Method::POST, "/mybucket/obj.txt?uploads", b"")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<InitiateMultipartUploadResult"));
        assert_eq!(
            state.engine.list_multipart_uploads("mybucket", "", 1000).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_console_paths_never_reach_storage() {
        let state = test_state();
        let app = app(state.clone());
        // A bucket literally named like the prefix would otherwise be created.
        let (status, _, body) = send(&app, signed(Method::PUT, "/minio", b"")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("<Code>AllAccessDisabled</Code>"));

        let (status, _, _) = send(&app, signed(Method::PUT, "/minio/obj.txt", b"data")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Percent-encoding the prefix does not move it into the storage table.
        let (status, _, body) = send(&app, signed(Method::PUT, "/%6Dinio", b"")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("<Code>AllAccessDisabled</Code>"));
        let (status, _, _) = send(&app, signed(Method::PUT, "/%6Dinio/obj.txt", b"data")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(state.engine.list_buckets().unwrap().is_empty());

        // Storage paths never reach the console table either.
        let (status, _, body) = send(&app, signed(Method::GET, "/rpc", b"")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("<Code>NoSuchBucket</Code>"));
    }

    #[tokio::test]
    async fn test_skewed_request_is_rejected() {
        let state = test_state();
        let app = app(state.clone());
        let mut req = Request::builder()
            .method(Method::PUT)
            .uri("http://localhost:9000/mybucket")
            .body(Bytes::new())
            .unwrap();
        signing()
            .sign(&mut req, Utc::now() - chrono::Duration::minutes(20))
            .unwrap();

        let (status, _, body) = send(&app, req.map(Body::from)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("<Code>RequestTimeTooSkewed</Code>"));
        assert!(state.engine.list_buckets().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_auth_never_reaches_handlers() {
        let state = test_state();
        let app = app(state.clone());

        let req = Request::put("/mybucket").body(Body::empty()).unwrap();
        let (status, _, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("<Code>AccessDenied</Code>"));
        assert!(body.contains("<Resource>/mybucket</Resource>"));

        let wrong = SigningContext::new("bleepgate", "not-the-secret", "us-east-1").unwrap();
        let mut req = Request::builder()
            .method(Method::PUT)
            .uri("http://localhost:9000/mybucket")
            .body(Bytes::new())
            .unwrap();
        wrong.sign(&mut req, Utc::now()).unwrap();
        let (status, _, body) = send(&app, req.map(Body::from)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("<Code>SignatureDoesNotMatch</Code>"));

        assert!(state.engine.list_buckets().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_substituted_body_is_rejected() {
        let state = test_state();
        let app = app(state.clone());
        send(&app, signed(Method::PUT, "/mybucket", b"")).await;

        let mut req = Request::builder()
            .method(Method::PUT)
            .uri("http://localhost:9000/mybucket/k")
            .body(Bytes::from_static(b"good"))
            .unwrap();
        signing().sign(&mut req, Utc::now()).unwrap();
        *req.body_mut() = Bytes::from_static(b"EVIL-SUBSTITUTED");

        let (status, _, body) = send(&app, req.map(Body::from)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>XAmzContentSHA256Mismatch</Code>"));
        assert!(state.engine.head_object("mybucket", "k").is_err());
    }

    #[tokio::test]
    async fn test_invalid_utf8_key_is_rejected() {
        let state = test_state();
        let app = app(state.clone());
        send(&app, signed(Method::PUT, "/mybucket", b"")).await;

        let (status, _, body) = send(&app, signed(Method::PUT, "/mybucket/a%FF", b"data")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>XMinioInvalidObjectName</Code>"));
        assert!(state.engine.head_object("mybucket", "a\u{FFFD}").is_err());

        let (status, _, _) = send(&app, signed(Method::GET, "/mybucket/a%EF%BF%BD", b"")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rpc_unknown_procedure() {
        let app = app(test_state());
        for method in [Method::GET, Method::POST] {
            let mut req = Request::builder()
                .method(method.clone())
                .uri("http://localhost:9000/minio/rpc")
                .header("content-type", "application/json")
                .body(Bytes::from_static(
                    br#"{"jsonrpc":"2.0","method":"Web.DoesNotExist","params":{},"id":1}"#,
                ))
                .unwrap();
            signing().sign(&mut req, Utc::now()).unwrap();

            let (status, headers, body) = send(&app, req.map(Body::from)).await;
            assert_eq!(status, StatusCode::OK, "{method}");
            assert_eq!(headers.get("cache-control").unwrap(), "no-store");
            let body: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(body["error"]["code"], crate::console::rpc::METHOD_NOT_FOUND);
            assert_eq!(body["id"], 1);
        }
    }

    #[tokio::test]
    async fn test_listing_resolution_is_idempotent() {
        let state = test_state();
        let app = app(state.clone());
        send(&app, signed(Method::PUT, "/mybucket", b"")).await;
        send(&app, signed(Method::PUT, "/mybucket/a.txt", b"a")).await;

        let mut bodies = Vec::new();
        for _ in 0..3 {
            let (status, _, body) = send(&app, signed(Method::GET, "/mybucket?prefix=a&max-keys=5", b"")).await;
            assert_eq!(status, StatusCode::OK);
            bodies.push(body);
        }
        assert!(bodies.windows(2).all(|w| w[0] == w[1]));
        assert!(bodies[0].contains("<Prefix>a</Prefix>"));
        assert!(bodies[0].contains("<MaxKeys>5</MaxKeys>"));
    }

    #[tokio::test]
    async fn test_unresolved_route_is_not_found() {
        let app = app(test_state());
        let (status, _, body) = send(&app, signed(Method::POST, "/", b"")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("<Code>NotFound</Code>"));
    }

    #[tokio::test]
    async fn test_public_console_asset_needs_no_signature() {
        let app = app(test_state());
        let req = Request::get("/minio/loader.css").body(Body::empty()).unwrap();
        let (status, headers, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get("cache-control").unwrap(), "public, max-age=31536000");
        assert!(body.contains("font-family"));
    }
}
