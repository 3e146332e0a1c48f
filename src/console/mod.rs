//! Browser console served under the reserved path prefix.
//!
//! The privileged-prefix gate has already resolved the console route and
//! stored it in the request context; this module only serves it.  Asset
//! and bootstrap responses go through `tower-http`'s compression layer.

pub mod assets;
pub mod client;
pub mod rpc;

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tower::{Layer, ServiceExt};
use tower_http::compression::CompressionLayer;

use crate::context::RequestContext;
use crate::errors::S3Error;
use crate::routes::Operation;
use crate::AppState;

use self::assets::INDEX_DOCUMENT;

/// Serve a console request whose route the gate already resolved.
pub async fn serve(
    state: Arc<AppState>,
    req: Request<Bytes>,
    ctx: &RequestContext,
) -> Result<Response, S3Error> {
    match ctx.console_operation {
        Some(Operation::ConsoleRpc) => Ok(rpc::handle(&state, &req, ctx).await),
        Some(Operation::ConsoleAsset) => {
            let name = req
                .uri()
                .path()
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();
            serve_asset(state, &req, name).await
        }
        // Every other path under the prefix is the single-page application.
        Some(Operation::ConsoleIndex) => serve_asset(state, &req, INDEX_DOCUMENT.to_string()).await,
        _ => Err(S3Error::AllAccessDisabled),
    }
}

async fn serve_asset(
    state: Arc<AppState>,
    req: &Request<Bytes>,
    name: String,
) -> Result<Response, S3Error> {
    let store = Arc::clone(&state.assets);
    let asset = tokio::task::spawn_blocking(move || store.load(&name))
        .await
        .map_err(|e| S3Error::InternalError(anyhow::anyhow!("asset task failed: {e}")))?
        .ok_or(S3Error::NoSuchRoute)?;

    let length = asset.body.len();
    let body = if req.method() == Method::HEAD {
        Body::empty()
    } else {
        Body::from(asset.body)
    };
    let mut resp = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(asset.content_type))],
        body,
    )
        .into_response();
    if req.method() == Method::HEAD {
        resp.headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        return Ok(resp);
    }
    Ok(compress(req.headers(), resp).await)
}

/// Run `resp` through the compression layer as negotiated by the
/// request's `Accept-Encoding`.
async fn compress(request_headers: &HeaderMap, resp: Response) -> Response {
    let mut probe = Request::new(());
    *probe.headers_mut() = request_headers.clone();

    let mut pending = Some(resp);
    let service = tower::service_fn(move |_: Request<()>| {
        let resp = pending.take().unwrap_or_default();
        async move { Ok::<_, Infallible>(resp) }
    });

    match CompressionLayer::new().layer(service).oneshot(probe).await {
        Ok(resp) => resp.map(Body::new),
        Err(never) => match never {},
    }
}
