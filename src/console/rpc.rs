//! JSON-RPC 2.0 endpoint of the console and its `Web.*` service.
//!
//! Requests are `{"jsonrpc":"2.0","method":"Web.ListBuckets","params":...,"id":1}`.
//! `params` may be an object or a one-element array holding the object.
//! Every procedure runs with the identity the pipeline established and
//! reaches storage only through the [`StorageClient`](super::client::StorageClient).

use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::client::object_path;
use crate::context::RequestContext;
use crate::AppState;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const SERVER_ERROR: i64 = -32000;
pub const UNAUTHORIZED: i64 = -32001;

/// Service name every console procedure is registered under.
const SERVICE: &str = "Web";

/// Default lifetime of a presigned URL, in seconds.
const DEFAULT_PRESIGN_EXPIRY: u64 = 3600;

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(error),
            id,
        }
    }

    fn into_http(self, status: StatusCode) -> Response {
        let body = serde_json::to_vec(&self).unwrap_or_default();
        (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    id: Value,
}

// -- Procedure arguments -------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketArgs {
    bucket_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListObjectsArgs {
    bucket_name: String,
    #[serde(default)]
    prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectArgs {
    bucket_name: String,
    object_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresignedGetArgs {
    bucket_name: String,
    object_name: String,
    #[serde(default)]
    expiry: Option<u64>,
    #[serde(default)]
    host: Option<String>,
}

// -- Codec ---------------------------------------------------------------------

/// Whether `headers` declare a JSON body (`application/json`, any charset).
pub fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("application/json"))
}

/// Serve one RPC call.  RPC-level failures are JSON error objects with a
/// 200 status; only an unsupported content type changes the HTTP status.
pub async fn handle(state: &AppState, req: &Request<Bytes>, ctx: &RequestContext) -> Response {
    if !is_json_content_type(req.headers()) {
        return RpcResponse::error(
            Value::Null,
            RpcError::new(INVALID_REQUEST, "unsupported content type, expected application/json"),
        )
        .into_http(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    let value: Value = match serde_json::from_slice(req.body()) {
        Ok(value) => value,
        Err(err) => {
            return RpcResponse::error(Value::Null, RpcError::new(PARSE_ERROR, err.to_string()))
                .into_http(StatusCode::OK)
        }
    };
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let call: RpcRequest = match serde_json::from_value::<RpcRequest>(value) {
        Ok(call) if call.jsonrpc == "2.0" => call,
        _ => {
            return RpcResponse::error(id, RpcError::new(INVALID_REQUEST, "invalid JSON-RPC 2.0 request"))
                .into_http(StatusCode::OK)
        }
    };

    let outcome = match ctx.identity() {
        Some(identity) => {
            debug!(method = %call.method, access_key = %identity.access_key, "console rpc");
            dispatch(state, req.headers(), &call.method, call.params).await
        }
        None => Err(RpcError::new(UNAUTHORIZED, "authentication required")),
    };

    match outcome {
        Ok(result) => RpcResponse::result(call.id, result),
        Err(error) => RpcResponse::error(call.id, error),
    }
    .into_http(StatusCode::OK)
}

async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    params: Value,
) -> Result<Value, RpcError> {
    let procedure = method
        .strip_prefix(SERVICE)
        .and_then(|rest| rest.strip_prefix('.'))
        .ok_or_else(|| RpcError::new(METHOD_NOT_FOUND, format!("rpc: can't find service {method}")))?;

    match procedure {
        "ServerInfo" => Ok(server_info(state)),
        "ListBuckets" => {
            let listing = state.storage_client.list_buckets().await.map_err(server_error)?;
            let buckets: Vec<Value> = listing
                .buckets
                .bucket
                .into_iter()
                .map(|b| json!({ "name": b.name, "creationDate": b.creation_date }))
                .collect();
            Ok(json!({ "buckets": buckets }))
        }
        "MakeBucket" => {
            let args: BucketArgs = decode_params(params)?;
            state
                .storage_client
                .make_bucket(&args.bucket_name)
                .await
                .map_err(server_error)?;
            Ok(json!({}))
        }
        "ListObjects" => {
            let args: ListObjectsArgs = decode_params(params)?;
            let listing = state
                .storage_client
                .list_objects(&args.bucket_name, &args.prefix)
                .await
                .map_err(server_error)?;
            let mut objects: Vec<Value> = listing
                .common_prefixes
                .into_iter()
                .map(|p| json!({ "name": p.prefix, "size": 0, "isDir": true }))
                .collect();
            objects.extend(listing.contents.into_iter().map(|c| {
                json!({
                    "name": c.key,
                    "size": c.size,
                    "lastModified": c.last_modified,
                    "isDir": false,
                })
            }));
            Ok(json!({ "objects": objects, "isTruncated": listing.is_truncated }))
        }
        "RemoveObject" => {
            let args: ObjectArgs = decode_params(params)?;
            state
                .storage_client
                .remove_object(&args.bucket_name, &args.object_name)
                .await
                .map_err(server_error)?;
            Ok(json!({}))
        }
        "PresignedGet" => {
            let args: PresignedGetArgs = decode_params(params)?;
            let host = args
                .host
                .or_else(|| {
                    headers
                        .get(header::HOST)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                })
                .ok_or_else(|| RpcError::new(INVALID_PARAMS, "host is required"))?;
            let path = object_path(&args.bucket_name, Some(&args.object_name));
            let url = state.signing.presign_get(
                &format!("http://{host}"),
                &path,
                args.expiry.unwrap_or(DEFAULT_PRESIGN_EXPIRY),
                Utc::now(),
            );
            Ok(json!({ "url": url }))
        }
        _ => Err(RpcError::new(
            METHOD_NOT_FOUND,
            format!("rpc: can't find method {method}"),
        )),
    }
}

fn server_info(state: &AppState) -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "region": state.config.server.region,
        "platform": format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        "consolePrefix": state.config.console.prefix,
    })
}

/// Decode `params`, unwrapping a one-element positional array.
fn decode_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    let params = match params {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        Value::Null => json!({}),
        other => other,
    };
    serde_json::from_value(params).map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))
}

fn server_error(err: anyhow::Error) -> RpcError {
    warn!("console storage call failed: {err:#}");
    RpcError::new(SERVER_ERROR, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthMethod, Identity};
    use crate::context::Surface;
    use crate::test_support::test_state;

    fn rpc_request(body: &str, content_type: &str) -> Request<Bytes> {
        Request::post("/minio/rpc")
            .header("content-type", content_type)
            .header("host", "localhost:9000")
            .body(Bytes::from(body.to_string()))
            .unwrap()
    }

    fn authed_ctx() -> RequestContext {
        let mut ctx = RequestContext::new("ID".into(), Utc::now(), Surface::Console);
        ctx.set_identity(Identity {
            access_key: "bleepgate".into(),
            region: "us-east-1".into(),
            method: AuthMethod::Header,
        });
        ctx
    }

    async fn call(body: &str, content_type: &str, ctx: &RequestContext) -> (StatusCode, Value) {
        let state = test_state();
        let resp = handle(&state, &rpc_request(body, content_type), ctx).await;
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_json_content_type_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_json_content_type(&headers));
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert!(is_json_content_type(&headers));
        headers.insert(header::CONTENT_TYPE, "application/json; charset=UTF-8".parse().unwrap());
        assert!(is_json_content_type(&headers));
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(!is_json_content_type(&headers));
    }

    #[test]
    fn test_decode_params_shapes() {
        let args: BucketArgs = decode_params(json!([{ "bucketName": "photos" }])).unwrap();
        assert_eq!(args.bucket_name, "photos");
        let args: BucketArgs = decode_params(json!({ "bucketName": "docs" })).unwrap();
        assert_eq!(args.bucket_name, "docs");
        let err = decode_params::<BucketArgs>(json!({})).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_procedure_is_json_error() {
        let (status, body) = call(
            r#"{"jsonrpc":"2.0","method":"Web.Nope","params":{},"id":7}"#,
            "application/json",
            &authed_ctx(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(body["id"], 7);
    }

    #[tokio::test]
    async fn test_codec_errors() {
        let ctx = authed_ctx();
        let (_, body) = call("{not json", "application/json", &ctx).await;
        assert_eq!(body["error"]["code"], PARSE_ERROR);

        let (_, body) = call(r#"{"jsonrpc":"1.0","method":"Web.ServerInfo","id":1}"#, "application/json", &ctx).await;
        assert_eq!(body["error"]["code"], INVALID_REQUEST);

        let (status, body) = call(r#"{}"#, "text/plain", &ctx).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let ctx = RequestContext::new("ID".into(), Utc::now(), Surface::Console);
        let (_, body) = call(
            r#"{"jsonrpc":"2.0","method":"Web.ServerInfo","id":1}"#,
            "application/json",
            &ctx,
        )
        .await;
        assert_eq!(body["error"]["code"], UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_server_info_and_presigned_get() {
        let ctx = authed_ctx();
        let (_, body) = call(
            r#"{"jsonrpc":"2.0","method":"Web.ServerInfo","id":1}"#,
            "application/json; charset=UTF-8",
            &ctx,
        )
        .await;
        assert_eq!(body["result"]["region"], "us-east-1");

        let (_, body) = call(
            r#"{"jsonrpc":"2.0","method":"Web.PresignedGet","params":[{"bucketName":"photos","objectName":"a b.txt"}],"id":2}"#,
            "application/json",
            &ctx,
        )
        .await;
        let url = body["result"]["url"].as_str().unwrap();
        assert!(url.starts_with("http://localhost:9000/photos/a%20b.txt?X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_storage_failure_is_server_error() {
        // The test state's client points at a closed port.
        let (_, body) = call(
            r#"{"jsonrpc":"2.0","method":"Web.ListBuckets","id":3}"#,
            "application/json",
            &authed_ctx(),
        )
        .await;
        assert_eq!(body["error"]["code"], SERVER_ERROR);
    }
}
