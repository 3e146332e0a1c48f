//! Object-level S3 operation handlers.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{quoted_etag, validate_bucket_name, validate_object_name, with_engine, xml_response, OperationRequest};
use crate::engine::{ObjectAttributes, ObjectInfo, PutObjectInput};
use crate::errors::S3Error;
use crate::routes::COPY_SOURCE_HEADER;
use crate::xml;
use crate::AppState;

/// Prefix for user-defined metadata headers.
const META_PREFIX: &str = "x-amz-meta-";

/// `PUT /{bucket}/{key}` -- store an object.
pub async fn put_object(state: Arc<AppState>, op: &OperationRequest) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let key = op.key()?.to_string();
    let input = PutObjectInput {
        data: op.body.clone(),
        content_type: extract_content_type(&op.headers),
        metadata: extract_user_metadata(&op.headers),
    };

    let info = with_engine(&state, move |engine| engine.put_object(&bucket, &key, input)).await?;

    Ok((StatusCode::OK, [("etag", quoted_etag(&info.etag))]).into_response())
}

/// `GET /{bucket}/{key}`
pub async fn get_object(state: Arc<AppState>, op: &OperationRequest) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let key = op.key()?.to_string();

    let (info, data) = with_engine(&state, move |engine| engine.get_object(&bucket, &key)).await?;

    let mut resp = (StatusCode::OK, data).into_response();
    apply_object_headers(resp.headers_mut(), &info);
    Ok(resp)
}

/// `HEAD /{bucket}/{key}` -- the GetObject headers without a body.
pub async fn head_object(state: Arc<AppState>, op: &OperationRequest) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let key = op.key()?.to_string();

    let info = with_engine(&state, move |engine| engine.head_object(&bucket, &key)).await?;

    let mut resp = StatusCode::OK.into_response();
    apply_object_headers(resp.headers_mut(), &info);
    Ok(resp)
}

/// `PUT /{bucket}/{key}` with `x-amz-copy-source`.
pub async fn copy_object(state: Arc<AppState>, op: &OperationRequest) -> Result<Response, S3Error> {
    let dst_bucket = op.bucket()?.to_string();
    let dst_key = op.key()?.to_string();
    let source = op.header(COPY_SOURCE_HEADER).unwrap_or("");
    let (src_bucket, src_key) = parse_copy_source(source)?;

    let replace = op
        .header("x-amz-metadata-directive")
        .is_some_and(|d| d.eq_ignore_ascii_case("REPLACE"));
    if src_bucket == dst_bucket && src_key == dst_key && !replace {
        return Err(S3Error::InvalidCopySource {
            message: "This copy request is illegal because it is trying to copy an object to itself without changing the object's metadata.".to_string(),
        });
    }

    // REPLACE takes the destination's attributes from this request; COPY
    // (the default) keeps the source's.
    let attributes = replace.then(|| ObjectAttributes {
        content_type: extract_content_type(&op.headers),
        metadata: extract_user_metadata(&op.headers),
    });
    let info = with_engine(&state, move |engine| {
        engine.copy_object(&src_bucket, &src_key, &dst_bucket, &dst_key, attributes)
    })
    .await?;

    let body = xml::render_copy_object_result(&info.etag, info.last_modified);
    Ok(xml_response(StatusCode::OK, body))
}

/// `DELETE /{bucket}/{key}` -- succeeds whether or not the key exists.
pub async fn delete_object(state: Arc<AppState>, op: &OperationRequest) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let key = op.key()?.to_string();
    with_engine(&state, move |engine| engine.delete_object(&bucket, &key)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Split an `x-amz-copy-source` value (`[/]bucket/key[?versionId=..]`)
/// into its decoded bucket and key.
pub fn parse_copy_source(source: &str) -> Result<(String, String), S3Error> {
    let invalid = || S3Error::InvalidCopySource {
        message: "Copy Source must mention the source bucket and key: sourcebucket/sourcekey."
            .to_string(),
    };

    let source = source.split('?').next().unwrap_or("");
    let source = percent_decode_str(source.strip_prefix('/').unwrap_or(source))
        .decode_utf8()
        .map_err(|_| invalid())?;
    let (bucket, key) = source.split_once('/').ok_or_else(invalid)?;
    if bucket.is_empty() || key.is_empty() {
        return Err(invalid());
    }
    validate_bucket_name(bucket)?;
    validate_object_name(key)?;
    Ok((bucket.to_string(), key.to_string()))
}

fn apply_object_headers(headers: &mut HeaderMap, info: &ObjectInfo) {
    let mut set = |name: &str, value: String| {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            headers.insert(name, value);
        }
    };

    set("content-type", info.content_type.clone());
    set("content-length", info.size.to_string());
    set("etag", quoted_etag(&info.etag));
    set(
        "last-modified",
        httpdate::fmt_http_date(info.last_modified.into()),
    );
    set("accept-ranges", "bytes".to_string());
    for (name, value) in &info.metadata {
        set(&format!("{META_PREFIX}{name}"), value.clone());
    }
}

/// Extract user metadata from `x-amz-meta-*` headers, keyed by the suffix.
fn extract_user_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let suffix = name.as_str().strip_prefix(META_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((suffix.to_string(), value.to_string()))
        })
        .collect()
}

/// Content type of the upload, `application/octet-stream` when absent.
fn extract_content_type(headers: &HeaderMap) -> String {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use md5::Digest;
    use crate::handlers::dispatch;
    use crate::routes::Operation;
    use crate::test_support::{op, read_body, test_state};

    async fn bucket_with_object(key: &str, body: &'static [u8]) -> Arc<AppState> {
        let state = test_state();
        dispatch(state.clone(), op(Operation::PutBucket, "photos", "", "")).await.unwrap();
        let mut put = op(Operation::PutObject, "photos", key, "");
        put.body = Bytes::from_static(body);
        put.headers.insert("content-type", HeaderValue::from_static("text/plain"));
        put.headers.insert("x-amz-meta-owner", HeaderValue::from_static("alice"));
        let resp = dispatch(state.clone(), put).await.unwrap();
        assert_eq!(
            resp.headers().get("etag").unwrap(),
            &format!("\"{:x}\"", md5::Md5::digest(body))
        );
        state
    }

    #[test]
    fn test_parse_copy_source() {
        assert_eq!(
            parse_copy_source("/src/a/b.txt").unwrap(),
            ("src".to_string(), "a/b.txt".to_string())
        );
        assert_eq!(
            parse_copy_source("src/a%20b.txt?versionId=null").unwrap(),
            ("src".to_string(), "a b.txt".to_string())
        );
        assert!(parse_copy_source("src").is_err());
        assert!(parse_copy_source("/src/").is_err());
        assert!(parse_copy_source("").is_err());
        assert!(matches!(
            parse_copy_source("BAD/key"),
            Err(S3Error::InvalidBucketName { .. })
        ));
        assert!(matches!(
            parse_copy_source("/src/a%FF"),
            Err(S3Error::InvalidCopySource { .. })
        ));
    }

    #[test]
    fn test_extract_metadata_and_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-meta-color", HeaderValue::from_static("blue"));
        headers.insert("x-amz-date", HeaderValue::from_static("20260101T000000Z"));
        let meta = extract_user_metadata(&headers);
        assert_eq!(meta.len(), 1);
        assert_eq!(meta["color"], "blue");
        assert_eq!(extract_content_type(&headers), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_get_and_head_object() {
        let state = bucket_with_object("a.txt", b"hello").await;

        let resp = dispatch(state.clone(), op(Operation::GetObject, "photos", "a.txt", ""))
            .await
            .unwrap();
        assert_eq!(resp.headers().get("content-type").unwrap(), "text/plain");
        assert_eq!(resp.headers().get("x-amz-meta-owner").unwrap(), "alice");
        assert!(resp.headers().contains_key("last-modified"));
        assert_eq!(read_body(resp).await, "hello");

        let resp = dispatch(state.clone(), op(Operation::HeadObject, "photos", "a.txt", ""))
            .await
            .unwrap();
        assert_eq!(resp.headers().get("content-length").unwrap(), "5");

        let err = dispatch(state, op(Operation::GetObject, "photos", "missing", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, S3Error::NoSuchKey { .. }));
    }

    #[tokio::test]
    async fn test_copy_object() {
        let state = bucket_with_object("a.txt", b"hello").await;

        let mut copy = op(Operation::CopyObject, "photos", "b.txt", "");
        copy.headers
            .insert(COPY_SOURCE_HEADER, HeaderValue::from_static("/photos/a.txt"));
        let resp = dispatch(state.clone(), copy).await.unwrap();
        let body = read_body(resp).await;
        assert!(body.contains("<CopyObjectResult"));

        let resp = dispatch(state.clone(), op(Operation::GetObject, "photos", "b.txt", ""))
            .await
            .unwrap();
        assert_eq!(read_body(resp).await, "hello");

        let mut onto_itself = op(Operation::CopyObject, "photos", "a.txt", "");
        onto_itself
            .headers
            .insert(COPY_SOURCE_HEADER, HeaderValue::from_static("photos/a.txt"));
        assert!(matches!(
            dispatch(state, onto_itself).await.unwrap_err(),
            S3Error::InvalidCopySource { .. }
        ));
    }

    #[tokio::test]
    async fn test_copy_metadata_directive() {
        let state = bucket_with_object("a.txt", b"hello").await;

        // COPY keeps the source's attributes even when the request sends others.
        let mut copy = op(Operation::CopyObject, "photos", "b.txt", "");
        copy.headers
            .insert(COPY_SOURCE_HEADER, HeaderValue::from_static("photos/a.txt"));
        copy.headers.insert("content-type", HeaderValue::from_static("image/png"));
        dispatch(state.clone(), copy).await.unwrap();
        let resp = dispatch(state.clone(), op(Operation::HeadObject, "photos", "b.txt", ""))
            .await
            .unwrap();
        assert_eq!(resp.headers().get("content-type").unwrap(), "text/plain");
        assert_eq!(resp.headers().get("x-amz-meta-owner").unwrap(), "alice");

        // REPLACE onto itself swaps them for the request's.
        let mut replace = op(Operation::CopyObject, "photos", "a.txt", "");
        replace
            .headers
            .insert(COPY_SOURCE_HEADER, HeaderValue::from_static("photos/a.txt"));
        replace
            .headers
            .insert("x-amz-metadata-directive", HeaderValue::from_static("REPLACE"));
        replace.headers.insert("content-type", HeaderValue::from_static("text/markdown"));
        replace.headers.insert("x-amz-meta-reviewed", HeaderValue::from_static("yes"));
        dispatch(state.clone(), replace).await.unwrap();

        let resp = dispatch(state.clone(), op(Operation::HeadObject, "photos", "a.txt", ""))
            .await
            .unwrap();
        assert_eq!(resp.headers().get("content-type").unwrap(), "text/markdown");
        assert_eq!(resp.headers().get("x-amz-meta-reviewed").unwrap(), "yes");
        assert!(resp.headers().get("x-amz-meta-owner").is_none());

        let resp = dispatch(state, op(Operation::GetObject, "photos", "a.txt", ""))
            .await
            .unwrap();
        assert_eq!(read_body(resp).await, "hello");
    }

    #[tokio::test]
    async fn test_delete_object_is_idempotent() {
        let state = bucket_with_object("a.txt", b"hello").await;
        for _ in 0..2 {
            let resp = dispatch(state.clone(), op(Operation::DeleteObject, "photos", "a.txt", ""))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        }
    }
}
