//! Bucket-level S3 operation handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::sync::Arc;

use super::{with_engine, xml_response, OperationRequest};
use crate::engine::{EngineError, ListObjectsParams};
use crate::errors::S3Error;
use crate::xml::{self, DeleteFailure};
use crate::AppState;

/// Largest bucket policy document accepted.
const MAX_POLICY_SIZE: usize = 20 * 1024;

/// `GET /` -- list all buckets.
pub async fn list_buckets(state: Arc<AppState>, op: &OperationRequest) -> Result<Response, S3Error> {
    let buckets = with_engine(&state, |engine| engine.list_buckets()).await?;
    let body = xml::render_list_buckets_result(&op.identity.access_key, &buckets);
    Ok(xml_response(StatusCode::OK, body))
}

/// `PUT /{bucket}` -- create a bucket.
pub async fn put_bucket(state: Arc<AppState>, op: &OperationRequest) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let location = format!("/{bucket}");

    with_engine(&state, move |engine| engine.make_bucket(&bucket)).await?;

    Ok((StatusCode::OK, [("location", location)], "").into_response())
}

/// `HEAD /{bucket}` -- check bucket existence.
pub async fn head_bucket(state: Arc<AppState>, op: &OperationRequest) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    with_engine(&state, move |engine| engine.head_bucket(&bucket)).await?;

    Ok((
        StatusCode::OK,
        [("x-amz-bucket-region", state.config.server.region.clone())],
    )
        .into_response())
}

/// `DELETE /{bucket}` -- delete an empty bucket.
pub async fn delete_bucket(state: Arc<AppState>, op: &OperationRequest) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    with_engine(&state, move |engine| engine.delete_bucket(&bucket)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /{bucket}?location`
pub async fn get_bucket_location(
    state: Arc<AppState>,
    op: &OperationRequest,
) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    with_engine(&state, move |engine| engine.head_bucket(&bucket)).await?;

    let body = xml::render_location_constraint(&state.config.server.region);
    Ok(xml_response(StatusCode::OK, body))
}

/// `GET /{bucket}?policy`
pub async fn get_bucket_policy(
    state: Arc<AppState>,
    op: &OperationRequest,
) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let policy = with_engine(&state, move |engine| engine.get_bucket_policy(&bucket)).await?;
    Ok((StatusCode::OK, [("content-type", "application/json")], policy).into_response())
}

/// `PUT /{bucket}?policy` -- the body must be a JSON object.
pub async fn put_bucket_policy(
    state: Arc<AppState>,
    op: &OperationRequest,
) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let policy = validate_policy(&op.body)?;
    with_engine(&state, move |engine| engine.put_bucket_policy(&bucket, policy)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `DELETE /{bucket}?policy`
pub async fn delete_bucket_policy(
    state: Arc<AppState>,
    op: &OperationRequest,
) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    with_engine(&state, move |engine| engine.delete_bucket_policy(&bucket)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn validate_policy(body: &Bytes) -> Result<Bytes, S3Error> {
    if body.is_empty() || body.len() > MAX_POLICY_SIZE {
        return Err(S3Error::MalformedPolicy);
    }
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(_)) => Ok(body.clone()),
        _ => Err(S3Error::MalformedPolicy),
    }
}

/// `GET /{bucket}` -- ListObjects (v1).
pub async fn list_objects(state: Arc<AppState>, op: &OperationRequest) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let params = ListObjectsParams {
        prefix: op.query_value("prefix").unwrap_or("").to_string(),
        marker: op.query_value("marker").unwrap_or("").to_string(),
        delimiter: op.query_value("delimiter").unwrap_or("").to_string(),
        max_keys: op.page_size("max-keys")?,
    };

    let page = {
        let bucket = bucket.clone();
        let params = params.clone();
        with_engine(&state, move |engine| engine.list_objects(&bucket, &params)).await?
    };

    let body = xml::render_list_objects_result(&bucket, &params, &page);
    Ok(xml_response(StatusCode::OK, body))
}

/// `POST /{bucket}?delete` -- DeleteMultipleObjects.
///
/// Per-key failures are reported inside the result document; the request
/// itself only fails when the bucket is missing or the body is malformed.
pub async fn delete_multiple_objects(
    state: Arc<AppState>,
    op: &OperationRequest,
) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let (keys, quiet) = xml::parse_delete(&op.body)?;

    let (deleted, failures) = with_engine(&state, move |engine| {
        engine.head_bucket(&bucket)?;

        let mut deleted = Vec::with_capacity(keys.len());
        let mut failures = Vec::new();
        for key in keys {
            if key.is_empty() || key.len() > 1024 {
                failures.push(DeleteFailure {
                    key,
                    code: "XMinioInvalidObjectName",
                    message: "Object name contains unsupported characters or is too long."
                        .to_string(),
                });
                continue;
            }
            match engine.delete_object(&bucket, &key) {
                Ok(()) => deleted.push(key),
                Err(EngineError::Internal(err)) => {
                    tracing::warn!(%bucket, %key, "delete failed: {err:#}");
                    failures.push(DeleteFailure {
                        key,
                        code: "InternalError",
                        message: "We encountered an internal error, please try again.".to_string(),
                    });
                }
                Err(err) => {
                    let err = S3Error::from(err);
                    failures.push(DeleteFailure {
                        key,
                        code: err.code(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok((deleted, failures))
    })
    .await?;

    let body = xml::render_delete_result(&deleted, &failures, quiet);
    Ok(xml_response(StatusCode::OK, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::dispatch;
    use crate::routes::Operation;
    use crate::test_support::{op, read_body, test_state};

    #[test]
    fn test_validate_policy() {
        assert!(validate_policy(&Bytes::from_static(br#"{"Version":"2012-10-17"}"#)).is_ok());
        assert!(matches!(
            validate_policy(&Bytes::from_static(b"[1,2]")),
            Err(S3Error::MalformedPolicy)
        ));
        assert!(matches!(
            validate_policy(&Bytes::from_static(b"not json")),
            Err(S3Error::MalformedPolicy)
        ));
        assert!(matches!(validate_policy(&Bytes::new()), Err(S3Error::MalformedPolicy)));
    }

    #[tokio::test]
    async fn test_bucket_lifecycle() {
        let state = test_state();

        let resp = dispatch(state.clone(), op(Operation::PutBucket, "photos", "", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("location").unwrap(), "/photos");

        let err = dispatch(state.clone(), op(Operation::PutBucket, "photos", "", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, S3Error::BucketAlreadyExists { .. }));

        let resp = dispatch(state.clone(), op(Operation::HeadBucket, "photos", "", "")).await.unwrap();
        assert_eq!(resp.headers().get("x-amz-bucket-region").unwrap(), "us-east-1");

        let resp = dispatch(state.clone(), op(Operation::ListBuckets, "", "", "")).await.unwrap();
        let body = read_body(resp).await;
        assert!(body.contains("<Name>photos</Name>"));

        let resp = dispatch(state.clone(), op(Operation::DeleteBucket, "photos", "", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let err = dispatch(state, op(Operation::HeadBucket, "photos", "", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, S3Error::NoSuchBucket { .. }));
    }

    #[tokio::test]
    async fn test_invalid_bucket_name_rejected() {
        let state = test_state();
        let err = dispatch(state, op(Operation::PutBucket, "Bad_Name", "", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, S3Error::InvalidBucketName { .. }));
    }

    #[tokio::test]
    async fn test_location_is_empty_for_default_region() {
        let state = test_state();
        dispatch(state.clone(), op(Operation::PutBucket, "photos", "", "")).await.unwrap();
        let resp = dispatch(state, op(Operation::GetBucketLocation, "photos", "", "location="))
            .await
            .unwrap();
        let body = read_body(resp).await;
        assert!(body.contains("<LocationConstraint"));
        assert!(!body.contains("us-east-1"));
    }

    #[tokio::test]
    async fn test_policy_roundtrip() {
        let state = test_state();
        dispatch(state.clone(), op(Operation::PutBucket, "photos", "", "")).await.unwrap();

        let err = dispatch(state.clone(), op(Operation::GetBucketPolicy, "photos", "", "policy="))
            .await
            .unwrap_err();
        assert!(matches!(err, S3Error::NoSuchBucketPolicy { .. }));

        let mut put = op(Operation::PutBucketPolicy, "photos", "", "policy=");
        put.body = Bytes::from_static(br#"{"Statement":[]}"#);
        let resp = dispatch(state.clone(), put).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = dispatch(state.clone(), op(Operation::GetBucketPolicy, "photos", "", "policy="))
            .await
            .unwrap();
        assert_eq!(resp.headers().get("content-type").unwrap(), "application/json");
        assert_eq!(read_body(resp).await, r#"{"Statement":[]}"#);

        dispatch(state.clone(), op(Operation::DeleteBucketPolicy, "photos", "", "policy="))
            .await
            .unwrap();
        assert!(dispatch(state, op(Operation::GetBucketPolicy, "photos", "", "policy="))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_list_objects_with_delimiter() {
        let state = test_state();
        dispatch(state.clone(), op(Operation::PutBucket, "photos", "", "")).await.unwrap();
        for key in ["a.txt", "dir/b.txt", "dir/c.txt"] {
            let mut put = op(Operation::PutObject, "photos", key, "");
            put.body = Bytes::from_static(b"x");
            dispatch(state.clone(), put).await.unwrap();
        }

        let resp = dispatch(state, op(Operation::ListObjects, "photos", "", "delimiter=/&max-keys=10"))
            .await
            .unwrap();
        let body = read_body(resp).await;
        assert!(body.contains("<Key>a.txt</Key>"));
        assert!(body.contains("<Prefix>dir/</Prefix>"));
        assert!(!body.contains("<Key>dir/b.txt</Key>"));
        assert!(body.contains("<MaxKeys>10</MaxKeys>"));
    }

    #[tokio::test]
    async fn test_delete_multiple_objects() {
        let state = test_state();
        dispatch(state.clone(), op(Operation::PutBucket, "photos", "", "")).await.unwrap();
        let mut put = op(Operation::PutObject, "photos", "a.txt", "");
        put.body = Bytes::from_static(b"x");
        dispatch(state.clone(), put).await.unwrap();

        let mut del = op(Operation::DeleteMultipleObjects, "photos", "", "delete=");
        del.body = Bytes::from_static(
            b"<Delete><Object><Key>a.txt</Key></Object><Object><Key>missing</Key></Object></Delete>",
        );
        let resp = dispatch(state.clone(), del).await.unwrap();
        let body = read_body(resp).await;
        assert!(body.contains("<Deleted><Key>a.txt</Key></Deleted>"));
        assert!(body.contains("<Deleted><Key>missing</Key></Deleted>"));

        let mut bad = op(Operation::DeleteMultipleObjects, "photos", "", "delete=");
        bad.body = Bytes::from_static(b"<nope/>");
        assert!(matches!(
            dispatch(state, bad).await.unwrap_err(),
            S3Error::MalformedXML
        ));
    }

    #[tokio::test]
    async fn test_post_policy_not_implemented() {
        let state = test_state();
        let err = dispatch(state, op(Operation::PostPolicy, "photos", "", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, S3Error::NotImplemented));
    }
}
