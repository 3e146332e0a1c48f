//! Multipart upload handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use super::{quoted_etag, with_engine, xml_response, OperationRequest};
use crate::errors::S3Error;
use crate::xml;
use crate::AppState;

/// `POST /{bucket}/{key}?uploads` -- start an upload.
pub async fn new_multipart_upload(
    state: Arc<AppState>,
    op: &OperationRequest,
) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let key = op.key()?.to_string();
    let content_type = op
        .header("content-type")
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();

    let upload_id = {
        let (bucket, key) = (bucket.clone(), key.clone());
        with_engine(&state, move |engine| {
            engine.new_multipart_upload(&bucket, &key, &content_type)
        })
        .await?
    };
    tracing::debug!(%bucket, %key, %upload_id, "multipart upload initiated");

    let body = xml::render_initiate_multipart_upload_result(&bucket, &key, &upload_id);
    Ok(xml_response(StatusCode::OK, body))
}

/// `PUT /{bucket}/{key}?partNumber=N&uploadId=ID`
pub async fn upload_part(state: Arc<AppState>, op: &OperationRequest) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let key = op.key()?.to_string();
    let part_number = op.part_number()?;
    let upload_id = op.upload_id().to_string();
    let data = op.body.clone();

    let part = with_engine(&state, move |engine| {
        engine.put_object_part(&bucket, &key, &upload_id, part_number, data)
    })
    .await?;

    Ok((StatusCode::OK, [("etag", quoted_etag(&part.etag))]).into_response())
}

/// `GET /{bucket}/{key}?uploadId=ID`
pub async fn list_object_parts(
    state: Arc<AppState>,
    op: &OperationRequest,
) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let key = op.key()?.to_string();
    let upload_id = op.upload_id().to_string();
    let max_parts = op.page_size("max-parts")?;
    let marker = match op.query_value("part-number-marker") {
        None | Some("") => 0,
        Some(raw) => raw.parse::<u32>().map_err(|_| S3Error::InvalidArgument {
            message: "Argument part-number-marker must be an integer.".to_string(),
        })?,
    };

    let page = {
        let (bucket, key, upload_id) = (bucket.clone(), key.clone(), upload_id.clone());
        with_engine(&state, move |engine| {
            engine.list_object_parts(&bucket, &key, &upload_id, marker, max_parts)
        })
        .await?
    };

    let body = xml::render_list_parts_result(&bucket, &key, &upload_id, marker, max_parts, &page);
    Ok(xml_response(StatusCode::OK, body))
}

/// `POST /{bucket}/{key}?uploadId=ID`
pub async fn complete_multipart_upload(
    state: Arc<AppState>,
    op: &OperationRequest,
) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let key = op.key()?.to_string();
    let upload_id = op.upload_id().to_string();
    let parts = xml::parse_complete_multipart_upload(&op.body)?;

    let info = {
        let (bucket, key) = (bucket.clone(), key.clone());
        with_engine(&state, move |engine| {
            engine.complete_multipart_upload(&bucket, &key, &upload_id, &parts)
        })
        .await?
    };

    let location = format!("/{bucket}/{key}");
    let body = xml::render_complete_multipart_upload_result(&location, &bucket, &key, &info.etag);
    Ok(xml_response(StatusCode::OK, body))
}

/// `DELETE /{bucket}/{key}?uploadId=ID`
pub async fn abort_multipart_upload(
    state: Arc<AppState>,
    op: &OperationRequest,
) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let key = op.key()?.to_string();
    let upload_id = op.upload_id().to_string();

    with_engine(&state, move |engine| {
        engine.abort_multipart_upload(&bucket, &key, &upload_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /{bucket}?uploads`
pub async fn list_multipart_uploads(
    state: Arc<AppState>,
    op: &OperationRequest,
) -> Result<Response, S3Error> {
    let bucket = op.bucket()?.to_string();
    let prefix = op.query_value("prefix").unwrap_or("").to_string();
    let max_uploads = op.page_size("max-uploads")?;

    let uploads = {
        let (bucket, prefix) = (bucket.clone(), prefix.clone());
        with_engine(&state, move |engine| {
            engine.list_multipart_uploads(&bucket, &prefix, max_uploads)
        })
        .await?
    };

    let body = xml::render_list_multipart_uploads_result(&bucket, &prefix, max_uploads, &uploads);
    Ok(xml_response(StatusCode::OK, body))
}
