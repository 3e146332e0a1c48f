//! Storage engine collaborator.
//!
//! The gateway never touches bytes on disk itself: after routing and
//! validation every operation is handed to a [`StorageEngine`].  The
//! trait is synchronous; handlers run it on the blocking pool so a slow
//! engine only ever stalls its own request.

pub mod memory;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::errors::S3Error;

pub use memory::MemoryEngine;

/// Failure reported by a storage engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bucket {0} does not exist")]
    BucketNotFound(String),
    #[error("object {bucket}/{key} does not exist")]
    ObjectNotFound { bucket: String, key: String },
    #[error("upload {0} does not exist")]
    UploadNotFound(String),
    #[error("bucket {0} has no policy")]
    PolicyNotFound(String),
    #[error("bucket {0} already exists")]
    BucketExists(String),
    #[error("bucket {0} is not empty")]
    BucketNotEmpty(String),
    #[error("{0}")]
    InvalidPart(String),
    #[error("parts are not in ascending order")]
    InvalidPartOrder,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<EngineError> for S3Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::BucketNotFound(bucket) => S3Error::NoSuchBucket { bucket },
            EngineError::ObjectNotFound { key, .. } => S3Error::NoSuchKey { key },
            EngineError::UploadNotFound(upload_id) => S3Error::NoSuchUpload { upload_id },
            EngineError::PolicyNotFound(bucket) => S3Error::NoSuchBucketPolicy { bucket },
            EngineError::BucketExists(bucket) => S3Error::BucketAlreadyExists { bucket },
            EngineError::BucketNotEmpty(bucket) => S3Error::BucketNotEmpty { bucket },
            EngineError::InvalidPart(message) => S3Error::InvalidPart { message },
            EngineError::InvalidPartOrder => S3Error::InvalidPartOrder,
            EngineError::Internal(err) => S3Error::InternalError(err),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A bucket as listed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub created: DateTime<Utc>,
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    /// Quoted-free hex ETag.
    pub etag: String,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

/// Body and attributes for a new object.
#[derive(Debug, Clone, Default)]
pub struct PutObjectInput {
    pub data: Bytes,
    pub content_type: String,
    /// `x-amz-meta-*` headers, lowercase names.
    pub metadata: BTreeMap<String, String>,
}

/// Content type and user metadata given to the copy destination when the
/// request replaces the source's.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
}

/// ListObjects (v1) parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsParams {
    pub prefix: String,
    pub marker: String,
    pub delimiter: String,
    pub max_keys: usize,
}

/// One page of a bucket listing.
#[derive(Debug, Clone, Default)]
pub struct ListObjectsPage {
    pub objects: Vec<ObjectInfo>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

/// A stored part of an in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One page of ListObjectParts.
#[derive(Debug, Clone, Default)]
pub struct ListPartsPage {
    pub parts: Vec<PartInfo>,
    pub is_truncated: bool,
    pub next_part_number_marker: Option<u32>,
}

/// A part reference from a CompleteMultipartUpload body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// An in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadInfo {
    pub key: String,
    pub upload_id: String,
    pub initiated: DateTime<Utc>,
}

/// One method per supported bucket/object action.
pub trait StorageEngine: Send + Sync + 'static {
    fn list_buckets(&self) -> EngineResult<Vec<BucketInfo>>;

    fn make_bucket(&self, bucket: &str) -> EngineResult<()>;

    fn head_bucket(&self, bucket: &str) -> EngineResult<BucketInfo>;

    /// Fails with [`EngineError::BucketNotEmpty`] while objects remain.
    fn delete_bucket(&self, bucket: &str) -> EngineResult<()>;

    fn get_bucket_policy(&self, bucket: &str) -> EngineResult<Bytes>;

    fn put_bucket_policy(&self, bucket: &str, policy: Bytes) -> EngineResult<()>;

    fn delete_bucket_policy(&self, bucket: &str) -> EngineResult<()>;

    fn list_objects(&self, bucket: &str, params: &ListObjectsParams)
        -> EngineResult<ListObjectsPage>;

    fn put_object(&self, bucket: &str, key: &str, input: PutObjectInput) -> EngineResult<ObjectInfo>;

    fn get_object(&self, bucket: &str, key: &str) -> EngineResult<(ObjectInfo, Bytes)>;

    fn head_object(&self, bucket: &str, key: &str) -> EngineResult<ObjectInfo>;

    /// Copy the source's body.  The destination keeps the source's content
    /// type and metadata unless `replace` supplies new ones.
    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        replace: Option<ObjectAttributes>,
    ) -> EngineResult<ObjectInfo>;

    /// Deleting a missing key succeeds, as in S3.
    fn delete_object(&self, bucket: &str, key: &str) -> EngineResult<()>;

    /// Returns the new upload id.
    fn new_multipart_upload(&self, bucket: &str, key: &str, content_type: &str)
        -> EngineResult<String>;

    fn put_object_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> EngineResult<PartInfo>;

    fn list_object_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: usize,
    ) -> EngineResult<ListPartsPage>;

    fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> EngineResult<ObjectInfo>;

    fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> EngineResult<()>;

    fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        max_uploads: usize,
    ) -> EngineResult<Vec<UploadInfo>>;
}
