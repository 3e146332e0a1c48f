//! S3-compatible error types.
//!
//! Every variant maps to a well-known S3 error code.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(S3Error::NoSuchBucket { .. })`; the gateway entry point
//! uses [`S3Error::to_response`] to fill in the resource and request id.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::xml::render_error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// S3 error codes expressed as a Rust enum.
#[derive(Debug, Error)]
pub enum S3Error {
    /// The specified bucket does not exist.
    #[error("The specified bucket does not exist")]
    NoSuchBucket { bucket: String },

    /// The specified key does not exist.
    #[error("The specified key does not exist.")]
    NoSuchKey { key: String },

    /// The specified multipart upload does not exist.
    #[error("The specified upload does not exist. The upload ID may be invalid, or the upload may have been aborted or completed.")]
    NoSuchUpload { upload_id: String },

    /// The bucket has no policy attached.
    #[error("The bucket policy does not exist")]
    NoSuchBucketPolicy { bucket: String },

    /// A bucket with the requested name already exists.
    #[error("The requested bucket name is not available. The bucket namespace is shared by all users of the system. Please select a different name and try again.")]
    BucketAlreadyExists { bucket: String },

    /// The bucket you tried to delete is not empty.
    #[error("The bucket you tried to delete is not empty")]
    BucketNotEmpty { bucket: String },

    /// Access denied.
    #[error("{message}")]
    AccessDenied { message: String },

    /// The reserved console namespace was addressed with a non-console request.
    #[error("All access to this bucket has been disabled.")]
    AllAccessDisabled,

    /// A cross-origin request from an origin that is not allowed.
    #[error("CORSResponse: This CORS request is not allowed.")]
    CorsForbidden,

    /// A request argument is invalid.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// The request signature does not match.
    #[error("The request signature we calculated does not match the signature you provided. Check your key and signing method.")]
    SignatureDoesNotMatch,

    /// Only AWS Signature Version 4 is accepted.
    #[error("The authorization mechanism you have provided is not supported. Please use AWS4-HMAC-SHA256.")]
    SignatureVersionNotSupported,

    /// `x-amz-content-sha256` does not match the received body.
    #[error("The provided 'x-amz-content-sha256' header does not match what was computed.")]
    ContentSha256Mismatch,

    /// Invalid access key ID.
    #[error("The access key ID you provided does not exist in our records.")]
    InvalidAccessKeyId,

    /// The request timestamp is missing or too far from server time.
    #[error("The difference between the request time and the server's time is too large.")]
    RequestTimeTooSkewed,

    /// The date header could not be parsed.
    #[error("Invalid date format header, expected to be in ISO8601, RFC1123 or RFC1123Z time format.")]
    MalformedDate,

    /// An invalid bucket name was provided.
    #[error("The specified bucket is not valid.")]
    InvalidBucketName { name: String },

    /// An invalid object name was provided.
    #[error("Object name contains unsupported characters or is too long.")]
    InvalidObjectName { key: String },

    /// The `x-amz-copy-source` header is malformed.
    #[error("{message}")]
    InvalidCopySource { message: String },

    /// Invalid part in multipart upload.
    #[error("{message}")]
    InvalidPart { message: String },

    /// Invalid part order in CompleteMultipartUpload.
    #[error("The list of parts was not in ascending order. Parts must be ordered by part number.")]
    InvalidPartOrder,

    /// Malformed XML in request body.
    #[error("The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedXML,

    /// Bucket policy body is not a JSON document.
    #[error("Policy has invalid resource.")]
    MalformedPolicy,

    /// A query-string sub-resource the gateway does not serve.
    #[error("The {resource} sub-resource is not supported by this gateway.")]
    UnsupportedResource { resource: String },

    /// No registered route matches the request.
    #[error("The requested resource could not be found.")]
    NoSuchRoute,

    /// Feature not implemented.
    #[error("A header you provided implies functionality that is not implemented")]
    NotImplemented,

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error, please try again.")]
    InternalError(#[from] anyhow::Error),
}

impl S3Error {
    /// Return the S3 XML error code string.
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::NoSuchBucket { .. } => "NoSuchBucket",
            S3Error::NoSuchKey { .. } => "NoSuchKey",
            S3Error::NoSuchUpload { .. } => "NoSuchUpload",
            S3Error::NoSuchBucketPolicy { .. } => "NoSuchBucketPolicy",
            S3Error::BucketAlreadyExists { .. } => "BucketAlreadyExists",
            S3Error::BucketNotEmpty { .. } => "BucketNotEmpty",
            S3Error::AccessDenied { .. } => "AccessDenied",
            S3Error::AllAccessDisabled => "AllAccessDisabled",
            S3Error::CorsForbidden => "AccessForbidden",
            S3Error::InvalidArgument { .. } => "InvalidArgument",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::SignatureVersionNotSupported => "SignatureVersionNotSupported",
            S3Error::ContentSha256Mismatch => "XAmzContentSHA256Mismatch",
            S3Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            S3Error::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            S3Error::MalformedDate => "MalformedDate",
            S3Error::InvalidBucketName { .. } => "InvalidBucketName",
            S3Error::InvalidObjectName { .. } => "XMinioInvalidObjectName",
            S3Error::InvalidCopySource { .. } => "InvalidArgument",
            S3Error::InvalidPart { .. } => "InvalidPart",
            S3Error::InvalidPartOrder => "InvalidPartOrder",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::MalformedPolicy => "MalformedPolicy",
            S3Error::UnsupportedResource { .. } => "InvalidRequest",
            S3Error::NoSuchRoute => "NotFound",
            S3Error::NotImplemented => "NotImplemented",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::NoSuchBucket { .. }
            | S3Error::NoSuchKey { .. }
            | S3Error::NoSuchUpload { .. }
            | S3Error::NoSuchBucketPolicy { .. }
            | S3Error::NoSuchRoute => StatusCode::NOT_FOUND,
            S3Error::BucketAlreadyExists { .. } | S3Error::BucketNotEmpty { .. } => {
                StatusCode::CONFLICT
            }
            S3Error::AccessDenied { .. }
            | S3Error::AllAccessDisabled
            | S3Error::CorsForbidden
            | S3Error::SignatureDoesNotMatch
            | S3Error::InvalidAccessKeyId
            | S3Error::RequestTimeTooSkewed => StatusCode::FORBIDDEN,
            S3Error::InvalidArgument { .. }
            | S3Error::SignatureVersionNotSupported
            | S3Error::ContentSha256Mismatch
            | S3Error::MalformedDate
            | S3Error::InvalidBucketName { .. }
            | S3Error::InvalidObjectName { .. }
            | S3Error::InvalidCopySource { .. }
            | S3Error::InvalidPart { .. }
            | S3Error::InvalidPartOrder
            | S3Error::MalformedXML
            | S3Error::MalformedPolicy
            | S3Error::UnsupportedResource { .. } => StatusCode::BAD_REQUEST,
            S3Error::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error belongs to the authentication-failure class.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            S3Error::AccessDenied { .. }
                | S3Error::SignatureDoesNotMatch
                | S3Error::SignatureVersionNotSupported
                | S3Error::InvalidAccessKeyId
                | S3Error::RequestTimeTooSkewed
        )
    }

    /// Render the XML error response for `resource`, tagged with `request_id`.
    pub fn to_response(&self, resource: &str, request_id: &str) -> Response {
        if let S3Error::InternalError(err) = self {
            tracing::error!(request_id, resource, "internal error: {err:#}");
        }

        let body = render_error(self.code(), &self.to_string(), resource, request_id);
        (
            self.status_code(),
            [
                ("content-type", "application/xml".to_string()),
                ("x-amz-request-id", request_id.to_string()),
            ],
            body,
        )
            .into_response()
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        self.to_response("", &generate_request_id())
    }
}
