//! Per-request state threaded through the pipeline and into dispatch.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;

use crate::auth::Identity;
use crate::routes::Operation;

/// Which of the two route tables a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Bucket and object operations.
    Storage,
    /// Everything under the reserved console prefix.
    Console,
}

impl Surface {
    /// Classify `path` by the console `prefix` (e.g. `/minio`).
    ///
    /// `/minio` and `/minio/...` are console paths; `/minioextra` is a bucket.
    /// The comparison is made on the percent-decoded path, so `/%6Dinio` is
    /// a console path too.
    pub fn classify(path: &str, prefix: &str) -> Self {
        let decoded = percent_decode_str(path).decode_utf8_lossy();
        match decoded.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => Surface::Console,
            _ => Surface::Storage,
        }
    }
}

/// Mutable state owned by a single request for its whole lifetime.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    /// Server time the request was received; the time-validity and
    /// presigned-expiry checks are measured against it.
    pub received_at: DateTime<Utc>,
    pub surface: Surface,
    /// Console route resolved by the privileged-prefix gate.
    pub console_operation: Option<Operation>,
    /// Percent-decoded bucket name, if the path names one.
    pub bucket: Option<String>,
    /// Percent-decoded object key, if the path names one.
    pub key: Option<String>,
    /// Headers stages want added to whatever response is finally produced.
    pub response_headers: HeaderMap,
    identity: Option<Identity>,
}

impl RequestContext {
    pub fn new(request_id: String, received_at: DateTime<Utc>, surface: Surface) -> Self {
        Self {
            request_id,
            received_at,
            surface,
            console_operation: None,
            bucket: None,
            key: None,
            response_headers: HeaderMap::new(),
            identity: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Record the authenticated caller.  Returns `false`, leaving the
    /// existing identity in place, if one was already set.
    pub fn set_identity(&mut self, identity: Identity) -> bool {
        if self.identity.is_some() {
            return false;
        }
        self.identity = Some(identity);
        true
    }

    /// Value for the `<Resource>` element of error responses.
    pub fn resource(&self, path: &str) -> String {
        match (&self.bucket, &self.key) {
            (Some(bucket), Some(key)) => format!("/{bucket}/{key}"),
            (Some(bucket), None) => format!("/{bucket}"),
            _ => path.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMethod;

    fn identity(key: &str) -> Identity {
        Identity {
            access_key: key.to_string(),
            region: "us-east-1".to_string(),
            method: AuthMethod::Header,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(Surface::classify("/minio", "/minio"), Surface::Console);
        assert_eq!(Surface::classify("/minio/", "/minio"), Surface::Console);
        assert_eq!(Surface::classify("/minio/rpc", "/minio"), Surface::Console);
        assert_eq!(Surface::classify("/minioextra", "/minio"), Surface::Storage);
        assert_eq!(Surface::classify("/photos/minio", "/minio"), Surface::Storage);
        assert_eq!(Surface::classify("/", "/minio"), Surface::Storage);
        assert_eq!(Surface::classify("/%6Dinio", "/minio"), Surface::Console);
        assert_eq!(Surface::classify("/%6dinio/obj.txt", "/minio"), Surface::Console);
        assert_eq!(Surface::classify("/%6Dinioextra", "/minio"), Surface::Storage);
    }

    #[test]
    fn test_identity_is_set_once() {
        let mut ctx = RequestContext::new("ID".into(), Utc::now(), Surface::Storage);
        assert!(ctx.identity().is_none());
        assert!(ctx.set_identity(identity("first")));
        assert!(!ctx.set_identity(identity("second")));
        assert_eq!(ctx.identity().unwrap().access_key, "first");
    }

    #[test]
    fn test_resource() {
        let mut ctx = RequestContext::new("ID".into(), Utc::now(), Surface::Storage);
        assert_eq!(ctx.resource("/"), "/");
        ctx.bucket = Some("photos".into());
        assert_eq!(ctx.resource("/photos"), "/photos");
        ctx.key = Some("a b.txt".into());
        assert_eq!(ctx.resource("/photos/a%20b.txt"), "/photos/a b.txt");
    }
}
