//! Storage client used by the console's RPC service.
//!
//! Console procedures never touch the engine directly; they issue ordinary
//! signed S3 requests back through the gateway, so every console action
//! passes the same pipeline and handlers as any other client.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, Request};
use bytes::Bytes;
use chrono::Utc;
use tracing::debug;

use crate::auth::{s3_uri_encode, SigningContext};
use crate::xml::{ErrorDocument, ListAllMyBucketsResult, ListBucketResult};

/// Boxed future returned by [`StorageClient`] methods.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// The storage calls the console needs.
pub trait StorageClient: Send + Sync + 'static {
    fn list_buckets(&self) -> ClientFuture<'_, ListAllMyBucketsResult>;

    fn make_bucket(&self, bucket: &str) -> ClientFuture<'_, ()>;

    fn list_objects(&self, bucket: &str, prefix: &str) -> ClientFuture<'_, ListBucketResult>;

    fn remove_object(&self, bucket: &str, key: &str) -> ClientFuture<'_, ()>;
}

/// [`StorageClient`] that signs every request with the shared
/// [`SigningContext`] and sends it with `reqwest`.
pub struct SignedClient {
    http: reqwest::Client,
    /// `scheme://host:port` of the gateway listener.
    endpoint: String,
    signing: Arc<SigningContext>,
}

impl SignedClient {
    pub fn new(endpoint: impl Into<String>, signing: Arc<SigningContext>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            signing,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one signed request and return the body of a 2xx response.
    /// Error documents become `anyhow` errors carrying the S3 code.
    async fn send(&self, method: Method, path: &str, query: &str) -> anyhow::Result<Bytes> {
        let uri = if query.is_empty() {
            format!("{}{path}", self.endpoint)
        } else {
            format!("{}{path}?{query}", self.endpoint)
        };

        let mut req = Request::builder()
            .method(method.clone())
            .uri(&uri)
            .body(Bytes::new())?;
        self.signing.sign(&mut req, Utc::now())?;
        let req = reqwest::Request::try_from(req)?;

        debug!(%method, uri, "console storage call");
        let resp = self
            .http
            .execute(req)
            .await
            .map_err(|e| anyhow::anyhow!("storage request failed: {e}"))?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(match quick_xml::de::from_str::<ErrorDocument>(&text) {
                Ok(doc) => anyhow::anyhow!("{}: {}", doc.code, doc.message),
                Err(_) => anyhow::anyhow!("storage request failed with status {status}"),
            });
        }
        Ok(body)
    }
}

/// Path of `bucket`, or of `key` inside it, as sent on the wire.
pub fn object_path(bucket: &str, key: Option<&str>) -> String {
    match key {
        Some(key) => format!("/{}/{}", s3_uri_encode(bucket, true), s3_uri_encode(key, false)),
        None => format!("/{}", s3_uri_encode(bucket, true)),
    }
}

impl StorageClient for SignedClient {
    fn list_buckets(&self) -> ClientFuture<'_, ListAllMyBucketsResult> {
        Box::pin(async move {
            let body = self.send(Method::GET, "/", "").await?;
            let text = String::from_utf8_lossy(&body);
            Ok(quick_xml::de::from_str(&text)?)
        })
    }

    fn make_bucket(&self, bucket: &str) -> ClientFuture<'_, ()> {
        let path = object_path(bucket, None);
        Box::pin(async move {
            self.send(Method::PUT, &path, "").await?;
            Ok(())
        })
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> ClientFuture<'_, ListBucketResult> {
        let path = object_path(bucket, None);
        let query = format!("delimiter=%2F&prefix={}", s3_uri_encode(prefix, true));
        Box::pin(async move {
            let body = self.send(Method::GET, &path, &query).await?;
            let text = String::from_utf8_lossy(&body);
            Ok(quick_xml::de::from_str(&text)?)
        })
    }

    fn remove_object(&self, bucket: &str, key: &str) -> ClientFuture<'_, ()> {
        let path = object_path(bucket, Some(key));
        Box::pin(async move {
            self.send(Method::DELETE, &path, "").await?;
            Ok(())
        })
    }
}
