//! Ordered route tables.
//!
//! S3 multiplexes many operations onto the same method and path, told
//! apart only by query keys (`?uploads`, `?uploadId`, `?policy`) or by
//! headers (`x-amz-copy-source`).  A [`RouteTable`] is therefore an ordered
//! list of [`RoutePattern`]s evaluated top to bottom: the first pattern
//! whose method, path template, query predicates and header predicates all
//! hold wins.  Narrow, predicate-bearing patterns are registered before the
//! generic fallback for the same method and path.
//!
//! Path templates use `{name}` and `{name:regex}` captures, e.g.
//! `/{bucket}/{object:.+}`.  A capture without a pattern matches one path
//! segment.

use axum::http::{HeaderMap, HeaderName, Method};
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::errors::S3Error;

/// Failure to compile a route table; fatal at startup.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("unbalanced braces in template {0:?}")]
    UnbalancedBraces(String),
    #[error("capture without a name in template {0:?}")]
    UnnamedCapture(String),
    #[error("invalid pattern in template {template:?}: {source}")]
    InvalidPattern {
        template: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),
}

// ── Operations ──────────────────────────────────────────────────────

/// Every logical operation a request can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    // Object path.
    HeadObject,
    UploadPart,
    ListObjectParts,
    CompleteMultipartUpload,
    NewMultipartUpload,
    AbortMultipartUpload,
    GetObject,
    CopyObject,
    PutObject,
    DeleteObject,
    // Bucket path.
    GetBucketLocation,
    GetBucketPolicy,
    ListMultipartUploads,
    ListObjects,
    PutBucketPolicy,
    PutBucket,
    HeadBucket,
    PostPolicy,
    DeleteMultipleObjects,
    DeleteBucketPolicy,
    DeleteBucket,
    // Root.
    ListBuckets,
    // Console.
    ConsoleRpc,
    ConsoleAsset,
    ConsoleIndex,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::HeadObject => "HeadObject",
            Operation::UploadPart => "UploadPart",
            Operation::ListObjectParts => "ListObjectParts",
            Operation::CompleteMultipartUpload => "CompleteMultipartUpload",
            Operation::NewMultipartUpload => "NewMultipartUpload",
            Operation::AbortMultipartUpload => "AbortMultipartUpload",
            Operation::GetObject => "GetObject",
            Operation::CopyObject => "CopyObject",
            Operation::PutObject => "PutObject",
            Operation::DeleteObject => "DeleteObject",
            Operation::GetBucketLocation => "GetBucketLocation",
            Operation::GetBucketPolicy => "GetBucketPolicy",
            Operation::ListMultipartUploads => "ListMultipartUploads",
            Operation::ListObjects => "ListObjects",
            Operation::PutBucketPolicy => "PutBucketPolicy",
            Operation::PutBucket => "PutBucket",
            Operation::HeadBucket => "HeadBucket",
            Operation::PostPolicy => "PostPolicy",
            Operation::DeleteMultipleObjects => "DeleteMultipleObjects",
            Operation::DeleteBucketPolicy => "DeleteBucketPolicy",
            Operation::DeleteBucket => "DeleteBucket",
            Operation::ListBuckets => "ListBuckets",
            Operation::ConsoleRpc => "ConsoleRpc",
            Operation::ConsoleAsset => "ConsoleAsset",
            Operation::ConsoleIndex => "ConsoleIndex",
        }
    }

    /// Operations served without an authenticated identity.
    pub fn is_public(&self) -> bool {
        matches!(self, Operation::ConsoleAsset | Operation::ConsoleIndex)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Path templates ──────────────────────────────────────────────────

/// A compiled `{name:regex}` path template.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    template: String,
    regex: Regex,
    names: Vec<String>,
}

impl PathTemplate {
    /// Compile `template`.  Literal text is matched exactly; a trailing `/`
    /// is tolerated on every template except the root.
    pub fn parse(template: &str) -> Result<Self, RouteError> {
        let mut pattern = String::from("^");
        let mut names = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            if c == '}' {
                return Err(RouteError::UnbalancedBraces(template.to_string()));
            }
            if c != '{' {
                literal.push(c);
                continue;
            }

            pattern.push_str(&regex::escape(&literal));
            literal.clear();

            // Read up to the matching brace; quantifiers like `{2}` nest.
            let mut depth = 1;
            let mut capture = String::new();
            for c in chars.by_ref() {
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                capture.push(c);
            }
            if depth != 0 {
                return Err(RouteError::UnbalancedBraces(template.to_string()));
            }

            let (name, re) = capture.split_once(':').unwrap_or((&capture, "[^/]+"));
            if name.is_empty() {
                return Err(RouteError::UnnamedCapture(template.to_string()));
            }
            pattern.push_str(&format!("(?P<{name}>{re})"));
            names.push(name.to_string());
        }
        pattern.push_str(&regex::escape(&literal));
        if template != "/" {
            pattern.push_str("/?");
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|source| RouteError::InvalidPattern {
            template: template.to_string(),
            source,
        })?;
        Ok(Self {
            template: template.to_string(),
            regex,
            names,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Match a raw (still percent-encoded) path, returning the captures
    /// as they appear in it.
    pub fn captures(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let caps = self.regex.captures(path)?;
        Some(
            self.names
                .iter()
                .map(|name| {
                    let raw = caps.name(name).map(|m| m.as_str()).unwrap_or("");
                    (name.clone(), raw.to_string())
                })
                .collect(),
        )
    }
}

/// Percent-decode a path capture.  Bytes that do not form UTF-8 fail the
/// request instead of being replaced.
fn decode_capture(name: &str, raw: &str) -> Result<String, S3Error> {
    match percent_decode_str(raw).decode_utf8() {
        Ok(decoded) => Ok(decoded.into_owned()),
        Err(_) if name == "bucket" => Err(S3Error::InvalidBucketName {
            name: raw.to_string(),
        }),
        Err(_) => Err(S3Error::InvalidObjectName {
            key: raw.to_string(),
        }),
    }
}

// ── Predicates ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum QueryPredicate {
    /// The key must be present, with any value.
    Present,
    /// The value must equal this literal.
    Equals(String),
    /// The value must match and is captured under `name`.
    Capture { name: String, regex: Regex },
}

#[derive(Debug, Clone)]
struct HeaderPredicate {
    name: HeaderName,
    regex: Regex,
}

/// Method + path template + query and header predicates, bound to one
/// operation.  Immutable once registered.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    method: Method,
    path: PathTemplate,
    queries: Vec<(String, QueryPredicate)>,
    headers: Vec<HeaderPredicate>,
    operation: Operation,
}

impl RoutePattern {
    pub fn new(method: Method, template: &str, operation: Operation) -> Result<Self, RouteError> {
        Ok(Self {
            method,
            path: PathTemplate::parse(template)?,
            queries: Vec::new(),
            headers: Vec::new(),
            operation,
        })
    }

    /// Require query key `key`.  An empty `value` only requires presence,
    /// `{name}`/`{name:regex}` captures the value, anything else must match
    /// literally.
    pub fn query(mut self, key: &str, value: &str) -> Result<Self, RouteError> {
        let predicate = if value.is_empty() {
            QueryPredicate::Present
        } else if let Some(inner) = value.strip_prefix('{').and_then(|v| v.strip_suffix('}')) {
            let (name, re) = inner.split_once(':').unwrap_or((inner, ".*"));
            if name.is_empty() {
                return Err(RouteError::UnnamedCapture(value.to_string()));
            }
            let regex = Regex::new(&format!("^(?:{re})$")).map_err(|source| {
                RouteError::InvalidPattern {
                    template: value.to_string(),
                    source,
                }
            })?;
            QueryPredicate::Capture {
                name: name.to_string(),
                regex,
            }
        } else {
            QueryPredicate::Equals(value.to_string())
        };
        self.queries.push((key.to_string(), predicate));
        Ok(self)
    }

    /// Require header `name` to be present with a value matching `pattern`
    /// anywhere (the regex is not anchored).
    pub fn header(mut self, name: &str, pattern: &str) -> Result<Self, RouteError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RouteError::InvalidHeaderName(name.to_string()))?;
        let regex = Regex::new(pattern).map_err(|source| RouteError::InvalidPattern {
            template: pattern.to_string(),
            source,
        })?;
        self.headers.push(HeaderPredicate { name, regex });
        Ok(self)
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn template(&self) -> &str {
        self.path.as_str()
    }

    fn matches(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        headers: &HeaderMap,
    ) -> Option<Result<BTreeMap<String, String>, S3Error>> {
        if &self.method != method {
            return None;
        }
        let raw = self.path.captures(path)?;

        let mut captured = Vec::new();
        for (key, predicate) in &self.queries {
            let value = query.iter().find(|(k, _)| k == key).map(|(_, v)| v)?;
            match predicate {
                QueryPredicate::Present => {}
                QueryPredicate::Equals(expected) => {
                    if value != expected {
                        return None;
                    }
                }
                QueryPredicate::Capture { name, regex } => {
                    if !regex.is_match(value) {
                        return None;
                    }
                    captured.push((name.clone(), value.clone()));
                }
            }
        }

        for predicate in &self.headers {
            let value = headers.get(&predicate.name)?.to_str().ok()?;
            if !predicate.regex.is_match(value) {
                return None;
            }
        }

        let vars = raw
            .into_iter()
            .map(|(name, value)| decode_capture(&name, &value).map(|decoded| (name, decoded)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(|mut vars| {
                vars.extend(captured);
                vars
            });
        Some(vars)
    }
}

// ── Tables ──────────────────────────────────────────────────────────

/// The pattern selected for a request and the values it captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub operation: Operation,
    /// Decoded path captures plus captured query values.
    pub vars: BTreeMap<String, String>,
    /// Registration index of the winning pattern.
    pub index: usize,
}

impl RouteMatch {
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Patterns in registration order.  Read-only once built.
#[derive(Debug, Clone)]
pub struct RouteTable {
    name: &'static str,
    routes: Vec<RoutePattern>,
}

impl RouteTable {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            routes: Vec::new(),
        }
    }

    /// Append `pattern`; it loses to everything registered before it.
    pub fn register(&mut self, pattern: RoutePattern) -> &mut Self {
        self.routes.push(pattern);
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &RoutePattern> {
        self.routes.iter()
    }

    /// Select the first pattern that matches, or fail with `NoSuchRoute`.
    ///
    /// A winning pattern whose path captures are not valid percent-encoded
    /// UTF-8 fails with `InvalidBucketName` or `InvalidObjectName`.
    pub fn resolve(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        headers: &HeaderMap,
    ) -> Result<RouteMatch, S3Error> {
        for (index, route) in self.routes.iter().enumerate() {
            if let Some(vars) = route.matches(method, path, query, headers) {
                let vars = vars?;
                debug!(
                    table = self.name,
                    operation = route.operation.name(),
                    index,
                    "resolved {method} {path}"
                );
                return Ok(RouteMatch {
                    operation: route.operation,
                    vars,
                    index,
                });
            }
        }
        debug!(table = self.name, "no route for {method} {path}");
        Err(S3Error::NoSuchRoute)
    }
}

/// Header an S3 client sets to request a server-side copy.
pub const COPY_SOURCE_HEADER: &str = "x-amz-copy-source";

const BUCKET: &str = "/{bucket}";
const OBJECT: &str = "/{bucket}/{object:.+}";

/// The bucket/object table.  Order is significant; see the module docs.
pub fn storage_routes() -> Result<RouteTable, RouteError> {
    use Operation::*;

    let mut table = RouteTable::new("storage");
    table
        // Object operations.
        .register(RoutePattern::new(Method::HEAD, OBJECT, HeadObject)?)
        .register(
            RoutePattern::new(Method::PUT, OBJECT, UploadPart)?
                .query("partNumber", "")?
                .query("uploadId", "{uploadId:.*}")?,
        )
        .register(
            RoutePattern::new(Method::GET, OBJECT, ListObjectParts)?
                .query("uploadId", "{uploadId:.*}")?,
        )
        .register(
            RoutePattern::new(Method::POST, OBJECT, CompleteMultipartUpload)?
                .query("uploadId", "{uploadId:.*}")?,
        )
        .register(
            RoutePattern::new(Method::POST, OBJECT, NewMultipartUpload)?
                .query("uploads", "")?,
        )
        .register(
            RoutePattern::new(Method::DELETE, OBJECT, AbortMultipartUpload)?
                .query("uploadId", "{uploadId:.*}")?,
        )
        .register(RoutePattern::new(Method::GET, OBJECT, GetObject)?)
        .register(
            RoutePattern::new(Method::PUT, OBJECT, CopyObject)?
                .header(COPY_SOURCE_HEADER, r".*?(\/).*?")?,
        )
        .register(RoutePattern::new(Method::PUT, OBJECT, PutObject)?)
        .register(RoutePattern::new(Method::DELETE, OBJECT, DeleteObject)?)
        // Bucket operations.
        .register(
            RoutePattern::new(Method::GET, BUCKET, GetBucketLocation)?
                .query("location", "")?,
        )
        .register(
            RoutePattern::new(Method::GET, BUCKET, GetBucketPolicy)?
                .query("policy", "")?,
        )
        .register(
            RoutePattern::new(Method::GET, BUCKET, ListMultipartUploads)?
                .query("uploads", "")?,
        )
        .register(RoutePattern::new(Method::GET, BUCKET, ListObjects)?)
        .register(
            RoutePattern::new(Method::PUT, BUCKET, PutBucketPolicy)?
                .query("policy", "")?,
        )
        .register(RoutePattern::new(Method::PUT, BUCKET, PutBucket)?)
        .register(RoutePattern::new(Method::HEAD, BUCKET, HeadBucket)?)
        .register(
            RoutePattern::new(Method::POST, BUCKET, PostPolicy)?
                .header("content-type", "multipart/form-data*")?,
        )
        .register(RoutePattern::new(Method::POST, BUCKET, DeleteMultipleObjects)?)
        .register(
            RoutePattern::new(Method::DELETE, BUCKET, DeleteBucketPolicy)?
                .query("policy", "")?,
        )
        .register(RoutePattern::new(Method::DELETE, BUCKET, DeleteBucket)?)
        // Root.
        .register(RoutePattern::new(Method::GET, "/", ListBuckets)?);
    Ok(table)
}

/// Asset file names the console bundle serves directly.
pub const CONSOLE_ASSET_PATTERN: &str =
    r"[^/]+\.js|loader\.css|logo\.svg|firefox\.png|safari\.png|chrome\.png|favicon\.ico";

/// The console table under `prefix`: RPC endpoint, asset files, and the
/// single-page fallback for browsers.
pub fn console_routes(prefix: &str) -> Result<RouteTable, RouteError> {
    let rpc = format!("{prefix}/rpc");
    let assets = format!("{prefix}/{{assets:{CONSOLE_ASSET_PATTERN}}}");
    let index = format!("{prefix}{{index:(/.*)?}}");

    let mut table = RouteTable::new("console");
    table
        .register(RoutePattern::new(Method::GET, &rpc, Operation::ConsoleRpc)?)
        .register(RoutePattern::new(Method::POST, &rpc, Operation::ConsoleRpc)?)
        .register(RoutePattern::new(Method::GET, &assets, Operation::ConsoleAsset)?)
        .register(RoutePattern::new(Method::HEAD, &assets, Operation::ConsoleAsset)?)
        .register(
            RoutePattern::new(Method::GET, &index, Operation::ConsoleIndex)?
                .header("user-agent", "Mozilla")?,
        )
        .register(
            RoutePattern::new(Method::HEAD, &index, Operation::ConsoleIndex)?
                .header("user-agent", "Mozilla")?,
        );
    Ok(table)
}

// ── Query decoding ──────────────────────────────────────────────────

/// Split and decode a raw query string into ordered pairs.  Keys without
/// `=` get an empty value; `+` decodes to a space.
pub fn decode_query(raw: Option<&str>) -> Vec<(String, String)> {
    raw.unwrap_or("")
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            (decode_form_component(k), decode_form_component(v))
        })
        .collect()
}

/// Percent-decode one path segment or capture.
pub fn decode_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn decode_form_component(s: &str) -> String {
    decode_component(&s.replace('+', " "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn resolve(method: Method, uri: &str) -> Result<RouteMatch, S3Error> {
        resolve_with(method, uri, HeaderMap::new())
    }

    fn resolve_with(method: Method, uri: &str, headers: HeaderMap) -> Result<RouteMatch, S3Error> {
        let (path, query) = uri.split_once('?').map_or((uri, None), |(p, q)| (p, Some(q)));
        storage_routes()
            .unwrap()
            .resolve(&method, path, &decode_query(query), &headers)
    }

    fn op(method: Method, uri: &str) -> Operation {
        resolve(method, uri).unwrap().operation
    }

    fn copy_headers(source: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COPY_SOURCE_HEADER, HeaderValue::from_str(source).unwrap());
        headers
    }

    #[test]
    fn test_template_captures() {
        let t = PathTemplate::parse("/{bucket}/{object:.+}").unwrap();
        let vars = t.captures("/photos/2024/jan%20trip.jpg").unwrap();
        assert_eq!(vars["bucket"], "photos");
        assert_eq!(vars["object"], "2024/jan%20trip.jpg");
        assert!(t.captures("/photos").is_none());
        assert!(t.captures("/photos/").is_none());

        let t = PathTemplate::parse("/{bucket}").unwrap();
        assert_eq!(t.captures("/photos/").unwrap()["bucket"], "photos");

        let root = PathTemplate::parse("/").unwrap();
        assert!(root.captures("/").is_some());
        assert!(root.captures("//").is_none());
    }

    #[test]
    fn test_template_nested_quantifier_and_errors() {
        let t = PathTemplate::parse("/v{version:[0-9]{2}}").unwrap();
        assert_eq!(t.captures("/v12").unwrap()["version"], "12");
        assert!(t.captures("/v123").is_none());

        assert!(matches!(PathTemplate::parse("/{bucket"), Err(RouteError::UnbalancedBraces(_))));
        assert!(matches!(PathTemplate::parse("/bucket}"), Err(RouteError::UnbalancedBraces(_))));
        assert!(matches!(PathTemplate::parse("/{:x}"), Err(RouteError::UnnamedCapture(_))));
        assert!(matches!(PathTemplate::parse("/{a:(}"), Err(RouteError::InvalidPattern { .. })));
    }

    #[test]
    fn test_upload_part_beats_put_and_copy() {
        let m = resolve(Method::PUT, "/mybucket/obj.txt?uploadId=abc&partNumber=3").unwrap();
        assert_eq!(m.operation, Operation::UploadPart);
        assert_eq!(m.var("bucket"), Some("mybucket"));
        assert_eq!(m.var("object"), Some("obj.txt"));
        assert_eq!(m.var("uploadId"), Some("abc"));

        // Copy-source header does not steal a part upload.
        let m = resolve_with(
            Method::PUT,
            "/mybucket/obj.txt?partNumber=3&uploadId=abc",
            copy_headers("/src/key"),
        )
        .unwrap();
        assert_eq!(m.operation, Operation::UploadPart);

        // One of the two keys alone is a plain put.
        assert_eq!(op(Method::PUT, "/mybucket/obj.txt?partNumber=3"), Operation::PutObject);
        assert_eq!(op(Method::PUT, "/mybucket/obj.txt?uploadId=abc"), Operation::PutObject);
    }

    #[test]
    fn test_copy_source_header_selects_copy() {
        let m = resolve_with(Method::PUT, "/dst/key", copy_headers("src-bucket/path/to/key"))
            .unwrap();
        assert_eq!(m.operation, Operation::CopyObject);

        // No separator: the header predicate fails and the generic put wins.
        let m = resolve_with(Method::PUT, "/dst/key", copy_headers("justabucket")).unwrap();
        assert_eq!(m.operation, Operation::PutObject);

        assert_eq!(op(Method::PUT, "/dst/key"), Operation::PutObject);
    }

    #[test]
    fn test_multipart_entry_points() {
        assert_eq!(op(Method::POST, "/mybucket/obj.txt?uploads"), Operation::NewMultipartUpload);
        assert_eq!(op(Method::POST, "/mybucket/obj.txt?uploads="), Operation::NewMultipartUpload);
        assert_eq!(
            op(Method::POST, "/mybucket/obj.txt?uploadId=abc"),
            Operation::CompleteMultipartUpload
        );
        assert_eq!(op(Method::GET, "/mybucket/obj.txt?uploadId=abc"), Operation::ListObjectParts);
        assert_eq!(
            op(Method::DELETE, "/mybucket/obj.txt?uploadId=abc"),
            Operation::AbortMultipartUpload
        );
        assert_eq!(op(Method::GET, "/mybucket/obj.txt"), Operation::GetObject);
        assert_eq!(op(Method::DELETE, "/mybucket/obj.txt"), Operation::DeleteObject);
        assert_eq!(op(Method::GET, "/mybucket?uploads"), Operation::ListMultipartUploads);

        // POST on an object without either key has no route.
        assert!(matches!(resolve(Method::POST, "/mybucket/obj.txt"), Err(S3Error::NoSuchRoute)));
    }

    #[test]
    fn test_bucket_routes() {
        assert_eq!(op(Method::GET, "/mybucket?location"), Operation::GetBucketLocation);
        assert_eq!(op(Method::GET, "/mybucket?policy"), Operation::GetBucketPolicy);
        assert_eq!(op(Method::GET, "/mybucket"), Operation::ListObjects);
        assert_eq!(op(Method::GET, "/mybucket/"), Operation::ListObjects);
        assert_eq!(op(Method::GET, "/mybucket?prefix=a&max-keys=5"), Operation::ListObjects);
        assert_eq!(op(Method::PUT, "/mybucket?policy"), Operation::PutBucketPolicy);
        assert_eq!(op(Method::PUT, "/mybucket"), Operation::PutBucket);
        assert_eq!(op(Method::HEAD, "/mybucket"), Operation::HeadBucket);
        assert_eq!(op(Method::POST, "/mybucket?delete"), Operation::DeleteMultipleObjects);
        assert_eq!(op(Method::DELETE, "/mybucket?policy"), Operation::DeleteBucketPolicy);
        assert_eq!(op(Method::DELETE, "/mybucket"), Operation::DeleteBucket);
        assert_eq!(op(Method::GET, "/"), Operation::ListBuckets);

        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("multipart/form-data; boundary=xyz"),
        );
        let m = resolve_with(Method::POST, "/mybucket", headers).unwrap();
        assert_eq!(m.operation, Operation::PostPolicy);
    }

    #[test]
    fn test_unresolved() {
        assert!(matches!(resolve(Method::OPTIONS, "/mybucket"), Err(S3Error::NoSuchRoute)));
        assert!(matches!(resolve(Method::PUT, "/"), Err(S3Error::NoSuchRoute)));
        assert!(matches!(resolve(Method::PATCH, "/b/k"), Err(S3Error::NoSuchRoute)));
    }

    #[test]
    fn test_path_captures_decode_strictly() {
        let m = resolve(Method::PUT, "/mybucket/2024/jan%20trip.jpg").unwrap();
        assert_eq!(m.var("object"), Some("2024/jan trip.jpg"));
        let m = resolve(Method::GET, "/mybucket/caf%C3%A9").unwrap();
        assert_eq!(m.var("object"), Some("café"));

        assert!(matches!(
            resolve(Method::PUT, "/mybucket/a%FF"),
            Err(S3Error::InvalidObjectName { .. })
        ));
        assert!(matches!(
            resolve(Method::PUT, "/my%FFbucket"),
            Err(S3Error::InvalidBucketName { .. })
        ));
        // A pattern that fails its predicates never reports a decode error.
        assert!(matches!(resolve(Method::PATCH, "/mybucket/a%FF"), Err(S3Error::NoSuchRoute)));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let table = storage_routes().unwrap();
        let query = decode_query(Some("prefix=photos%2F&delimiter=%2F"));
        let first = table.resolve(&Method::GET, "/mybucket", &query, &HeaderMap::new()).unwrap();
        for _ in 0..10 {
            let again = table
                .resolve(&Method::GET, "/mybucket", &query, &HeaderMap::new())
                .unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_registration_order_is_priority() {
        // Same method and path: whichever comes first wins.
        let mut table = RouteTable::new("t");
        table
            .register(RoutePattern::new(Method::PUT, OBJECT, Operation::PutObject).unwrap())
            .register(
                RoutePattern::new(Method::PUT, OBJECT, Operation::CopyObject)
                    .unwrap()
                    .header(COPY_SOURCE_HEADER, r".*?(\/).*?")
                    .unwrap(),
            );
        let m = table
            .resolve(&Method::PUT, "/b/k", &[], &copy_headers("a/b"))
            .unwrap();
        assert_eq!(m.operation, Operation::PutObject);
        assert_eq!(m.index, 0);

        let storage = storage_routes().unwrap();
        let copy = storage.patterns().position(|p| p.operation() == Operation::CopyObject).unwrap();
        let put = storage.patterns().position(|p| p.operation() == Operation::PutObject).unwrap();
        let part = storage.patterns().position(|p| p.operation() == Operation::UploadPart).unwrap();
        assert!(part < copy && copy < put);
        assert_eq!(storage.len(), 22);
    }

    #[test]
    fn test_query_literal_and_capture_predicates() {
        let mut table = RouteTable::new("t");
        table
            .register(
                RoutePattern::new(Method::GET, BUCKET, Operation::ListObjects)
                    .unwrap()
                    .query("list-type", "2")
                    .unwrap(),
            )
            .register(
                RoutePattern::new(Method::GET, BUCKET, Operation::GetBucketLocation)
                    .unwrap()
                    .query("n", "{n:[0-9]+}")
                    .unwrap(),
            );
        let q = decode_query(Some("list-type=2"));
        assert_eq!(table.resolve(&Method::GET, "/b", &q, &HeaderMap::new()).unwrap().index, 0);
        let q = decode_query(Some("list-type=1"));
        assert!(table.resolve(&Method::GET, "/b", &q, &HeaderMap::new()).is_err());
        let q = decode_query(Some("n=42"));
        let m = table.resolve(&Method::GET, "/b", &q, &HeaderMap::new()).unwrap();
        assert_eq!(m.var("n"), Some("42"));
        let q = decode_query(Some("n=4x"));
        assert!(table.resolve(&Method::GET, "/b", &q, &HeaderMap::new()).is_err());
    }

    #[test]
    fn test_console_routes() {
        let table = console_routes("/minio").unwrap();
        let mut browser = HeaderMap::new();
        browser.insert("user-agent", HeaderValue::from_static("Mozilla/5.0 (X11)"));
        let cli = HeaderMap::new();

        let op = |method: Method, path: &str, headers: &HeaderMap| {
            table.resolve(&method, path, &[], headers).map(|m| m.operation)
        };

        assert_eq!(op(Method::POST, "/minio/rpc", &cli).unwrap(), Operation::ConsoleRpc);
        assert_eq!(op(Method::GET, "/minio/rpc", &cli).unwrap(), Operation::ConsoleRpc);
        assert_eq!(op(Method::GET, "/minio/app.js", &cli).unwrap(), Operation::ConsoleAsset);
        assert_eq!(op(Method::HEAD, "/minio/favicon.ico", &cli).unwrap(), Operation::ConsoleAsset);
        assert_eq!(op(Method::GET, "/minio/", &browser).unwrap(), Operation::ConsoleIndex);
        assert_eq!(op(Method::GET, "/minio", &browser).unwrap(), Operation::ConsoleIndex);
        assert_eq!(op(Method::GET, "/minio/login", &browser).unwrap(), Operation::ConsoleIndex);

        assert!(op(Method::GET, "/minio/login", &cli).is_err());
        assert!(op(Method::PUT, "/minio/rpc", &cli).is_err());
        assert!(op(Method::DELETE, "/minio/app.js", &cli).is_err());
        assert!(op(Method::GET, "/minio/js/app.js", &cli).is_err());
        assert!(op(Method::GET, "/photos/app.js", &browser).is_err());
    }

    #[test]
    fn test_decode_query() {
        let q = decode_query(Some("uploads&prefix=a%2Fb&name=hello+world&empty="));
        assert_eq!(
            q,
            vec![
                ("uploads".to_string(), String::new()),
                ("prefix".to_string(), "a/b".to_string()),
                ("name".to_string(), "hello world".to_string()),
                ("empty".to_string(), String::new()),
            ]
        );
        assert!(decode_query(None).is_empty());
    }
}
