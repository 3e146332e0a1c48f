//! AWS Signature Version 4 authentication.
//!
//! The [`SigningContext`] is built once at startup from the gateway
//! credentials and shared read-only by every request.  It verifies
//! incoming requests that carry either:
//! - `Authorization: AWS4-HMAC-SHA256 ...` headers (header-based auth)
//! - `X-Amz-Algorithm=AWS4-HMAC-SHA256` query parameters (presigned URLs)
//!
//! and signs outgoing requests made by the console on the operator's behalf.
//!
//! The core algorithm follows the AWS SigV4 specification:
//! 1. Build a canonical request
//! 2. Build a string-to-sign
//! 3. Derive a signing key via HMAC chain
//! 4. Compute and compare the signature

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use http::header::{HeaderValue, AUTHORIZATION, HOST};
use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

use crate::errors::S3Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum presigned URL expiration (7 days).
pub const MAX_PRESIGNED_EXPIRES: u64 = 604800;

/// Payload hash marker for requests whose body is not signed.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// `x-amz-date` / `X-Amz-Date` format (ISO 8601 basic).
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

// ── Signing context ─────────────────────────────────────────────────

/// Failure to construct a [`SigningContext`] or to sign a request.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("access key must be between 5 and 20 characters, got {0}")]
    InvalidAccessKey(usize),
    #[error("secret key must be between 8 and 40 characters, got {0}")]
    InvalidSecretKey(usize),
    #[error("region must not be empty")]
    EmptyRegion,
    #[error("signed header value is not valid: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
}

/// How a request proved its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// `Authorization` header.
    Header,
    /// Presigned URL query parameters.
    Presigned,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub access_key: String,
    pub region: String,
    pub method: AuthMethod,
}

/// Credential and region bundle used to verify inbound signatures and to
/// sign outbound requests.  Immutable once constructed.
#[derive(Clone)]
pub struct SigningContext {
    access_key: String,
    secret_key: String,
    region: String,
}

impl fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningContext")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

impl SigningContext {
    /// Build a signing context, validating the credential shape.
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, SigningError> {
        let access_key = access_key.into();
        let secret_key = secret_key.into();
        let region = region.into();

        if !(5..=20).contains(&access_key.len()) {
            return Err(SigningError::InvalidAccessKey(access_key.len()));
        }
        if !(8..=40).contains(&secret_key.len()) {
            return Err(SigningError::InvalidSecretKey(secret_key.len()));
        }
        if region.is_empty() {
            return Err(SigningError::EmptyRegion);
        }

        Ok(Self {
            access_key,
            secret_key,
            region,
        })
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Verify the signature of an inbound request.
    ///
    /// The buffered body is hashed when the client did not send
    /// `x-amz-content-sha256`.  `now` is used for presigned expiry.
    pub fn verify(
        &self,
        req: &http::Request<Bytes>,
        now: DateTime<Utc>,
    ) -> Result<Identity, S3Error> {
        let auth_header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if auth_header.is_some_and(|h| h.starts_with("AWS ")) {
            return Err(S3Error::SignatureVersionNotSupported);
        }

        let query_string = req.uri().query().unwrap_or("");
        let auth_type = detect_auth_type(auth_header, query_string)
            .map_err(|message| S3Error::AccessDenied { message })?;

        let method = req.method().as_str();
        let uri = req.uri().path();
        let headers = extract_headers_for_signing(req.headers());

        match auth_type {
            AuthType::None => Err(S3Error::AccessDenied {
                message: "No authentication information provided".to_string(),
            }),
            AuthType::Header(parsed) => {
                self.check_scope(&parsed.access_key_id, &parsed.region, &parsed.service)?;

                let amz_date = find_header_value(&headers, "x-amz-date").unwrap_or("");
                if amz_date.len() >= 8 && parsed.date_stamp != amz_date[..8] {
                    return Err(S3Error::AccessDenied {
                        message: "Credential date does not match x-amz-date".to_string(),
                    });
                }

                let body_hash = hex::encode(Sha256::digest(req.body()));
                let payload_hash = match find_header_value(&headers, "x-amz-content-sha256") {
                    Some(hash) if is_sha256_hex(hash) => {
                        if !hash.eq_ignore_ascii_case(&body_hash) {
                            return Err(S3Error::ContentSha256Mismatch);
                        }
                        hash.to_string()
                    }
                    Some(hash) => hash.to_string(),
                    None => body_hash,
                };

                if !verify_header_auth(
                    method,
                    uri,
                    query_string,
                    &headers,
                    &payload_hash,
                    &parsed,
                    &self.secret_key,
                ) {
                    debug!("Signature mismatch for access key {}", parsed.access_key_id);
                    return Err(S3Error::SignatureDoesNotMatch);
                }

                Ok(Identity {
                    access_key: parsed.access_key_id,
                    region: parsed.region,
                    method: AuthMethod::Header,
                })
            }
            AuthType::Presigned(parsed) => {
                self.check_scope(&parsed.access_key_id, &parsed.region, &parsed.service)?;

                if !check_presigned_expiration(&parsed.amz_date, parsed.expires, now) {
                    return Err(S3Error::AccessDenied {
                        message: "Request has expired".to_string(),
                    });
                }

                if !verify_presigned_auth(
                    method,
                    uri,
                    query_string,
                    &headers,
                    &parsed,
                    &self.secret_key,
                ) {
                    debug!(
                        "Presigned signature mismatch for access key {}",
                        parsed.access_key_id
                    );
                    return Err(S3Error::SignatureDoesNotMatch);
                }

                Ok(Identity {
                    access_key: parsed.access_key_id,
                    region: parsed.region,
                    method: AuthMethod::Presigned,
                })
            }
        }
    }

    fn check_scope(&self, access_key: &str, region: &str, service: &str) -> Result<(), S3Error> {
        if !constant_time_eq(access_key, &self.access_key) {
            return Err(S3Error::InvalidAccessKeyId);
        }
        if region != self.region {
            return Err(S3Error::AccessDenied {
                message: format!("Credential should be scoped to a valid region, not '{region}'"),
            });
        }
        if service != "s3" {
            return Err(S3Error::AccessDenied {
                message: format!("Credential should be scoped to correct service: 's3', not '{service}'"),
            });
        }
        Ok(())
    }

    /// Sign an outgoing request in place with header-based SigV4.
    ///
    /// Adds `host` (from the URI authority when absent), `x-amz-date`,
    /// `x-amz-content-sha256` and `Authorization`.
    pub fn sign(
        &self,
        req: &mut http::Request<Bytes>,
        now: DateTime<Utc>,
    ) -> Result<(), SigningError> {
        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
        let date_stamp = &amz_date[..8];
        let payload_hash = hex::encode(Sha256::digest(req.body()));

        if !req.headers().contains_key(HOST) {
            if let Some(authority) = req.uri().authority() {
                let host = HeaderValue::from_str(authority.as_str())?;
                req.headers_mut().insert(HOST, host);
            }
        }
        req.headers_mut()
            .insert("x-amz-date", HeaderValue::from_str(&amz_date)?);
        req.headers_mut().insert(
            "x-amz-content-sha256",
            HeaderValue::from_str(&payload_hash)?,
        );

        let headers = extract_headers_for_signing(req.headers());
        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| {
                *name == "host"
                    || *name == "content-type"
                    || *name == "content-md5"
                    || name.starts_with("x-amz-")
            })
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = build_canonical_request(
            req.method().as_str(),
            req.uri().path(),
            req.uri().query().unwrap_or(""),
            &headers,
            &signed_headers,
            &payload_hash,
        );
        let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);
        let string_to_sign = build_string_to_sign(&amz_date, &credential_scope, &canonical_request);
        let signing_key = derive_signing_key(&self.secret_key, date_stamp, &self.region, "s3");
        let signature = compute_signature(&signing_key, &string_to_sign);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key
        );
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);
        Ok(())
    }

    /// Produce a presigned GET URL for `path` on `endpoint`
    /// (`scheme://host[:port]`), valid for `expires` seconds.
    pub fn presign_get(&self, endpoint: &str, path: &str, expires: u64, now: DateTime<Utc>) -> String {
        let expires = expires.clamp(1, MAX_PRESIGNED_EXPIRES);
        let endpoint = endpoint.trim_end_matches('/');
        let host = endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(endpoint);

        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
        let date_stamp = &amz_date[..8];
        let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);
        let credential = format!("{}/{credential_scope}", self.access_key);

        let query = format!(
            "X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential={}&X-Amz-Date={amz_date}&X-Amz-Expires={expires}&X-Amz-SignedHeaders=host",
            s3_uri_encode(&credential, true)
        );
        let headers = vec![("host".to_string(), host.to_string())];
        let canonical_request =
            build_canonical_request("GET", path, &query, &headers, "host", UNSIGNED_PAYLOAD);
        let string_to_sign = build_string_to_sign(&amz_date, &credential_scope, &canonical_request);
        let signing_key = derive_signing_key(&self.secret_key, date_stamp, &self.region, "s3");
        let signature = compute_signature(&signing_key, &string_to_sign);

        format!("{endpoint}{path}?{query}&X-Amz-Signature={signature}")
    }
}

// ── Parsed types ────────────────────────────────────────────────────

/// Parsed components from an Authorization header.
#[derive(Debug, Clone)]
pub struct ParsedAuthorization {
    /// The access key ID from the Credential field.
    pub access_key_id: String,
    /// The date stamp (YYYYMMDD) from the Credential field.
    pub date_stamp: String,
    /// The region from the Credential field.
    pub region: String,
    /// The service from the Credential field (should be "s3").
    pub service: String,
    /// The signed headers (semicolon-separated, lowercase, sorted).
    pub signed_headers: String,
    /// The provided signature (64-char hex string).
    pub signature: String,
    /// The full credential scope string.
    pub credential_scope: String,
}

/// Parsed components from presigned URL query parameters.
#[derive(Debug, Clone)]
pub struct ParsedPresigned {
    pub access_key_id: String,
    pub date_stamp: String,
    pub region: String,
    pub service: String,
    pub credential_scope: String,
    pub signed_headers: String,
    pub signature: String,
    /// The X-Amz-Date value.
    pub amz_date: String,
    /// The X-Amz-Expires value (seconds).
    pub expires: u64,
}

/// The type of authentication detected on a request.
#[derive(Debug)]
pub enum AuthType {
    /// Authorization header-based SigV4.
    Header(ParsedAuthorization),
    /// Presigned URL query parameter-based SigV4.
    Presigned(ParsedPresigned),
    /// No authentication present (anonymous request).
    None,
}

// ── Detection ───────────────────────────────────────────────────────

/// Whether the query string carries presigned SigV4 parameters.
pub fn is_presigned(query_string: &str) -> bool {
    query_string
        .split('&')
        .any(|part| part.split('=').next() == Some("X-Amz-Algorithm"))
}

/// Detect the authentication type from request headers and query string.
///
/// Returns an error string if both are present (ambiguous) or malformed.
pub fn detect_auth_type(
    authorization_header: Option<&str>,
    query_string: &str,
) -> Result<AuthType, String> {
    let header = authorization_header.filter(|h| h.starts_with("AWS4-HMAC-SHA256"));

    let query_params = parse_query_string(query_string);
    let has_presigned = query_params.contains_key("X-Amz-Algorithm");

    match (header, has_presigned) {
        (Some(_), true) => {
            Err("Both Authorization header and presigned query parameters present".to_string())
        }
        (Some(auth_header), false) => {
            parse_authorization_header(auth_header).map(AuthType::Header)
        }
        (None, true) => parse_presigned_params(&query_params).map(AuthType::Presigned),
        (None, false) => Ok(AuthType::None),
    }
}

// ── Authorization header parsing ────────────────────────────────────

/// Parse the `Authorization` header value into its components.
///
/// Expected format:
/// ```text
/// AWS4-HMAC-SHA256 Credential=AKID/20260222/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature=abcdef...
/// ```
pub fn parse_authorization_header(header: &str) -> Result<ParsedAuthorization, String> {
    let rest = header
        .trim()
        .strip_prefix("AWS4-HMAC-SHA256")
        .ok_or("Authorization header does not start with AWS4-HMAC-SHA256")?
        .trim();

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for part in rest.split(',') {
        let part = part.trim();
        if let Some(val) = part.strip_prefix("Credential=") {
            credential = Some(val.trim().to_string());
        } else if let Some(val) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(val.trim().to_string());
        } else if let Some(val) = part.strip_prefix("Signature=") {
            signature = Some(val.trim().to_string());
        }
    }

    let credential = credential.ok_or("Missing Credential in Authorization header")?;
    let signed_headers = signed_headers.ok_or("Missing SignedHeaders in Authorization header")?;
    let signature = signature.ok_or("Missing Signature in Authorization header")?;

    // AKID/YYYYMMDD/region/service/aws4_request
    let parts: Vec<&str> = credential.splitn(5, '/').collect();
    if parts.len() != 5 {
        return Err("Invalid Credential format in Authorization header".to_string());
    }
    if parts[4] != "aws4_request" {
        return Err("Credential must end with aws4_request".to_string());
    }

    let credential_scope = format!("{}/{}/{}/{}", parts[1], parts[2], parts[3], parts[4]);

    Ok(ParsedAuthorization {
        access_key_id: parts[0].to_string(),
        date_stamp: parts[1].to_string(),
        region: parts[2].to_string(),
        service: parts[3].to_string(),
        signed_headers,
        signature,
        credential_scope,
    })
}

// ── Presigned URL parsing ───────────────────────────────────────────

fn parse_presigned_params(params: &BTreeMap<String, String>) -> Result<ParsedPresigned, String> {
    let algorithm = params
        .get("X-Amz-Algorithm")
        .ok_or("Missing X-Amz-Algorithm")?;
    if algorithm != "AWS4-HMAC-SHA256" {
        return Err(format!("Unsupported algorithm: {algorithm}"));
    }

    let credential_raw = params
        .get("X-Amz-Credential")
        .ok_or("Missing X-Amz-Credential")?;
    // Credential may be URL-encoded (slashes as %2F).
    let credential = percent_decode(credential_raw);
    let cred_parts: Vec<&str> = credential.splitn(5, '/').collect();
    if cred_parts.len() != 5 || cred_parts[4] != "aws4_request" {
        return Err("Invalid X-Amz-Credential format".to_string());
    }

    let amz_date = params
        .get("X-Amz-Date")
        .ok_or("Missing X-Amz-Date")?
        .to_string();

    let expires: u64 = params
        .get("X-Amz-Expires")
        .ok_or("Missing X-Amz-Expires")?
        .parse()
        .map_err(|_| "Invalid X-Amz-Expires value")?;
    if expires == 0 || expires > MAX_PRESIGNED_EXPIRES {
        return Err(format!(
            "X-Amz-Expires must be between 1 and {MAX_PRESIGNED_EXPIRES}"
        ));
    }

    let signed_headers = percent_decode(
        params
            .get("X-Amz-SignedHeaders")
            .ok_or("Missing X-Amz-SignedHeaders")?,
    );

    let signature = params
        .get("X-Amz-Signature")
        .ok_or("Missing X-Amz-Signature")?
        .to_string();

    if amz_date.len() < 8 || cred_parts[1] != &amz_date[..8] {
        return Err("Credential date does not match X-Amz-Date".to_string());
    }

    Ok(ParsedPresigned {
        access_key_id: cred_parts[0].to_string(),
        date_stamp: cred_parts[1].to_string(),
        region: cred_parts[2].to_string(),
        service: cred_parts[3].to_string(),
        credential_scope: cred_parts[1..].join("/"),
        signed_headers,
        signature,
        amz_date,
        expires,
    })
}

// ── Canonical request construction ──────────────────────────────────

/// Build the canonical request string.
///
/// ```text
/// HTTPMethod + '\n' +
/// CanonicalURI + '\n' +
/// CanonicalQueryString + '\n' +
/// CanonicalHeaders + '\n' +
/// SignedHeaders + '\n' +
/// HashedPayload
/// ```
pub fn build_canonical_request(
    method: &str,
    uri: &str,
    query_string: &str,
    headers: &[(String, String)],
    signed_headers_str: &str,
    payload_hash: &str,
) -> String {
    // S3 signs the raw path as sent, without normalization.
    let canonical_uri = if uri.is_empty() { "/" } else { uri };
    let canonical_query = build_canonical_query_string(query_string);

    let mut canonical_headers = String::new();
    for name in signed_headers_str.split(';') {
        if let Some(value) = find_header_value(headers, name) {
            canonical_headers.push_str(name);
            canonical_headers.push(':');
            canonical_headers.push_str(&collapse_whitespace(value));
            canonical_headers.push('\n');
        }
    }

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers_str}\n{payload_hash}"
    )
}

/// Build the canonical query string from raw query string.
///
/// Parameters are decoded, re-encoded with S3 rules and sorted by name.
/// `X-Amz-Signature` is excluded; valueless parameters become `name=`.
pub fn build_canonical_query_string(query_string: &str) -> String {
    let mut params: Vec<(String, String)> = query_string
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| part.split_once('=').unwrap_or((part, "")))
        .filter(|(k, _)| *k != "X-Amz-Signature")
        .map(|(k, v)| {
            (
                s3_uri_encode(&percent_decode(k), true),
                s3_uri_encode(&percent_decode(v), true),
            )
        })
        .collect();

    params.sort();

    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

// ── String to sign ──────────────────────────────────────────────────

/// Build the string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256 + '\n' +
/// Timestamp + '\n' +
/// CredentialScope + '\n' +
/// HexEncode(SHA256(CanonicalRequest))
/// ```
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request: &str,
) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("AWS4-HMAC-SHA256\n{timestamp}\n{credential_scope}\n{hash}")
}

// ── Signing key derivation ──────────────────────────────────────────

/// Derive the signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC-SHA256("AWS4" + secret, dateStamp)
/// kRegion  = HMAC-SHA256(kDate, region)
/// kService = HMAC-SHA256(kRegion, "s3")
/// kSigning = HMAC-SHA256(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute the signature: HexEncode(HMAC-SHA256(SigningKey, StringToSign)).
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

/// Compare two signature strings in constant time.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ── Full verification ───────────────────────────────────────────────

/// Verify a header-based SigV4 request against `secret_key`.
pub fn verify_header_auth(
    method: &str,
    uri: &str,
    query_string: &str,
    request_headers: &[(String, String)],
    payload_hash: &str,
    parsed: &ParsedAuthorization,
    secret_key: &str,
) -> bool {
    let canonical_request = build_canonical_request(
        method,
        uri,
        query_string,
        request_headers,
        &parsed.signed_headers,
        payload_hash,
    );

    let timestamp = find_header_value(request_headers, "x-amz-date")
        .or_else(|| find_header_value(request_headers, "date"))
        .unwrap_or_default();

    let string_to_sign =
        build_string_to_sign(timestamp, &parsed.credential_scope, &canonical_request);

    let signing_key = derive_signing_key(
        secret_key,
        &parsed.date_stamp,
        &parsed.region,
        &parsed.service,
    );

    let computed = compute_signature(&signing_key, &string_to_sign);
    constant_time_eq(&computed, &parsed.signature)
}

/// Verify a presigned URL request against `secret_key`.
pub fn verify_presigned_auth(
    method: &str,
    uri: &str,
    query_string: &str,
    request_headers: &[(String, String)],
    parsed: &ParsedPresigned,
    secret_key: &str,
) -> bool {
    let canonical_request = build_canonical_request(
        method,
        uri,
        query_string,
        request_headers,
        &parsed.signed_headers,
        UNSIGNED_PAYLOAD,
    );

    let string_to_sign = build_string_to_sign(
        &parsed.amz_date,
        &parsed.credential_scope,
        &canonical_request,
    );

    let signing_key = derive_signing_key(
        secret_key,
        &parsed.date_stamp,
        &parsed.region,
        &parsed.service,
    );

    let computed = compute_signature(&signing_key, &string_to_sign);
    constant_time_eq(&computed, &parsed.signature)
}

/// Whether a presigned URL signed at `amz_date` is still valid at `now`.
pub fn check_presigned_expiration(amz_date: &str, expires_seconds: u64, now: DateTime<Utc>) -> bool {
    let Some(sign_time) = parse_amz_date(amz_date) else {
        return false;
    };
    let age = now.signed_duration_since(sign_time).num_seconds();
    age <= expires_seconds as i64
}

/// Parse an `x-amz-date` value (`YYYYMMDDTHHMMSSZ`).
pub fn parse_amz_date(date: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(date, AMZ_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

// ── URI encoding ────────────────────────────────────────────────────

/// S3-compatible URI encoding (RFC 3986 with S3 exceptions).
///
/// - Characters A-Z, a-z, 0-9, -, _, ., ~ are NOT encoded.
/// - If `encode_slash` is false, `/` is NOT encoded (for URI paths).
/// - Everything else is percent-encoded with uppercase hex.
pub fn s3_uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len() * 2);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            b'/' if !encode_slash => encoded.push('/'),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse a raw query string into a BTreeMap.
pub fn parse_query_string(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (part.to_string(), String::new()),
        })
        .collect()
}

/// Collapse consecutive whitespace in a header value to a single space,
/// and trim leading/trailing whitespace.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find a header value by lowercase name from a list of (name, value) pairs.
fn find_header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

/// A literal payload digest, as opposed to `UNSIGNED-PAYLOAD` and the
/// other sentinel values clients may send.
fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

fn percent_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Extract headers as sorted (lowercase-name, value) pairs; repeated
/// headers are joined with commas.
pub fn extract_headers_for_signing(header_map: &http::HeaderMap) -> Vec<(String, String)> {
    let mut header_values: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in header_map.iter() {
        let val_str = value.to_str().unwrap_or("").to_string();
        header_values
            .entry(name.as_str().to_lowercase())
            .or_default()
            .push(val_str);
    }

    header_values
        .into_iter()
        .map(|(name, values)| (name, values.join(",")))
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────
