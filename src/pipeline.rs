//! The ordered request pipeline.
//!
//! Every request runs through the same seven stages before any route is
//! consulted for dispatch:
//!
//! 1. redirect            - send browsers hitting well-known paths to the console
//! 2. privileged-prefix   - only console routes may live under the console prefix
//! 3. cache-control       - annotate console responses
//! 4. time-validity       - reject stale or future-dated signed requests
//! 5. cors                - annotate cross-origin requests, answer preflights
//! 6. resource-validity   - decode bucket/key, refuse unsupported sub-resources
//! 7. authentication      - verify the signature and record the identity
//!
//! A stage either lets the request continue, possibly after annotating
//! the [`RequestContext`], or halts it with a terminal response.  The order
//! is fixed: the time check halts skewed requests before any signature
//! work, and authentication runs last so that nothing reaches a handler
//! without an identity.

use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS,
    AUTHORIZATION, CACHE_CONTROL, DATE, LOCATION, ORIGIN, USER_AGENT, VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::ops::ControlFlow;
use tracing::{debug, warn};

use crate::auth::{parse_amz_date, SigningContext};
use crate::config::Config;
use crate::context::{RequestContext, Surface};
use crate::errors::S3Error;
use crate::routes::{decode_component, decode_query, Operation, RouteTable};

/// Read-only collaborators the stages consult.
#[derive(Clone, Copy)]
pub struct StageEnv<'a> {
    pub config: &'a Config,
    pub signing: &'a SigningContext,
    pub console_routes: &'a RouteTable,
}

/// How a stage ends a request.
pub enum Halt {
    /// A complete non-error response (redirect, CORS preflight).
    Respond(Response),
    /// An S3 error, rendered by the caller with the request's resource.
    Reject(S3Error),
}

impl fmt::Debug for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Halt::Respond(resp) => f.debug_tuple("Respond").field(&resp.status()).finish(),
            Halt::Reject(err) => f.debug_tuple("Reject").field(err).finish(),
        }
    }
}

/// A halted request and the stage that halted it.
#[derive(Debug)]
pub struct Rejection {
    pub stage: &'static str,
    pub halt: Halt,
}

type StageFn = fn(&StageEnv<'_>, &Request<Bytes>, &mut RequestContext) -> ControlFlow<Halt>;

/// One named filter.
#[derive(Clone, Copy)]
pub struct Stage {
    pub name: &'static str,
    run: StageFn,
}

impl Stage {
    pub const fn new(name: &'static str, run: StageFn) -> Self {
        Self { name, run }
    }
}

/// Totally ordered list of stages.
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// The gateway's stage order.
    pub fn standard() -> Self {
        Self {
            stages: vec![
                Stage::new("redirect", redirect),
                Stage::new("privileged-prefix", privileged_prefix),
                Stage::new("cache-control", cache_control),
                Stage::new("time-validity", time_validity),
                Stage::new("cors", cors),
                Stage::new("resource-validity", resource_validity),
                Stage::new("authentication", authenticate),
            ],
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    /// Run every stage in order, stopping at the first that halts.
    pub fn run(
        &self,
        env: &StageEnv<'_>,
        req: &Request<Bytes>,
        ctx: &mut RequestContext,
    ) -> Result<(), Rejection> {
        for stage in &self.stages {
            if let ControlFlow::Break(halt) = (stage.run)(env, req, ctx) {
                debug!(
                    request_id = %ctx.request_id,
                    stage = stage.name,
                    "{} {} halted",
                    req.method(),
                    req.uri().path()
                );
                crate::metrics::record_rejection(stage.name);
                return Err(Rejection {
                    stage: stage.name,
                    halt,
                });
            }
        }
        Ok(())
    }
}

fn reject(err: S3Error) -> ControlFlow<Halt> {
    ControlFlow::Break(Halt::Reject(err))
}

/// Browsers identify themselves with `Mozilla` in the user agent.
pub fn is_browser(headers: &HeaderMap) -> bool {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| ua.contains("Mozilla"))
}

// -- 1. Redirect --------------------------------------------------------------

const REDIRECT_PATHS: &[&str] = &["/", "/login", "/index.html", "/favicon.ico"];

fn redirect(env: &StageEnv<'_>, req: &Request<Bytes>, _ctx: &mut RequestContext) -> ControlFlow<Halt> {
    let console = &env.config.console;
    let path = req.uri().path();
    if !console.enabled
        || !matches!(*req.method(), Method::GET | Method::HEAD)
        || !REDIRECT_PATHS.contains(&path)
        || !is_browser(req.headers())
    {
        return ControlFlow::Continue(());
    }

    let target = if path == "/" {
        format!("{}/", console.prefix)
    } else {
        format!("{}{path}", console.prefix)
    };
    ControlFlow::Break(Halt::Respond(
        (StatusCode::TEMPORARY_REDIRECT, [(LOCATION, target)]).into_response(),
    ))
}

// -- 2. Privileged prefix -----------------------------------------------------

fn privileged_prefix(
    env: &StageEnv<'_>,
    req: &Request<Bytes>,
    ctx: &mut RequestContext,
) -> ControlFlow<Halt> {
    if ctx.surface != Surface::Console {
        return ControlFlow::Continue(());
    }
    if !env.config.console.enabled {
        return reject(S3Error::AllAccessDisabled);
    }

    let query = decode_query(req.uri().query());
    match env
        .console_routes
        .resolve(req.method(), req.uri().path(), &query, req.headers())
    {
        Ok(m) => {
            ctx.console_operation = Some(m.operation);
            ControlFlow::Continue(())
        }
        Err(_) => reject(S3Error::AllAccessDisabled),
    }
}

// -- 3. Cache control ---------------------------------------------------------

fn cache_control(
    _env: &StageEnv<'_>,
    _req: &Request<Bytes>,
    ctx: &mut RequestContext,
) -> ControlFlow<Halt> {
    let value = match ctx.console_operation {
        Some(Operation::ConsoleAsset) => "public, max-age=31536000",
        Some(Operation::ConsoleIndex | Operation::ConsoleRpc) => "no-store",
        _ => return ControlFlow::Continue(()),
    };
    ctx.response_headers
        .insert(CACHE_CONTROL, HeaderValue::from_static(value));
    ControlFlow::Continue(())
}

// -- 4. Time validity ---------------------------------------------------------

/// Timestamp a signed request claims: `x-amz-date`, else `Date`.
fn request_time(headers: &HeaderMap) -> Result<DateTime<Utc>, S3Error> {
    if let Some(value) = headers.get("x-amz-date") {
        let value = value.to_str().map_err(|_| S3Error::MalformedDate)?;
        return parse_amz_date(value).ok_or(S3Error::MalformedDate);
    }
    if let Some(value) = headers.get(DATE) {
        let value = value.to_str().map_err(|_| S3Error::MalformedDate)?;
        if let Ok(time) = httpdate::parse_http_date(value) {
            return Ok(DateTime::<Utc>::from(time));
        }
        return parse_amz_date(value)
            .or_else(|| {
                DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
            })
            .ok_or(S3Error::MalformedDate);
    }
    Err(S3Error::RequestTimeTooSkewed)
}

fn time_validity(
    env: &StageEnv<'_>,
    req: &Request<Bytes>,
    ctx: &mut RequestContext,
) -> ControlFlow<Halt> {
    if !req.headers().contains_key(AUTHORIZATION) {
        return ControlFlow::Continue(());
    }

    let claimed = match request_time(req.headers()) {
        Ok(t) => t,
        Err(err) => return reject(err),
    };
    let skew = (ctx.received_at - claimed).num_seconds().unsigned_abs();
    if skew > env.config.auth.clock_skew_seconds {
        warn!(
            request_id = %ctx.request_id,
            skew_seconds = skew,
            "request time outside the allowed skew"
        );
        return reject(S3Error::RequestTimeTooSkewed);
    }
    ControlFlow::Continue(())
}

// -- 5. CORS ------------------------------------------------------------------

const CORS_ALLOW_METHODS: &str = "GET, PUT, POST, DELETE, HEAD";
const CORS_EXPOSE_HEADERS: &str =
    "ETag, Content-Length, Content-Type, Last-Modified, x-amz-request-id, x-amz-version-id";

fn cors(env: &StageEnv<'_>, req: &Request<Bytes>, ctx: &mut RequestContext) -> ControlFlow<Halt> {
    let Some(origin) = req.headers().get(ORIGIN).cloned() else {
        return ControlFlow::Continue(());
    };
    let allowed = origin
        .to_str()
        .is_ok_and(|origin| env.config.cors.allows(origin));

    if req.method() == Method::OPTIONS {
        if !allowed {
            return reject(S3Error::CorsForbidden);
        }
        let allow_headers = req
            .headers()
            .get(ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*"));
        let max_age = HeaderValue::from(env.config.cors.max_age_seconds);
        let mut response = StatusCode::OK.into_response();
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        );
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
        headers.insert(ACCESS_CONTROL_MAX_AGE, max_age);
        headers.insert(VARY, HeaderValue::from_static("Origin"));
        return ControlFlow::Break(Halt::Respond(response));
    }

    if allowed {
        let headers = &mut ctx.response_headers;
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(CORS_EXPOSE_HEADERS),
        );
        headers.insert(VARY, HeaderValue::from_static("Origin"));
    }
    ControlFlow::Continue(())
}

// -- 6. Resource validity -----------------------------------------------------

/// Bucket sub-resources the gateway does not serve.
pub const UNSUPPORTED_BUCKET_RESOURCES: &[&str] = &[
    "acl",
    "cors",
    "lifecycle",
    "logging",
    "notification",
    "replication",
    "tagging",
    "versions",
    "requestPayment",
    "versioning",
    "website",
];

/// Object sub-resources the gateway does not serve.
pub const UNSUPPORTED_OBJECT_RESOURCES: &[&str] = &["acl", "torrent", "tagging"];

fn resource_validity(
    env: &StageEnv<'_>,
    req: &Request<Bytes>,
    ctx: &mut RequestContext,
) -> ControlFlow<Halt> {
    if ctx.surface != Surface::Storage {
        return ControlFlow::Continue(());
    }

    let trimmed = req.uri().path().trim_start_matches('/');
    let (bucket, key) = trimmed.split_once('/').unwrap_or((trimmed, ""));
    if !bucket.is_empty() {
        let bucket = decode_component(bucket);
        // A storage path whose bucket decodes to the console prefix would
        // write into the reserved namespace.
        if bucket == env.config.console.prefix.trim_start_matches('/') {
            return reject(S3Error::AllAccessDisabled);
        }
        ctx.bucket = Some(bucket);
    }
    if !key.is_empty() {
        ctx.key = Some(decode_component(key));
    }

    let unsupported = match (&ctx.bucket, &ctx.key) {
        (_, Some(_)) => UNSUPPORTED_OBJECT_RESOURCES,
        (Some(_), None) => UNSUPPORTED_BUCKET_RESOURCES,
        (None, None) => return ControlFlow::Continue(()),
    };
    let query = decode_query(req.uri().query());
    if let Some((resource, _)) = query.iter().find(|(k, _)| unsupported.contains(&k.as_str())) {
        return reject(S3Error::UnsupportedResource {
            resource: resource.clone(),
        });
    }
    ControlFlow::Continue(())
}

// -- 7. Authentication --------------------------------------------------------

fn authenticate(
    env: &StageEnv<'_>,
    req: &Request<Bytes>,
    ctx: &mut RequestContext,
) -> ControlFlow<Halt> {
    if ctx.console_operation.is_some_and(|op| op.is_public()) {
        return ControlFlow::Continue(());
    }

    match env.signing.verify(req, ctx.received_at) {
        Ok(identity) => {
            if !ctx.set_identity(identity) {
                warn!(request_id = %ctx.request_id, "identity already set; keeping the first");
            }
            ControlFlow::Continue(())
        }
        Err(err) => {
            warn!(
                request_id = %ctx.request_id,
                code = err.code(),
                "authentication failed for {} {}",
                req.method(),
                req.uri().path()
            );
            reject(err)
        }
    }
}
