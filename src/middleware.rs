//! The request logging middleware
//!
//! [`Requestlogs`] bundles the shared pipeline state: configuration handle,
//! serializer, and storage backend. Apply it with
//! `axum::middleware::from_fn_with_state(pipeline, requestlogs_middleware)`
//! as the outermost layer of the stack you want observed. Layers that
//! publish context the pipeline consumes (authentication extensions, panic
//! recovery) go inside or outside according to what they provide:
//!
//! - an auth layer that inserts [`AuthenticatedUser`] into request
//!   extensions must sit *outside* the pipeline for pre-dispatch pickup, or
//!   insert into response extensions from inside;
//! - `tower_http::catch_panic::CatchPanicLayer` sits *inside*, so a handler
//!   fault reaches the pipeline as an ordinary 500 response and the entry is
//!   still finalized and stored.
//!
//! Per-route action names are attached with [`action_names`] /
//! [`handler_action`]; these mirror the annotation into response extensions
//! so the outer pipeline sees it regardless of layer nesting.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName};
use tower::{Layer, Service};
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tracing::Instrument;

use crate::config::{RequestlogsConfig, SharedConfig};
use crate::correlation;
use crate::entry::{
    ActionNames, AuthenticatedUser, EntryHandle, EntrySlot, FinalizeContext, HandlerAction,
};
use crate::error::Result;
use crate::matcher::PathMatcher;
use crate::serializer::{BaseEntrySerializer, EntrySerializer};
use crate::snapshot::{CapturedRequest, ParsedBody};
use crate::storage::{EntryStorage, LoggingStorage};

/// Shared state of one logging pipeline
///
/// Cheap to clone; clones share the configuration slot and backends.
#[derive(Clone)]
pub struct Requestlogs {
    config: SharedConfig,
    serializer: Arc<dyn EntrySerializer>,
    storage: Arc<dyn EntryStorage>,
    matcher_override: Option<PathMatcher>,
}

impl Requestlogs {
    /// Pipeline with the given options and default serializer/storage
    pub fn new(config: RequestlogsConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Start a builder with default options
    pub fn builder() -> RequestlogsBuilder {
        RequestlogsBuilder::default()
    }

    /// Handle to the live configuration, for atomic reloads
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }
}

/// Builder for [`Requestlogs`]
#[derive(Default)]
pub struct RequestlogsBuilder {
    config: Option<RequestlogsConfig>,
    serializer: Option<Arc<dyn EntrySerializer>>,
    storage: Option<Arc<dyn EntryStorage>>,
    matcher_override: Option<PathMatcher>,
}

impl RequestlogsBuilder {
    /// Set the configuration (default: [`RequestlogsConfig::default`])
    pub fn config(mut self, config: RequestlogsConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the record serializer (default: [`BaseEntrySerializer`])
    pub fn serializer(mut self, serializer: impl EntrySerializer + 'static) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Replace the storage backend (default: [`LoggingStorage`])
    pub fn storage(mut self, storage: impl EntryStorage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Shared storage backend handle, for callers that keep their own
    /// reference (e.g. an in-memory store inspected by tests)
    pub fn storage_arc(mut self, storage: Arc<dyn EntryStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Replace the whole skip-by-path predicate, overriding the configured
    /// `ignore_paths` patterns
    pub fn ignore_paths(mut self, matcher: PathMatcher) -> Self {
        self.matcher_override = Some(matcher);
        self
    }

    /// Compile the configuration and assemble the pipeline.
    ///
    /// Fails fast on invalid options; nothing is deferred to request time.
    pub fn build(self) -> Result<Requestlogs> {
        Ok(Requestlogs {
            config: SharedConfig::new(self.config.unwrap_or_default())?,
            serializer: self
                .serializer
                .unwrap_or_else(|| Arc::new(BaseEntrySerializer)),
            storage: self.storage.unwrap_or_else(|| Arc::new(LoggingStorage)),
            matcher_override: self.matcher_override,
        })
    }
}

/// Middleware driving the capture/finalize pipeline for one exchange.
///
/// Apply with `axum::middleware::from_fn_with_state`. Ineligible methods
/// bypass everything; eligible exchanges run inside a correlation-id scope
/// and a `request` tracing span, and are finalized with whatever response
/// comes back, fault responses included.
pub async fn requestlogs_middleware(
    State(pipeline): State<Requestlogs>,
    mut request: Request,
    next: Next,
) -> Response {
    let config = pipeline.config.snapshot();
    if !config.methods.contains(request.method().as_str()) {
        return next.run(request).await;
    }

    let inbound_id = config
        .request_id_header
        .as_ref()
        .and_then(|header| request.headers().get(header))
        .and_then(|value| value.to_str().ok());
    let request_id = correlation::get_or_create(inbound_id);

    let handle = EntryHandle::get_or_create(request.extensions_mut(), &request_id);

    // Context published by layers outside this one is visible on the request;
    // anything produced further in shows up on the response extensions below.
    let ambient_user = request.extensions().get::<AuthenticatedUser>().cloned();
    let action_names = request.extensions().get::<ActionNames>().cloned();
    let handler_action = request.extensions().get::<HandlerAction>().cloned();
    let enriched = request.extensions().get::<ParsedBody>().cloned();
    let peer_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    let (captured, request) = capture_request(request, config.max_body_size).await;

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %captured.method,
        path = %captured.path,
    );
    let response = correlation::scope(request_id.clone(), next.run(request).instrument(span)).await;

    let (mut parts, body) = response.into_parts();
    let ambient_user = parts
        .extensions
        .remove::<AuthenticatedUser>()
        .or(ambient_user);
    let action_names = parts.extensions.remove::<ActionNames>().or(action_names);
    let handler_action = parts
        .extensions
        .remove::<HandlerAction>()
        .or(handler_action);
    let enriched = parts.extensions.remove::<ParsedBody>().or(enriched);
    let response_content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(String::from);

    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    let response_body = (body_bytes.len() <= config.max_body_size).then(|| body_bytes.clone());

    let client_ip = resolve_client_ip(
        &captured.headers,
        config.trusted_proxy_header.as_ref(),
        peer_addr,
    );

    let ctx = FinalizeContext {
        captured,
        enriched,
        status: parts.status,
        response_body,
        response_content_type,
        ambient_user,
        action_names,
        handler_action,
        client_ip,
    };

    if let Err(error) = handle.finalize(
        ctx,
        &config,
        pipeline.matcher_override.as_ref(),
        &*pipeline.serializer,
        &*pipeline.storage,
    ) {
        // Secondary fault path: the client response is already computed,
        // so report loudly and return it untouched.
        tracing::error!(
            target: "requestlogs",
            request_id = %request_id,
            error = %error,
            "failed to store request log entry"
        );
    }

    Response::from_parts(parts, Body::from(body_bytes))
}

/// Buffer the request body and rebuild the request around the same bytes.
///
/// The captured copy is attached to the snapshot facts only when it fits
/// `max_body_size`; the rebuilt request always carries the full body, so the
/// application never observes the capture limit.
async fn capture_request(request: Request, max_body_size: usize) -> (CapturedRequest, Request) {
    let (parts, body) = request.into_parts();
    let mut captured = CapturedRequest::new(parts.method.clone(), &parts.uri, parts.headers.clone());

    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    if !bytes.is_empty() && bytes.len() <= max_body_size {
        captured.body = Some(bytes.clone());
    }
    (captured, Request::from_parts(parts, Body::from(bytes)))
}

/// Resolve the client-facing address: first hop of the trusted proxy header
/// when configured and present, otherwise the direct peer.
fn resolve_client_ip(
    headers: &HeaderMap,
    trusted_proxy_header: Option<&HeaderName>,
    peer_addr: Option<String>,
) -> Option<String> {
    if let Some(header) = trusted_proxy_header {
        if let Some(forwarded) = headers.get(header).and_then(|value| value.to_str().ok()) {
            let first_hop = forwarded.split(',').next().unwrap_or(forwarded).trim();
            if !first_hop.is_empty() {
                return Some(first_hop.to_string());
            }
        }
    }
    peer_addr
}

/// Per-route layer declaring the action-name mapping consulted at finalize
/// time.
///
/// ```rust,ignore
/// Router::new().route(
///     "/",
///     get(handler).layer(action_names([("get", "get-some-resources")])),
/// )
/// ```
pub fn action_names<I, K, V>(pairs: I) -> AnnotateLayer
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    AnnotateLayer {
        names: Some(ActionNames::new(pairs)),
        action: None,
    }
}

/// Per-route layer naming the action the handler performs, matched against
/// the route's [`action_names`] mapping before the method fallback
pub fn handler_action(action: impl Into<String>) -> AnnotateLayer {
    AnnotateLayer {
        names: None,
        action: Some(HandlerAction(action.into())),
    }
}

/// Mask the configured secret headers for inner `tower_http::trace` layers.
///
/// This is unrelated to the stored record (snapshots mask secrets
/// themselves); it keeps ad-hoc request traces inside the stack from leaking
/// credentials. Invalid names in `secrets` are skipped.
pub fn sensitive_headers_layer<'a>(
    secrets: impl IntoIterator<Item = &'a str>,
) -> SetSensitiveRequestHeadersLayer {
    let headers: Vec<HeaderName> = secrets
        .into_iter()
        .filter_map(|name| HeaderName::from_bytes(name.to_lowercase().as_bytes()).ok())
        .collect();
    SetSensitiveRequestHeadersLayer::new(headers)
}

/// Layer produced by [`action_names`] / [`handler_action`]
///
/// Inserts the annotation into request extensions on the way in, stashes it
/// on the exchange's log entry, and mirrors it into response extensions on
/// the way out, so the pipeline finds it no matter where in the stack the
/// annotation sits and even when a panic-recovery layer replaced the
/// response.
#[derive(Clone, Debug)]
pub struct AnnotateLayer {
    names: Option<ActionNames>,
    action: Option<HandlerAction>,
}

impl AnnotateLayer {
    /// Combine with an action-name mapping
    pub fn with_names<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.names = Some(ActionNames::new(pairs));
        self
    }

    /// Combine with a handler action
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(HandlerAction(action.into()));
        self
    }
}

impl<S> Layer<S> for AnnotateLayer {
    type Service = Annotate<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Annotate {
            inner,
            names: self.names.clone(),
            action: self.action.clone(),
        }
    }
}

/// Service wrapper applying an [`AnnotateLayer`]
#[derive(Clone, Debug)]
pub struct Annotate<S> {
    inner: S,
    names: Option<ActionNames>,
    action: Option<HandlerAction>,
}

impl<S> Service<Request> for Annotate<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = std::result::Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), S::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        if let Some(names) = &self.names {
            request.extensions_mut().insert(names.clone());
        }
        if let Some(action) = &self.action {
            request.extensions_mut().insert(action.clone());
        }
        // Stash on the entry too: a panicking handler loses its response
        // extensions to the recovery layer, the entry keeps the annotation.
        if let Some(handle) = request
            .extensions()
            .get::<EntrySlot>()
            .and_then(EntrySlot::entry)
        {
            if let Some(names) = &self.names {
                handle.set_action_names(names.clone());
            }
            if let Some(action) = &self.action {
                handle.set_handler_action(action.clone());
            }
        }
        let names = self.names.clone();
        let action = self.action.clone();
        let future = self.inner.call(request);
        Box::pin(async move {
            let mut response = future.await?;
            if let Some(names) = names {
                response.extensions_mut().insert(names);
            }
            if let Some(action) = action {
                response.extensions_mut().insert(action);
            }
            Ok(response)
        })
    }
}
