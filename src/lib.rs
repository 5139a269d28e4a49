//! # requestlogs
//!
//! Audit logging middleware for axum: one structured, privacy-redacted
//! record per HTTP exchange, emitted when the response is ready.
//!
//! ## Features
//!
//! - **One record per exchange**: request and response snapshots, caller
//!   identity, action name, timing, and client address in a single JSON value
//! - **Secret redaction**: configurable key set masked in bodies, query
//!   parameters, and headers before anything is stored
//! - **Skip policies**: drop exchanges by authenticated user or by path
//!   (exact, wildcard, regex, or custom predicate)
//! - **Correlation ids**: inbound id reuse when valid, ambient propagation
//!   through a task-local scope, `request_id` in the stored record
//! - **Pluggable seams**: serializer and storage backend are traits; the
//!   defaults emit through `tracing`
//! - **Live reconfiguration**: options are swapped atomically, in-flight
//!   exchanges keep the snapshot they started with
//!
//! ## Example
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use requestlogs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Requestlogs::builder()
//!         .config(RequestlogsConfig::load()?)
//!         .serializer(RequestIdEntrySerializer)
//!         .build()?;
//!
//!     let app: Router = Router::new()
//!         .route(
//!             "/",
//!             get(|| async { "hello" })
//!                 .layer(action_names([("get", "get-some-resources")])),
//!         )
//!         .layer(axum::middleware::from_fn_with_state(
//!             pipeline,
//!             requestlogs_middleware,
//!         ));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod correlation;
pub mod entry;
pub mod error;
pub mod matcher;
pub mod middleware;
pub mod redact;
pub mod serializer;
pub mod snapshot;
pub mod storage;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{CompiledConfig, RequestlogsConfig, SharedConfig};
    pub use crate::correlation::{current_request_id, request_id_or_empty};
    pub use crate::entry::{
        ActionNames, AuthenticatedUser, EntryHandle, EntrySlot, FinalizeOutcome, HandlerAction,
        UserInfo,
    };
    pub use crate::error::{Error, Result};
    pub use crate::matcher::{IgnorePath, PathMatcher};
    pub use crate::middleware::{
        action_names, handler_action, requestlogs_middleware, sensitive_headers_layer,
        AnnotateLayer, Requestlogs, RequestlogsBuilder,
    };
    pub use crate::serializer::{
        BaseEntrySerializer, EntrySerializer, RequestIdEntrySerializer,
    };
    pub use crate::snapshot::{ParsedBody, RequestSnapshot, ResponseSnapshot};
    pub use crate::storage::{EntryStorage, LoggingStorage, MemoryStorage};
}
