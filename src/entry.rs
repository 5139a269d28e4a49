//! The per-exchange log entry
//!
//! One [`LogEntry`] accumulates audit facts over the lifetime of a single
//! HTTP exchange and decides, at finalize time, whether the exchange is
//! persisted. The entry is owned through a shared [`EntryHandle`] that the
//! middleware publishes into request extensions, so application code deep in
//! the call stack can reach the same entry (for example to pin the
//! authenticated user).
//!
//! State machine: `Open` while the exchange is in flight, then exactly one
//! transition to `Stored` or `Skipped` when the middleware finalizes with
//! the response. A second finalize attempt is a logged no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Extensions, StatusCode};
use serde_json::Value;

use crate::config::CompiledConfig;
use crate::error::Result;
use crate::matcher::PathMatcher;
use crate::serializer::EntrySerializer;
use crate::snapshot::{CapturedRequest, ParsedBody, RequestSnapshot, ResponseSnapshot};
use crate::storage::EntryStorage;

/// Identity recorded for the exchange's caller
///
/// Absence of authentication is a normal state, not an error: both fields
/// stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInfo {
    /// Primary key of the authenticated user, if any
    pub id: Option<Value>,
    /// Username of the authenticated user, if any
    pub username: Option<String>,
}

/// Extension published by the host's authentication layer
///
/// The entry resolves its user from this extension unless application code
/// overrode it through [`EntryHandle::set_user`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Primary key
    pub id: Value,
    /// Username
    pub username: Option<String>,
}

impl From<AuthenticatedUser> for UserInfo {
    fn from(user: AuthenticatedUser) -> Self {
        Self {
            id: Some(user.id),
            username: user.username,
        }
    }
}

/// Declared mapping from handler action (or lower-cased method) to the
/// human-readable action name stored in the record
#[derive(Debug, Clone, Default)]
pub struct ActionNames(HashMap<String, String>);

impl ActionNames {
    /// Build a mapping from `(key, name)` pairs
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }
}

/// Extension naming the action the resolved handler is performing
/// (for example `"list"` or `"retrieve"` on a collection handler)
#[derive(Debug, Clone)]
pub struct HandlerAction(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Open,
    Stored,
    Skipped,
}

#[derive(Debug)]
struct LogEntry {
    correlation_id: String,
    initialized_at: DateTime<Utc>,
    started: Instant,
    user_override: Option<UserInfo>,
    action_names: Option<ActionNames>,
    handler_action: Option<HandlerAction>,
    state: EntryState,
}

/// Shared handle to the exchange's log entry
///
/// Cheap to clone; all clones refer to the same entry.
#[derive(Debug, Clone)]
pub struct EntryHandle {
    inner: Arc<Mutex<LogEntry>>,
}

/// Request-extension slot guaranteeing one entry per exchange
///
/// An empty slot (explicitly attached `None`) does not count as initialized:
/// [`EntryHandle::get_or_create`] re-creates the entry in that case.
#[derive(Debug, Clone, Default)]
pub struct EntrySlot(pub Option<EntryHandle>);

impl EntrySlot {
    /// The entry attached to this exchange, if one exists
    pub fn entry(&self) -> Option<EntryHandle> {
        self.0.clone()
    }
}

/// Everything the middleware gathered for finalization
#[derive(Debug)]
pub struct FinalizeContext {
    /// Raw request facts captured before dispatch
    pub captured: CapturedRequest,
    /// Enriched request body, preferred over the raw capture when present
    pub enriched: Option<ParsedBody>,
    /// Response status
    pub status: StatusCode,
    /// Buffered response body within the capture limit
    pub response_body: Option<Bytes>,
    /// Response content type
    pub response_content_type: Option<String>,
    /// Ambient authenticated user, if the host's auth layer published one
    pub ambient_user: Option<AuthenticatedUser>,
    /// Declared action-name mapping for the matched route
    pub action_names: Option<ActionNames>,
    /// Action the resolved handler reported
    pub handler_action: Option<HandlerAction>,
    /// Resolved client-facing address
    pub client_ip: Option<String>,
}

/// What became of the entry at finalize time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Serialized and handed to the storage backend
    Stored,
    /// Discarded by the skip policy
    Skipped,
}

/// Finalized, immutable record of one exchange, as seen by serializers
#[derive(Debug)]
pub struct FinalizedEntry {
    /// Resolved action name, if a mapping matched
    pub action_name: Option<String>,
    /// Wall time spent since the entry was created
    pub execution_time: Duration,
    /// Exchange completion time
    pub timestamp: DateTime<Utc>,
    /// Client-facing address
    pub ip_address: Option<String>,
    /// Correlation id bound to the exchange
    pub correlation_id: String,
    /// Request view
    pub request: RequestSnapshot,
    /// Response view
    pub response: ResponseSnapshot,
    /// Caller identity
    pub user: UserInfo,
}

impl EntryHandle {
    /// Create a fresh entry in the `Open` state
    pub fn new(correlation_id: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogEntry {
                correlation_id,
                initialized_at: Utc::now(),
                started: Instant::now(),
                user_override: None,
                action_names: None,
                handler_action: None,
                state: EntryState::Open,
            })),
        }
    }

    /// Idempotent lookup-or-create against the exchange's extension slot.
    ///
    /// Repeated calls for the same exchange return the same entry; an empty
    /// slot triggers re-creation rather than being mistaken for an existing
    /// entry.
    pub fn get_or_create(extensions: &mut Extensions, correlation_id: &str) -> Self {
        if let Some(handle) = extensions.get::<EntrySlot>().and_then(EntrySlot::entry) {
            return handle;
        }
        let handle = Self::new(correlation_id.to_string());
        extensions.insert(EntrySlot(Some(handle.clone())));
        handle
    }

    /// The correlation id this entry was created with
    pub fn correlation_id(&self) -> String {
        self.lock().correlation_id.clone()
    }

    /// Moment the entry was created
    pub fn initialized_at(&self) -> DateTime<Utc> {
        self.lock().initialized_at
    }

    /// Pin the caller identity for this entry, overriding ambient resolution
    /// permanently. Ignored (with a warning) once the entry is finalized.
    pub fn set_user(&self, user: UserInfo) {
        let mut entry = self.lock();
        if entry.state != EntryState::Open {
            tracing::warn!(
                target: "requestlogs",
                correlation_id = %entry.correlation_id,
                "set_user after finalize is ignored"
            );
            return;
        }
        entry.user_override = Some(user);
    }

    /// Record the route's action-name mapping on the entry.
    ///
    /// The annotation layer calls this before the handler runs, so the
    /// mapping survives even when the handler panics and the response is
    /// fabricated by a panic-recovery layer.
    pub fn set_action_names(&self, names: ActionNames) {
        self.lock().action_names = Some(names);
    }

    /// Record the handler's reported action on the entry
    pub fn set_handler_action(&self, action: HandlerAction) {
        self.lock().handler_action = Some(action);
    }

    /// True until the entry has been finalized
    pub fn is_open(&self) -> bool {
        self.lock().state == EntryState::Open
    }

    /// Finalize the exchange: build both snapshots, resolve identity and
    /// action name, evaluate the skip policy, and either hand the serialized
    /// record to `storage` or drop it.
    ///
    /// Degrades gracefully on every resolution gap; the only error that can
    /// come back is a storage failure. A repeat call returns the recorded
    /// outcome without side effects.
    pub fn finalize(
        &self,
        ctx: FinalizeContext,
        config: &CompiledConfig,
        matcher_override: Option<&PathMatcher>,
        serializer: &dyn EntrySerializer,
        storage: &dyn EntryStorage,
    ) -> Result<FinalizeOutcome> {
        let (correlation_id, execution_time, stashed_names, stashed_action) = {
            let mut entry = self.lock();
            match entry.state {
                EntryState::Open => {}
                EntryState::Stored => {
                    tracing::warn!(target: "requestlogs", "finalize called twice; entry already stored");
                    return Ok(FinalizeOutcome::Stored);
                }
                EntryState::Skipped => {
                    tracing::warn!(target: "requestlogs", "finalize called twice; entry already skipped");
                    return Ok(FinalizeOutcome::Skipped);
                }
            }
            // Mark the transition up front so a concurrent or repeated call
            // cannot double-store. The precise outcome is fixed below.
            entry.state = EntryState::Skipped;
            (
                entry.correlation_id.clone(),
                entry.started.elapsed(),
                entry.action_names.take(),
                entry.handler_action.take(),
            )
        };

        let user = self
            .lock()
            .user_override
            .clone()
            .or_else(|| ctx.ambient_user.clone().map(UserInfo::from))
            .unwrap_or_default();

        let request = RequestSnapshot::build(&ctx.captured, ctx.enriched.as_ref(), &config.secrets);
        let response = ResponseSnapshot::build(
            ctx.status,
            ctx.response_content_type.as_deref(),
            ctx.response_body.as_ref(),
            &config.secrets,
        );

        let matcher = matcher_override.unwrap_or(&config.ignore_paths);
        if skip_by_user(config, &user) || matcher.matches(&request.path) {
            tracing::debug!(
                target: "requestlogs",
                correlation_id = %correlation_id,
                path = %request.path,
                "entry skipped by policy"
            );
            return Ok(FinalizeOutcome::Skipped);
        }

        // Context values come off the response; the entry's own stash covers
        // fault responses that lost their extensions.
        let action_names = ctx.action_names.or(stashed_names);
        let handler_action = ctx.handler_action.or(stashed_action);
        let action_name = resolve_action_name(
            action_names.as_ref(),
            handler_action.as_ref().map(|a| a.0.as_str()),
            &request.method,
        );

        let finalized = FinalizedEntry {
            action_name,
            execution_time,
            timestamp: Utc::now(),
            ip_address: ctx.client_ip,
            correlation_id,
            request,
            response,
            user,
        };

        let record = serializer.serialize(&finalized, config);
        storage.store(record)?;
        self.lock().state = EntryState::Stored;
        Ok(FinalizeOutcome::Stored)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogEntry> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Skip when the configured user field's resolved value is in the ignore list
fn skip_by_user(config: &CompiledConfig, user: &UserInfo) -> bool {
    let Some(field) = config.ignore_user_field.as_deref() else {
        return false;
    };
    let value = match field {
        "id" => user.id.clone().unwrap_or(Value::Null),
        "username" => user
            .username
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    };
    config.ignore_users.contains(&value)
}

/// Try the handler's reported action first, then the lower-cased method
fn resolve_action_name(
    names: Option<&ActionNames>,
    action: Option<&str>,
    method: &str,
) -> Option<String> {
    let names = names?;
    if let Some(action) = action {
        if let Some(name) = names.get(action) {
            return Some(name.clone());
        }
    }
    names.get(&method.to_lowercase()).cloned()
}
