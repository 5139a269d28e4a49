//! Per-exchange correlation id propagation
//!
//! Every logged exchange carries an opaque id that also appears in log
//! statements issued anywhere during request handling, without threading a
//! parameter through call signatures. The id lives in a `task_local!` slot
//! scoped to the exchange's future: it is installed when the middleware
//! starts driving the inner service and torn down automatically when that
//! future completes, so concurrent exchanges on a shared runtime never
//! observe each other's ids.
//!
//! A caller-supplied id (from the configured inbound header) is reused
//! verbatim when it parses as a UUID, enabling trace propagation across
//! service boundaries; anything else falls back to generation.

use std::future::Future;

use uuid::Uuid;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Reuse a valid explicit id, otherwise generate a fresh one.
///
/// The validity rule is "anything `uuid` can parse": canonical hyphenated,
/// simple 32-hex, urn and braced forms are all accepted and echoed verbatim.
/// Malformed input falls back to generation, never an error. Generated ids
/// are random v4 UUIDs in simple (32 lowercase hex) form.
pub fn get_or_create(explicit: Option<&str>) -> String {
    match explicit {
        Some(id) if Uuid::try_parse(id).is_ok() => id.to_string(),
        _ => Uuid::new_v4().simple().to_string(),
    }
}

/// Run a future with `id` installed as the ambient correlation id.
///
/// The slot is removed when the future completes, including on panic or
/// cancellation; nothing leaks into the next exchange scheduled on the same
/// worker.
pub async fn scope<F: Future>(id: String, fut: F) -> F::Output {
    REQUEST_ID.scope(id, fut).await
}

/// The correlation id of the exchange currently being handled, if any
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

/// The current correlation id, or an empty string outside any exchange.
///
/// Intended for log formatting call sites that must never fail.
pub fn request_id_or_empty() -> String {
    current_request_id().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_explicit_id_reused_verbatim() {
        let id = "6359abe9f7d849e09a324791c6a6c976";
        assert_eq!(get_or_create(Some(id)), id);

        let hyphenated = "550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(get_or_create(Some(hyphenated)), hyphenated);
    }

    #[test]
    fn test_malformed_explicit_id_falls_back_to_generation() {
        let generated = get_or_create(Some("BAD"));
        assert_ne!(generated, "BAD");
        assert_eq!(generated.len(), 32);
        assert!(generated.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        assert_ne!(get_or_create(None), get_or_create(None));
    }

    #[test]
    fn test_no_active_scope_yields_empty() {
        assert_eq!(current_request_id(), None);
        assert_eq!(request_id_or_empty(), "");
    }

    #[tokio::test]
    async fn test_scope_exposes_id_and_tears_down() {
        let seen = scope("abc123".to_string(), async { request_id_or_empty() }).await;
        assert_eq!(seen, "abc123");
        assert_eq!(current_request_id(), None);
    }

    #[tokio::test]
    async fn test_concurrent_scopes_are_isolated() {
        let a = tokio::spawn(scope("id-a".to_string(), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            request_id_or_empty()
        }));
        let b = tokio::spawn(scope("id-b".to_string(), async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            request_id_or_empty()
        }));
        assert_eq!(a.await.unwrap(), "id-a");
        assert_eq!(b.await.unwrap(), "id-b");
    }

    #[tokio::test]
    async fn test_nested_scope_shadows_then_restores() {
        scope("outer".to_string(), async {
            assert_eq!(request_id_or_empty(), "outer");
            scope("inner".to_string(), async {
                assert_eq!(request_id_or_empty(), "inner");
            })
            .await;
            assert_eq!(request_id_or_empty(), "outer");
        })
        .await;
    }
}
