//! Time spent per lesson.
//!
//! The client counts seconds while a lesson is open and flushes them
//! periodically; each flush is added to the stored total.

#[cfg(feature = "web")]
use crate::api::{ApiJson, ApiResult, AuthUser, ok};
#[cfg(feature = "web")]
use crate::app::SharedState;
use crate::error::{ServiceError, ServiceResult};
use crate::lessons::ensure_visible;
use crate::models::{Id, Role, Tracker};
use crate::store::Store;
#[cfg(feature = "web")]
use axum::extract::State;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Longest interval a single flush may report
pub const MAX_FLUSH_SECONDS: u64 = 3600;

#[derive(Debug, Serialize, Deserialize)]
pub struct TrackerPost {
    pub lesson_id: Id,
    pub seconds: u64,
}

/// Add time to a lesson and return the new total in seconds
pub fn record(store: &Store, user_id: Id, lesson_id: Id, role: Role, seconds: u64) -> ServiceResult<u64> {
    if !(1..=MAX_FLUSH_SECONDS).contains(&seconds) {
        return Err(ServiceError::validation(format!(
            "seconds must be between 1 and {}",
            MAX_FLUSH_SECONDS
        )));
    }
    ensure_visible(store, lesson_id, role)?;

    store.write(|db| {
        db.lesson(lesson_id)?;
        let tracker = db
            .trackers
            .entry((user_id, lesson_id))
            .or_insert_with(|| Tracker {
                user_id,
                lesson_id,
                seconds: 0,
                updated_at: Utc::now(),
            });
        tracker.seconds = tracker.seconds.saturating_add(seconds);
        tracker.updated_at = Utc::now();
        Ok(tracker.seconds)
    })
}

/// Every tracker of a user, in lesson id order
pub fn list(store: &Store, user_id: Id) -> Vec<Tracker> {
    store.read(|db| {
        db.trackers
            .range((user_id, Id::MIN)..=(user_id, Id::MAX))
            .map(|(_, t)| t.clone())
            .collect()
    })
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
pub async fn handle_record(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiJson(post): ApiJson<TrackerPost>,
) -> ApiResult<u64> {
    ok(record(
        &state.store,
        caller.user.id,
        post.lesson_id,
        caller.user.role,
        post.seconds,
    )?)
}

#[cfg(feature = "web")]
pub async fn handle_list(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> ApiResult<Vec<Tracker>> {
    ok(list(&state.store, caller.user.id))
}
