#[cfg(feature = "web")]
use crate::api::{ApiResult, AuthUser, ok};
#[cfg(feature = "web")]
use crate::app::SharedState;
use crate::error::{ServiceError, ServiceResult};
use crate::lessons::ensure_visible;
use crate::models::{CardContent, Id, Role};
use crate::store::{Database, Store};
#[cfg(feature = "web")]
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

/// Progress of one user through one lesson
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LessonProgress {
    pub lesson_id: Id,
    pub title: String,
    pub completed_cards: usize,
    pub total_cards: usize,
    pub percent: f64,
    /// Sum of best attempts over the lesson's test cards, each capped at
    /// the card's current question count
    pub score: u32,
    /// Sum of the question counts of those test cards
    pub max_score: u32,
    pub seconds_spent: u64,
}

/// Compute the progress record without touching the lock
pub(crate) fn compute(db: &Database, user_id: Id, lesson_id: Id) -> ServiceResult<LessonProgress> {
    let lesson = db.lesson(lesson_id)?;
    let cards = db.cards_of(lesson_id);

    let completed_cards = cards
        .iter()
        .filter(|c| db.completions.contains(&(user_id, c.id)))
        .count();

    let mut score = 0;
    let mut max_score = 0;
    for card in cards.iter().filter(|c| matches!(c.content, CardContent::Test { .. })) {
        let questions = db.questions_of(card.id).len() as u32;
        max_score += questions;
        // An attempt may predate questions removed since.
        if let Some(best) = db.best_attempt(user_id, card.id) {
            score += best.score.min(questions);
        }
    }

    let percent = if cards.is_empty() {
        0.0
    } else {
        completed_cards as f64 * 100.0 / cards.len() as f64
    };

    Ok(LessonProgress {
        lesson_id,
        title: lesson.title.clone(),
        completed_cards,
        total_cards: cards.len(),
        percent,
        score,
        max_score,
        seconds_spent: db
            .trackers
            .get(&(user_id, lesson_id))
            .map(|t| t.seconds)
            .unwrap_or(0),
    })
}

/// Mark a card as done; completing it twice changes nothing
///
/// Test cards are completed by submitting them, not through this call.
pub fn complete_card(store: &Store, user_id: Id, card_id: Id, role: Role) -> ServiceResult<LessonProgress> {
    let (lesson_id, is_test) = store.read(|db| {
        db.card(card_id)
            .map(|c| (c.lesson_id, matches!(c.content, CardContent::Test { .. })))
    })?;
    ensure_visible(store, lesson_id, role)?;
    if is_test {
        return Err(ServiceError::validation("test cards are completed by submitting them"));
    }

    let done = store.read(|db| db.completions.contains(&(user_id, card_id)));
    if !done {
        store.write(|db| {
            // The card may have been deleted since it was checked.
            db.card(card_id)?;
            db.completions.insert((user_id, card_id));
            Ok(())
        })?;
        log::debug!("user {} completed card {}", user_id, card_id);
    }

    store.read(|db| compute(db, user_id, lesson_id))
}

pub fn lesson_progress(store: &Store, user_id: Id, lesson_id: Id, role: Role) -> ServiceResult<LessonProgress> {
    ensure_visible(store, lesson_id, role)?;
    store.read(|db| compute(db, user_id, lesson_id))
}

/// Progress over every lesson the user can see
pub fn overview(store: &Store, user_id: Id, role: Role) -> Vec<LessonProgress> {
    store.read(|db| {
        db.lessons
            .values()
            .filter(|l| l.published || role == Role::Admin)
            .filter_map(|l| compute(db, user_id, l.id).ok())
            .collect()
    })
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
pub async fn handle_complete_card(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(card_id): Path<Id>,
) -> ApiResult<LessonProgress> {
    ok(complete_card(
        &state.store,
        caller.user.id,
        card_id,
        caller.user.role,
    )?)
}

#[cfg(feature = "web")]
pub async fn handle_lesson_progress(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(lesson_id): Path<Id>,
) -> ApiResult<LessonProgress> {
    ok(lesson_progress(
        &state.store,
        caller.user.id,
        lesson_id,
        caller.user.role,
    )?)
}

#[cfg(feature = "web")]
pub async fn handle_overview(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> ApiResult<Vec<LessonProgress>> {
    ok(overview(&state.store, caller.user.id, caller.user.role))
}
