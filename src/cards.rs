#[cfg(feature = "web")]
use crate::api::{AdminUser, ApiJson, ApiResult, AuthUser, ok};
#[cfg(feature = "web")]
use crate::app::SharedState;
use crate::error::{ServiceError, ServiceResult};
use crate::lessons::{check_title, ensure_visible};
use crate::media;
use crate::models::{Card, CardContent, Id, Role, SandboxWidget};
use crate::store::Store;
#[cfg(feature = "web")]
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path as FsPath;

/// Card creation form
#[derive(Debug, Serialize, Deserialize)]
pub struct NewCard {
    pub title: String,
    pub content: CardContent,
}

/// Partial card update
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CardUpdate {
    pub title: Option<String>,
    pub content: Option<CardContent>,
}

/// New order of a lesson's cards, as a full list of card ids
#[derive(Debug, Serialize, Deserialize)]
pub struct CardOrder {
    pub ids: Vec<Id>,
}

/// Validate card content coming from an admin
///
/// Media ids are owned by the media service, so incoming educational
/// content may only keep ids that already belong to this card.
fn check_content(content: &CardContent, allowed_media: &[Id]) -> ServiceResult<()> {
    match content {
        CardContent::Educational { media, .. } => {
            if media.iter().any(|id| !allowed_media.contains(id)) {
                return Err(ServiceError::validation(
                    "media must be uploaded through the media endpoint",
                ));
            }
            Ok(())
        }
        CardContent::Test { pass_percent } if *pass_percent > 100 => {
            Err(ServiceError::validation("pass_percent must be at most 100"))
        }
        CardContent::Test { .. } => Ok(()),
        CardContent::Sandbox { widget } => match widget {
            SandboxWidget::Fractal { preset } => preset
                .validate()
                .map_err(|e| ServiceError::validation(e.to_string())),
            SandboxWidget::Shapes { shapes } if shapes.len() > 1000 => {
                Err(ServiceError::validation("at most 1000 shapes per card"))
            }
            _ => Ok(()),
        },
    }
}

pub fn list_cards(store: &Store, lesson_id: Id, role: Role) -> ServiceResult<Vec<Card>> {
    ensure_visible(store, lesson_id, role)?;
    Ok(store.read(|db| db.cards_of(lesson_id).into_iter().cloned().collect()))
}

pub fn get_card(store: &Store, id: Id, role: Role) -> ServiceResult<Card> {
    let card = store.read(|db| db.card(id).cloned())?;
    ensure_visible(store, card.lesson_id, role)?;
    Ok(card)
}

/// Append a card at the end of a lesson
pub fn create_card(store: &Store, lesson_id: Id, form: NewCard) -> ServiceResult<Card> {
    let title = check_title(&form.title)?;
    check_content(&form.content, &[])?;

    let card = store.write(|db| {
        db.lesson(lesson_id)?;
        let position = db.cards_of(lesson_id).len() as u32;
        let card = Card {
            id: db.next_id(),
            lesson_id,
            position,
            title,
            content: form.content,
        };
        db.cards.insert(card.id, card.clone());
        Ok(card)
    })?;

    log::info!(
        "created {:?} card {} in lesson {}",
        card.content.kind(),
        card.id,
        lesson_id
    );
    Ok(card)
}

/// Update title and/or content of a card
///
/// Changing the kind of a card drops what only made sense for the old
/// kind: questions of a former test card, media of a former educational card.
pub fn update_card(
    store: &Store,
    media_dir: &FsPath,
    id: Id,
    update: CardUpdate,
) -> ServiceResult<Card> {
    let title = update.title.as_deref().map(check_title).transpose()?;

    let (card, removed) = store.write(|db| {
        let current = db.card(id)?.clone();
        let mut removed = Vec::new();

        let mut card = current.clone();
        if let Some(title) = title {
            card.title = title;
        }
        if let Some(content) = update.content {
            let owned: Vec<Id> = match &current.content {
                CardContent::Educational { media, .. } => media.clone(),
                _ => Vec::new(),
            };
            check_content(&content, &owned)?;

            if current.content.kind() != content.kind() {
                let question_ids: Vec<Id> = db.questions_of(id).iter().map(|q| q.id).collect();
                for question_id in question_ids {
                    db.remove_question(question_id);
                }
                db.attempts.retain(|a| a.card_id != id);
            }

            // Media dropped from the list are deleted for good.
            let kept: Vec<Id> = match &content {
                CardContent::Educational { media, .. } => media.clone(),
                _ => Vec::new(),
            };
            for media_id in owned.iter().filter(|m| !kept.contains(m)) {
                if let Some(file) = db.media.remove(media_id) {
                    removed.push(file);
                }
            }
            card.content = content;
        }

        db.cards.insert(id, card.clone());
        Ok((card, removed))
    })?;

    media::remove_files(media_dir, &removed);
    Ok(card)
}

pub fn delete_card(store: &Store, media_dir: &FsPath, id: Id) -> ServiceResult<()> {
    let removed = store.write(|db| {
        db.card(id)?;
        Ok(db.remove_card(id))
    })?;

    media::remove_files(media_dir, &removed);
    log::info!("deleted card {}", id);
    Ok(())
}

/// Reorder the cards of a lesson
///
/// # Errors
/// * `Validation` unless `ids` is a permutation of the lesson's card ids
pub fn reorder_cards(store: &Store, lesson_id: Id, ids: &[Id]) -> ServiceResult<Vec<Card>> {
    store.write(|db| {
        db.lesson(lesson_id)?;
        let current: BTreeSet<Id> = db.cards_of(lesson_id).iter().map(|c| c.id).collect();
        let requested: BTreeSet<Id> = ids.iter().copied().collect();

        if requested.len() != ids.len() || requested != current {
            return Err(ServiceError::validation(
                "ids must list every card of the lesson exactly once",
            ));
        }

        for (position, id) in ids.iter().enumerate() {
            if let Some(card) = db.cards.get_mut(id) {
                card.position = position as u32;
            }
        }

        Ok(db.cards_of(lesson_id).into_iter().cloned().collect())
    })
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
pub async fn handle_list_cards(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(lesson_id): Path<Id>,
) -> ApiResult<Vec<Card>> {
    ok(list_cards(&state.store, lesson_id, caller.user.role)?)
}

#[cfg(feature = "web")]
pub async fn handle_get_card(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<Id>,
) -> ApiResult<Card> {
    ok(get_card(&state.store, id, caller.user.role)?)
}

#[cfg(feature = "web")]
pub async fn handle_create_card(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(lesson_id): Path<Id>,
    ApiJson(form): ApiJson<NewCard>,
) -> ApiResult<Card> {
    ok(create_card(&state.store, lesson_id, form)?)
}

#[cfg(feature = "web")]
pub async fn handle_update_card(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Id>,
    ApiJson(update): ApiJson<CardUpdate>,
) -> ApiResult<Card> {
    ok(update_card(
        &state.store,
        &state.config.media_dir(),
        id,
        update,
    )?)
}

#[cfg(feature = "web")]
pub async fn handle_delete_card(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<bool> {
    delete_card(&state.store, &state.config.media_dir(), id)?;
    ok(true)
}

#[cfg(feature = "web")]
pub async fn handle_reorder_cards(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(lesson_id): Path<Id>,
    ApiJson(order): ApiJson<CardOrder>,
) -> ApiResult<Vec<Card>> {
    ok(reorder_cards(&state.store, lesson_id, &order.ids)?)
}
