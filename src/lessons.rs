#[cfg(feature = "web")]
use crate::api::{AdminUser, ApiJson, ApiResult, AuthUser, ok};
#[cfg(feature = "web")]
use crate::app::SharedState;
use crate::error::{ServiceError, ServiceResult};
use crate::media;
use crate::models::{Card, Id, Lesson, Role};
use crate::store::Store;
#[cfg(feature = "web")]
use axum::extract::{Path, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;

const MAX_TITLE_LEN: usize = 200;

/// Lesson creation form
#[derive(Debug, Serialize, Deserialize)]
pub struct NewLesson {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub published: bool,
}

/// Partial lesson update; absent fields are left untouched
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LessonUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub published: Option<bool>,
}

/// A lesson together with its cards in order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonView {
    pub lesson: Lesson,
    pub cards: Vec<Card>,
}

pub(crate) fn check_title(title: &str) -> ServiceResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ServiceError::validation("title cannot be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ServiceError::validation(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}

fn visible(lesson: &Lesson, role: Role) -> bool {
    lesson.published || role == Role::Admin
}

/// Lessons the viewer may see, in id order
pub fn list_lessons(store: &Store, role: Role) -> Vec<Lesson> {
    store.read(|db| {
        db.lessons
            .values()
            .filter(|lesson| visible(lesson, role))
            .cloned()
            .collect()
    })
}

/// Fetch a lesson and its cards
///
/// Unpublished lessons look missing to students.
pub fn get_lesson(store: &Store, id: Id, role: Role) -> ServiceResult<LessonView> {
    store.read(|db| {
        let lesson = db.lesson(id)?;
        if !visible(lesson, role) {
            return Err(ServiceError::NotFound("lesson"));
        }
        Ok(LessonView {
            lesson: lesson.clone(),
            cards: db.cards_of(id).into_iter().cloned().collect(),
        })
    })
}

/// Check that a student may look at content of this lesson
pub(crate) fn ensure_visible(store: &Store, lesson_id: Id, role: Role) -> ServiceResult<()> {
    store.read(|db| {
        let lesson = db.lesson(lesson_id)?;
        if visible(lesson, role) {
            Ok(())
        } else {
            Err(ServiceError::NotFound("lesson"))
        }
    })
}

pub fn create_lesson(store: &Store, form: NewLesson) -> ServiceResult<Lesson> {
    let title = check_title(&form.title)?;

    let lesson = store.write(|db| {
        let now = Utc::now();
        let lesson = Lesson {
            id: db.next_id(),
            title,
            description: form.description.trim().to_string(),
            published: form.published,
            created_at: now,
            updated_at: now,
        };
        db.lessons.insert(lesson.id, lesson.clone());
        Ok(lesson)
    })?;

    log::info!("created lesson {} '{}'", lesson.id, lesson.title);
    Ok(lesson)
}

pub fn update_lesson(store: &Store, id: Id, update: LessonUpdate) -> ServiceResult<Lesson> {
    let title = update.title.as_deref().map(check_title).transpose()?;

    store.write(|db| {
        let lesson = db
            .lessons
            .get_mut(&id)
            .ok_or(ServiceError::NotFound("lesson"))?;
        if let Some(title) = title {
            lesson.title = title;
        }
        if let Some(description) = update.description {
            lesson.description = description.trim().to_string();
        }
        if let Some(published) = update.published {
            lesson.published = published;
        }
        lesson.updated_at = Utc::now();
        Ok(lesson.clone())
    })
}

/// Delete a lesson and everything attached to it
///
/// # Arguments
/// * `store` - Database handle
/// * `media_dir` - Directory holding uploaded files of the lesson's cards
/// * `id` - Lesson to delete
pub fn delete_lesson(store: &Store, media_dir: &FsPath, id: Id) -> ServiceResult<()> {
    let removed = store.write(|db| {
        db.lesson(id)?;
        Ok(db.remove_lesson(id))
    })?;

    media::remove_files(media_dir, &removed);
    log::info!("deleted lesson {} ({} media files)", id, removed.len());
    Ok(())
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
pub async fn handle_list_lessons(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> ApiResult<Vec<Lesson>> {
    ok(list_lessons(&state.store, caller.user.role))
}

#[cfg(feature = "web")]
pub async fn handle_get_lesson(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<Id>,
) -> ApiResult<LessonView> {
    ok(get_lesson(&state.store, id, caller.user.role)?)
}

#[cfg(feature = "web")]
pub async fn handle_create_lesson(
    State(state): State<SharedState>,
    _admin: AdminUser,
    ApiJson(form): ApiJson<NewLesson>,
) -> ApiResult<Lesson> {
    ok(create_lesson(&state.store, form)?)
}

#[cfg(feature = "web")]
pub async fn handle_update_lesson(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Id>,
    ApiJson(update): ApiJson<LessonUpdate>,
) -> ApiResult<Lesson> {
    ok(update_lesson(&state.store, id, update)?)
}

#[cfg(feature = "web")]
pub async fn handle_delete_lesson(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<bool> {
    delete_lesson(&state.store, &state.config.media_dir(), id)?;
    ok(true)
}
