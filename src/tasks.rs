#[cfg(feature = "web")]
use crate::api::{AdminUser, ApiJson, ApiResult, AuthUser, ok};
#[cfg(feature = "web")]
use crate::app::SharedState;
use crate::error::{ServiceError, ServiceResult};
use crate::lessons::{check_title, ensure_visible};
use crate::models::{Id, Role, Submission, Task};
use crate::store::Store;
#[cfg(feature = "web")]
use axum::extract::{Path, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};

const MAX_SUBMISSION_LEN: usize = 20_000;
const DEFAULT_MAX_POINTS: u32 = 10;

fn default_max_points() -> u32 {
    DEFAULT_MAX_POINTS
}

/// Task creation form
#[derive(Debug, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_max_points")]
    pub max_points: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub max_points: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmissionForm {
    pub content: String,
}

/// Grade given by an admin
#[derive(Debug, Serialize, Deserialize)]
pub struct Review {
    pub score: u32,
    #[serde(default)]
    pub feedback: Option<String>,
}

fn check_max_points(max_points: u32) -> ServiceResult<()> {
    if max_points == 0 {
        return Err(ServiceError::validation("max_points must be positive"));
    }
    Ok(())
}

pub fn list_tasks(store: &Store, lesson_id: Id, role: Role) -> ServiceResult<Vec<Task>> {
    ensure_visible(store, lesson_id, role)?;
    Ok(store.read(|db| db.tasks_of(lesson_id).into_iter().cloned().collect()))
}

pub fn create_task(store: &Store, lesson_id: Id, form: NewTask) -> ServiceResult<Task> {
    let title = check_title(&form.title)?;
    check_max_points(form.max_points)?;

    let task = store.write(|db| {
        db.lesson(lesson_id)?;
        let task = Task {
            id: db.next_id(),
            lesson_id,
            title,
            description: form.description.trim().to_string(),
            max_points: form.max_points,
        };
        db.tasks.insert(task.id, task.clone());
        Ok(task)
    })?;

    log::info!("created task {} in lesson {}", task.id, lesson_id);
    Ok(task)
}

/// Update a task
///
/// # Errors
/// * `Conflict` when lowering `max_points` below a score already given
pub fn update_task(store: &Store, id: Id, update: TaskUpdate) -> ServiceResult<Task> {
    let title = update.title.as_deref().map(check_title).transpose()?;
    if let Some(max_points) = update.max_points {
        check_max_points(max_points)?;
    }

    store.write(|db| {
        let mut task = db.task(id)?.clone();
        if let Some(title) = title {
            task.title = title;
        }
        if let Some(description) = update.description {
            task.description = description.trim().to_string();
        }
        if let Some(max_points) = update.max_points {
            let graded_above = db
                .submissions
                .values()
                .any(|s| s.task_id == id && s.score.is_some_and(|score| score > max_points));
            if graded_above {
                return Err(ServiceError::Conflict(
                    "a submission already scored above the new maximum".to_string(),
                ));
            }
            task.max_points = max_points;
        }
        db.tasks.insert(id, task.clone());
        Ok(task)
    })
}

/// Delete a task with its submissions
pub fn delete_task(store: &Store, id: Id) -> ServiceResult<()> {
    store.write(|db| {
        db.task(id)?;
        db.tasks.remove(&id);
        db.submissions.retain(|_, s| s.task_id != id);
        Ok(())
    })?;
    log::info!("deleted task {}", id);
    Ok(())
}

/// Hand in a solution for a task
///
/// A user has at most one unreviewed submission per task: handing in
/// again before the review replaces its content. Reviewed submissions
/// are kept and a new one is opened.
pub fn submit_task(
    store: &Store,
    user_id: Id,
    task_id: Id,
    role: Role,
    content: &str,
) -> ServiceResult<Submission> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ServiceError::validation("submission cannot be empty"));
    }
    if content.chars().count() > MAX_SUBMISSION_LEN {
        return Err(ServiceError::TooLarge);
    }

    let lesson_id = store.read(|db| db.task(task_id).map(|t| t.lesson_id))?;
    ensure_visible(store, lesson_id, role)?;

    let submission = store.write(|db| {
        db.task(task_id)?;
        let pending = db
            .submissions
            .values_mut()
            .find(|s| s.task_id == task_id && s.user_id == user_id && s.score.is_none());

        if let Some(pending) = pending {
            pending.content = content.to_string();
            pending.submitted_at = Utc::now();
            return Ok(pending.clone());
        }

        let submission = Submission {
            id: db.next_id(),
            task_id,
            user_id,
            content: content.to_string(),
            score: None,
            feedback: None,
            submitted_at: Utc::now(),
            reviewed_at: None,
        };
        db.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    })?;

    log::info!("user {} submitted task {}", user_id, task_id);
    Ok(submission)
}

/// Submissions of a task; students only see their own
pub fn list_submissions(
    store: &Store,
    task_id: Id,
    viewer_id: Id,
    role: Role,
) -> ServiceResult<Vec<Submission>> {
    store.read(|db| {
        db.task(task_id)?;
        Ok(db
            .submissions
            .values()
            .filter(|s| s.task_id == task_id)
            .filter(|s| role == Role::Admin || s.user_id == viewer_id)
            .cloned()
            .collect())
    })
}

/// Grade a submission
///
/// # Errors
/// * `Validation` when the score exceeds the task's `max_points`
pub fn review_submission(store: &Store, id: Id, review: Review) -> ServiceResult<Submission> {
    store.write(|db| {
        let task_id = db
            .submissions
            .get(&id)
            .map(|s| s.task_id)
            .ok_or(ServiceError::NotFound("submission"))?;
        let max_points = db.task(task_id)?.max_points;
        if review.score > max_points {
            return Err(ServiceError::validation(format!(
                "score must be at most {}",
                max_points
            )));
        }

        let submission = db
            .submissions
            .get_mut(&id)
            .ok_or(ServiceError::NotFound("submission"))?;
        submission.score = Some(review.score);
        submission.feedback = review
            .feedback
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        submission.reviewed_at = Some(Utc::now());
        Ok(submission.clone())
    })
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
pub async fn handle_list_tasks(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(lesson_id): Path<Id>,
) -> ApiResult<Vec<Task>> {
    ok(list_tasks(&state.store, lesson_id, caller.user.role)?)
}

#[cfg(feature = "web")]
pub async fn handle_create_task(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(lesson_id): Path<Id>,
    ApiJson(form): ApiJson<NewTask>,
) -> ApiResult<Task> {
    ok(create_task(&state.store, lesson_id, form)?)
}

#[cfg(feature = "web")]
pub async fn handle_update_task(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Id>,
    ApiJson(update): ApiJson<TaskUpdate>,
) -> ApiResult<Task> {
    ok(update_task(&state.store, id, update)?)
}

#[cfg(feature = "web")]
pub async fn handle_delete_task(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<bool> {
    delete_task(&state.store, id)?;
    ok(true)
}

#[cfg(feature = "web")]
pub async fn handle_submit_task(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(task_id): Path<Id>,
    ApiJson(form): ApiJson<SubmissionForm>,
) -> ApiResult<Submission> {
    ok(submit_task(
        &state.store,
        caller.user.id,
        task_id,
        caller.user.role,
        &form.content,
    )?)
}

#[cfg(feature = "web")]
pub async fn handle_list_submissions(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(task_id): Path<Id>,
) -> ApiResult<Vec<Submission>> {
    ok(list_submissions(
        &state.store,
        task_id,
        caller.user.id,
        caller.user.role,
    )?)
}

#[cfg(feature = "web")]
pub async fn handle_review_submission(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Id>,
    ApiJson(review): ApiJson<Review>,
) -> ApiResult<Submission> {
    ok(review_submission(&state.store, id, review)?)
}
