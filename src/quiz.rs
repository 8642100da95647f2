#[cfg(feature = "web")]
use crate::api::{AdminUser, ApiError, ApiJson, ApiResult, AuthUser, ok};
#[cfg(feature = "web")]
use crate::app::SharedState;
use crate::error::{ServiceError, ServiceResult};
use crate::importer;
use crate::lessons::ensure_visible;
use crate::models::{Answer, Attempt, CardContent, Id, Question, Role};
use crate::store::{Database, Store};
#[cfg(feature = "web")]
use axum::extract::{Path, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const MAX_QUESTION_LEN: usize = 2000;

/// One answer option of a question form
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAnswer {
    pub text: String,
    pub correct: bool,
}

/// Question creation form
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewQuestion {
    pub text: String,
    #[serde(default)]
    pub multiple: bool,
    pub answers: Vec<NewAnswer>,
}

/// Answer as shown to a client; `correct` is hidden from students
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerView {
    pub id: Id,
    pub text: String,
    pub correct: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: Id,
    pub text: String,
    pub multiple: bool,
    pub answers: Vec<AnswerView>,
}

/// A student's selections: question id -> chosen answer ids
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TestSubmission {
    pub answers: BTreeMap<Id, Vec<Id>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionResult {
    pub question_id: Id,
    pub correct: bool,
}

/// Outcome of grading a test card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub score: u32,
    pub max_score: u32,
    pub percent: f64,
    pub passed: bool,
    pub questions: Vec<QuestionResult>,
}

/// Check a question form
///
/// # Errors
/// * `Validation` for empty text, fewer than two answers, no correct
///   answer, or several correct answers on a single-choice question
pub fn check_question(form: &NewQuestion) -> ServiceResult<()> {
    let text = form.text.trim();
    if text.is_empty() {
        return Err(ServiceError::validation("question text cannot be empty"));
    }
    if text.chars().count() > MAX_QUESTION_LEN {
        return Err(ServiceError::validation("question text is too long"));
    }
    if form.answers.len() < 2 {
        return Err(ServiceError::validation("a question needs at least two answers"));
    }
    if form.answers.iter().any(|a| a.text.trim().is_empty()) {
        return Err(ServiceError::validation("answer text cannot be empty"));
    }

    let correct = form.answers.iter().filter(|a| a.correct).count();
    if correct == 0 {
        return Err(ServiceError::validation("at least one answer must be correct"));
    }
    if correct > 1 && !form.multiple {
        return Err(ServiceError::validation(
            "single-choice questions need exactly one correct answer",
        ));
    }
    Ok(())
}

fn require_test_card(db: &Database, card_id: Id) -> ServiceResult<u32> {
    match db.card(card_id)?.content {
        CardContent::Test { pass_percent } => Ok(pass_percent),
        _ => Err(ServiceError::validation("card is not a test card")),
    }
}

fn insert_answers(db: &mut Database, question_id: Id, answers: &[NewAnswer]) {
    for answer in answers {
        let id = db.next_id();
        db.answers.insert(
            id,
            Answer {
                id,
                question_id,
                text: answer.text.trim().to_string(),
                correct: answer.correct,
            },
        );
    }
}

fn view(db: &Database, question: &Question, reveal: bool) -> QuestionView {
    QuestionView {
        id: question.id,
        text: question.text.clone(),
        multiple: question.multiple,
        answers: db
            .answers_of(question.id)
            .into_iter()
            .map(|a| AnswerView {
                id: a.id,
                text: a.text.clone(),
                correct: reveal.then_some(a.correct),
            })
            .collect(),
    }
}

/// Questions of a test card with their answers
///
/// # Arguments
/// * `reveal` - Include the `correct` flag of every answer
pub fn list_questions(
    store: &Store,
    card_id: Id,
    role: Role,
    reveal: bool,
) -> ServiceResult<Vec<QuestionView>> {
    let lesson_id = store.read(|db| db.card(card_id).map(|c| c.lesson_id))?;
    ensure_visible(store, lesson_id, role)?;

    store.read(|db| {
        require_test_card(db, card_id)?;
        Ok(db
            .questions_of(card_id)
            .into_iter()
            .map(|q| view(db, q, reveal))
            .collect())
    })
}

pub fn create_question(store: &Store, card_id: Id, form: NewQuestion) -> ServiceResult<QuestionView> {
    check_question(&form)?;

    store.write(|db| {
        require_test_card(db, card_id)?;
        let question = Question {
            id: db.next_id(),
            card_id,
            text: form.text.trim().to_string(),
            multiple: form.multiple,
        };
        db.questions.insert(question.id, question.clone());
        insert_answers(db, question.id, &form.answers);
        Ok(view(db, &question, true))
    })
}

/// Add every question of a CSV document to a test card
///
/// Nothing is stored unless every row is valid.
pub fn import_questions(store: &Store, card_id: Id, csv: &str) -> ServiceResult<Vec<QuestionView>> {
    let forms = importer::parse_questions_csv(csv)?;
    for (index, form) in forms.iter().enumerate() {
        check_question(form)
            .map_err(|e| ServiceError::validation(format!("question {}: {}", index + 1, e)))?;
    }

    let created = store.write(|db| {
        require_test_card(db, card_id)?;
        let mut created = Vec::with_capacity(forms.len());
        for form in &forms {
            let question = Question {
                id: db.next_id(),
                card_id,
                text: form.text.trim().to_string(),
                multiple: form.multiple,
            };
            db.questions.insert(question.id, question.clone());
            insert_answers(db, question.id, &form.answers);
            created.push(view(db, &question, true));
        }
        Ok(created)
    })?;

    log::info!("imported {} questions into card {}", created.len(), card_id);
    Ok(created)
}

/// Replace the text and answers of a question
///
/// Answer ids change, so stored attempts keep only their scores.
pub fn update_question(store: &Store, id: Id, form: NewQuestion) -> ServiceResult<QuestionView> {
    check_question(&form)?;

    store.write(|db| {
        let mut question = db.question(id)?.clone();
        question.text = form.text.trim().to_string();
        question.multiple = form.multiple;

        db.answers.retain(|_, a| a.question_id != id);
        insert_answers(db, id, &form.answers);
        db.questions.insert(id, question.clone());
        Ok(view(db, &question, true))
    })
}

pub fn delete_question(store: &Store, id: Id) -> ServiceResult<()> {
    store.write(|db| {
        db.question(id)?;
        db.remove_question(id);
        Ok(())
    })
}

/// Grade a test card
///
/// A question counts as correct iff the selected answers are exactly its
/// correct answers. The attempt is stored and the card is marked complete.
pub fn submit_test(
    store: &Store,
    user_id: Id,
    card_id: Id,
    role: Role,
    submission: &TestSubmission,
) -> ServiceResult<TestResult> {
    let lesson_id = store.read(|db| db.card(card_id).map(|c| c.lesson_id))?;
    ensure_visible(store, lesson_id, role)?;

    let result = store.write(|db| {
        let pass_percent = require_test_card(db, card_id)?;
        let questions = db.questions_of(card_id);
        if questions.is_empty() {
            return Err(ServiceError::validation("test has no questions"));
        }

        let mut results = Vec::with_capacity(questions.len());
        for question in &questions {
            let expected: BTreeSet<Id> = db
                .answers_of(question.id)
                .into_iter()
                .filter(|a| a.correct)
                .map(|a| a.id)
                .collect();
            let selected: BTreeSet<Id> = submission
                .answers
                .get(&question.id)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            results.push(QuestionResult {
                question_id: question.id,
                correct: selected == expected,
            });
        }

        let max_score = results.len() as u32;
        let score = results.iter().filter(|r| r.correct).count() as u32;
        let percent = score as f64 * 100.0 / max_score as f64;

        db.attempts.push(Attempt {
            user_id,
            card_id,
            score,
            max_score,
            submitted_at: Utc::now(),
        });
        db.completions.insert((user_id, card_id));

        Ok(TestResult {
            score,
            max_score,
            percent,
            passed: percent >= pass_percent as f64,
            questions: results,
        })
    })?;

    log::info!(
        "user {} scored {}/{} on card {}",
        user_id,
        result.score,
        result.max_score,
        card_id
    );
    Ok(result)
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
pub async fn handle_list_questions(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(card_id): Path<Id>,
) -> ApiResult<Vec<QuestionView>> {
    let reveal = caller.is_admin();
    ok(list_questions(&state.store, card_id, caller.user.role, reveal)?)
}

#[cfg(feature = "web")]
pub async fn handle_create_question(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(card_id): Path<Id>,
    ApiJson(form): ApiJson<NewQuestion>,
) -> ApiResult<QuestionView> {
    ok(create_question(&state.store, card_id, form)?)
}

/// Import questions from a CSV request body
#[cfg(feature = "web")]
pub async fn handle_import_questions(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(card_id): Path<Id>,
    body: String,
) -> ApiResult<Vec<QuestionView>> {
    if body.trim().is_empty() {
        return Err(ApiError::from(ServiceError::validation("empty CSV body")));
    }
    ok(import_questions(&state.store, card_id, &body)?)
}

#[cfg(feature = "web")]
pub async fn handle_update_question(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Id>,
    ApiJson(form): ApiJson<NewQuestion>,
) -> ApiResult<QuestionView> {
    ok(update_question(&state.store, id, form)?)
}

#[cfg(feature = "web")]
pub async fn handle_delete_question(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<bool> {
    delete_question(&state.store, id)?;
    ok(true)
}

#[cfg(feature = "web")]
pub async fn handle_submit_test(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(card_id): Path<Id>,
    ApiJson(submission): ApiJson<TestSubmission>,
) -> ApiResult<TestResult> {
    ok(submit_test(
        &state.store,
        caller.user.id,
        card_id,
        caller.user.role,
        &submission,
    )?)
}
