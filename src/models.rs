//! Persisted entities of the platform.
//!
//! Everything here is stored in the gzip + bincode snapshot, so enums stay
//! externally tagged and no field uses untagged or flattened serde shapes.

use crate::color::Rgb;
use crate::fractal::FractalRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Id = u64;

/// Access level of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
}

/// A registered account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Numeric identifier, assigned in registration order
    pub id: Id,

    /// Unique login name
    pub username: String,

    /// Unique email address, used for password recovery
    pub email: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    pub role: Role,

    /// Password reset code (if a reset has been requested)
    pub reset_code: Option<String>,

    /// Expiration time for the reset code
    pub reset_code_expires: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// Public projection of a user, without credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserView {
    pub id: Id,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        UserView {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lesson {
    pub id: Id,
    pub title: String,
    pub description: String,
    /// Unpublished lessons are only visible to admins
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One content unit of a lesson
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Card {
    pub id: Id,
    pub lesson_id: Id,
    /// Zero-based order within the lesson
    pub position: u32,
    pub title: String,
    pub content: CardContent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CardContent {
    /// Static text plus attached media files
    Educational { body: String, media: Vec<Id> },

    /// Multiple-choice test; questions live in their own table
    Test { pass_percent: u32 },

    /// Interactive widget
    Sandbox { widget: SandboxWidget },
}

impl CardContent {
    pub fn kind(&self) -> CardKind {
        match self {
            CardContent::Educational { .. } => CardKind::Educational,
            CardContent::Test { .. } => CardKind::Test,
            CardContent::Sandbox { .. } => CardKind::Sandbox,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    Educational,
    Test,
    Sandbox,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxWidget {
    /// Shape drawing; the editor itself runs client-side
    Shapes { shapes: Vec<Shape> },

    /// Color-space converter starting from an initial color
    Color { initial: Rgb },

    /// Fractal renderer starting from a preset view
    Fractal { preset: FractalRequest },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Rectangle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        fill: Rgb,
    },
    Circle {
        x: f64,
        y: f64,
        radius: f64,
        fill: Rgb,
    },
    Line {
        from: (f64, f64),
        to: (f64, f64),
        stroke: Rgb,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: Id,
    pub card_id: Id,
    pub text: String,
    /// More than one answer may be correct
    pub multiple: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub id: Id,
    pub question_id: Id,
    pub text: String,
    pub correct: bool,
}

/// A practical assignment attached to a lesson
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Id,
    pub lesson_id: Id,
    pub title: String,
    pub description: String,
    pub max_points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub id: Id,
    pub task_id: Id,
    pub user_id: Id,
    pub content: String,
    pub score: Option<u32>,
    pub feedback: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// One graded submission of a test card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attempt {
    pub user_id: Id,
    pub card_id: Id,
    pub score: u32,
    pub max_score: u32,
    pub submitted_at: DateTime<Utc>,
}

/// Accumulated time a user spent on a lesson
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tracker {
    pub user_id: Id,
    pub lesson_id: Id,
    pub seconds: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub user_id: Id,
    pub display_name: String,
    pub theme: String,
    pub interests: Vec<String>,
    pub avatar_color: Option<String>,
}

/// Metadata of an uploaded file; the bytes live in the media directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaFile {
    pub id: Id,
    pub card_id: Id,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    /// File name inside the media directory
    pub stored_as: String,
}
