#[cfg(feature = "web")]
use crate::api::{ApiJson, ApiResult, AuthUser, ok};
#[cfg(feature = "web")]
use crate::app::SharedState;
use crate::color::Rgb;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{Id, Lesson, Profile};
use crate::store::{Database, Store};
#[cfg(feature = "web")]
use axum::extract::State;
use serde::{Deserialize, Serialize};

pub const THEMES: [&str; 3] = ["light", "dark", "system"];
const MAX_INTERESTS: usize = 20;
const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Partial profile update
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub theme: Option<String>,
    pub interests: Option<Vec<String>>,
    /// `#rrggbb`; an empty string clears the color
    pub avatar_color: Option<String>,
}

/// A lesson suggestion with the number of matched interests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub lesson: Lesson,
    pub matches: usize,
}

fn default_profile(db: &Database, user_id: Id) -> ServiceResult<Profile> {
    let user = db.user(user_id)?;
    Ok(Profile {
        user_id,
        display_name: user.username.clone(),
        theme: THEMES[0].to_string(),
        interests: Vec::new(),
        avatar_color: None,
    })
}

/// Profile of a user, falling back to defaults when none was saved
pub fn get_profile(store: &Store, user_id: Id) -> ServiceResult<Profile> {
    store.read(|db| match db.profiles.get(&user_id) {
        Some(profile) => Ok(profile.clone()),
        None => default_profile(db, user_id),
    })
}

fn normalize_interests(interests: Vec<String>) -> ServiceResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for interest in interests {
        let interest = interest.trim().to_lowercase();
        if !interest.is_empty() && !out.contains(&interest) {
            out.push(interest);
        }
    }
    if out.len() > MAX_INTERESTS {
        return Err(ServiceError::validation(format!(
            "at most {} interests",
            MAX_INTERESTS
        )));
    }
    Ok(out)
}

pub fn update_profile(store: &Store, user_id: Id, update: ProfileUpdate) -> ServiceResult<Profile> {
    let display_name = match update.display_name {
        Some(name) => {
            let name = name.trim().to_string();
            if name.is_empty() || name.chars().count() > MAX_DISPLAY_NAME_LEN {
                return Err(ServiceError::validation(format!(
                    "display name must be 1-{} characters",
                    MAX_DISPLAY_NAME_LEN
                )));
            }
            Some(name)
        }
        None => None,
    };

    if let Some(theme) = &update.theme {
        if !THEMES.contains(&theme.as_str()) {
            return Err(ServiceError::validation(format!(
                "theme must be one of {}",
                THEMES.join(", ")
            )));
        }
    }

    let avatar_color = match update.avatar_color.as_deref().map(str::trim) {
        None => None,
        Some("") => Some(None),
        Some(hex) => {
            let rgb = Rgb::from_hex(hex).map_err(|e| ServiceError::validation(e.to_string()))?;
            Some(Some(rgb.to_hex()))
        }
    };

    let interests = update.interests.map(normalize_interests).transpose()?;

    store.write(|db| {
        let mut profile = match db.profiles.get(&user_id) {
            Some(profile) => profile.clone(),
            None => default_profile(db, user_id)?,
        };
        if let Some(name) = display_name {
            profile.display_name = name;
        }
        if let Some(theme) = update.theme {
            profile.theme = theme;
        }
        if let Some(interests) = interests {
            profile.interests = interests;
        }
        if let Some(color) = avatar_color {
            profile.avatar_color = color;
        }
        db.profiles.insert(user_id, profile.clone());
        Ok(profile)
    })
}

/// Published lessons the user has not finished, best interest match first
///
/// A lesson is finished when every card is completed. Ties keep id order.
pub fn recommend_lessons(store: &Store, user_id: Id) -> ServiceResult<Vec<Recommendation>> {
    let profile = get_profile(store, user_id)?;

    Ok(store.read(|db| {
        let mut picks: Vec<Recommendation> = db
            .lessons
            .values()
            .filter(|lesson| lesson.published)
            .filter(|lesson| {
                let cards = db.cards_of(lesson.id);
                cards.is_empty()
                    || !cards
                        .iter()
                        .all(|c| db.completions.contains(&(user_id, c.id)))
            })
            .map(|lesson| {
                let haystack = format!("{} {}", lesson.title, lesson.description).to_lowercase();
                let matches = profile
                    .interests
                    .iter()
                    .filter(|interest| haystack.contains(interest.as_str()))
                    .count();
                Recommendation {
                    lesson: lesson.clone(),
                    matches,
                }
            })
            .collect();

        picks.sort_by(|a, b| b.matches.cmp(&a.matches));
        picks
    }))
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
pub async fn handle_get_profile(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> ApiResult<Profile> {
    ok(get_profile(&state.store, caller.user.id)?)
}

#[cfg(feature = "web")]
pub async fn handle_update_profile(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> ApiResult<Profile> {
    ok(update_profile(&state.store, caller.user.id, update)?)
}

#[cfg(feature = "web")]
pub async fn handle_recommendations(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> ApiResult<Vec<Recommendation>> {
    ok(recommend_lessons(&state.store, caller.user.id)?)
}
