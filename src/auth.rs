#[cfg(feature = "web")]
use crate::api::{AdminUser, ApiError, ApiJson, ApiResult, AuthUser, ok};
#[cfg(feature = "web")]
use crate::app::SharedState;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{Id, Profile, Role, User, UserView};
use crate::store::Store;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
#[cfg(feature = "web")]
use axum::extract::{Path, State};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use uuid::Uuid;

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE: &str = "session";

const RESET_CODE_MINUTES: i64 = 60;
const MIN_PASSWORD_LEN: usize = 6;

lazy_static! {
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap();
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

/// Registration form
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Login form; `login` accepts a username or an email address
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

/// Password reset request data
#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordResetRequest {
    /// Email address to send the reset code to
    pub email: String,
}

/// Password reset confirmation data
#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordResetConfirm {
    pub email: String,
    pub reset_code: String,
    pub new_password: String,
}

/// Password change request data
#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordChangeRequest {
    pub old_password: String,
    pub new_password: String,
    /// Confirmation of the new password (must match new_password)
    pub confirm_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoleUpdate {
    pub role: Role,
}

/// Body returned by a successful login
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserView,
}

/// User session data
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Id,
    pub expires_at: DateTime<Utc>,
}

/// In-memory session storage keyed by token
///
/// Sessions are not persisted: restarting the server logs everybody out.
pub struct SessionCache {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        SessionCache {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Create and store a new session for an authenticated user
    ///
    /// # Returns
    /// * `String` - A unique session token
    pub fn create(&self, user_id: Id) -> String {
        let token = Uuid::new_v4().to_string();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(24));
        let session = Session {
            user_id,
            expires_at: Utc::now()
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, s| s.expires_at > Utc::now());
        sessions.insert(token.clone(), session);
        token
    }

    /// Check that a session exists and has not expired
    ///
    /// # Returns
    /// * `Option<Id>` - The user of the session if valid, None otherwise
    pub fn validate(&self, token: &str) -> Option<Id> {
        {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            match sessions.get(token) {
                Some(session) if session.expires_at > Utc::now() => {
                    return Some(session.user_id);
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired
        self.revoke(token);
        None
    }

    pub fn revoke(&self, token: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(token);
    }

    /// Log a user out everywhere
    pub fn revoke_user(&self, user_id: Id) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, s| s.user_id != user_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hash a password using Argon2
///
/// # Errors
/// * Returns an error if the password hashing fails
fn hash_password(password: &str) -> ServiceResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err(ServiceError::Storage("password hashing failed".to_string())),
    }
}

/// Verify a password against a stored hash
///
/// # Returns
/// * `ServiceResult<bool>` - True if the password matches, false if not
///
/// # Errors
/// * Returns an error if the hash is in an invalid format
fn verify_password(password: &str, hash: &str) -> ServiceResult<bool> {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(hash) => hash,
        Err(_) => return Err(ServiceError::Storage("invalid password hash format".to_string())),
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false), // Password didn't match
    }
}

fn check_password(password: &str) -> ServiceResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Generate an 8-character reset code from `A-Z0-9`
pub fn generate_reset_code() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();

    (0..8)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Register a new user
///
/// The password is hashed before storage. The very first account becomes
/// an admin so a fresh installation can be managed.
///
/// # Arguments
/// * `store` - Database handle
/// * `username` - Unique username for the new account
/// * `email` - Unique email address
/// * `password` - Plain text password (will be hashed)
///
/// # Errors
/// * `Validation` if a field is empty or malformed
/// * `Conflict` if the username or email is already in use
pub fn register(store: &Store, username: &str, email: &str, password: &str) -> ServiceResult<User> {
    let username = username.trim();
    let email = email.trim().to_lowercase();

    if username.is_empty() || password.is_empty() || email.is_empty() {
        return Err(ServiceError::validation(
            "username, email and password cannot be empty",
        ));
    }
    if !USERNAME_REGEX.is_match(username) {
        return Err(ServiceError::validation(
            "username must be 3-32 characters of letters, digits, '_', '.' or '-'",
        ));
    }
    if !EMAIL_REGEX.is_match(&email) {
        return Err(ServiceError::validation("invalid email address"));
    }
    check_password(password)?;

    // Hashed before taking the write lock.
    let password_hash = hash_password(password)?;

    let user = store.write(|db| {
        if db
            .users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(username))
        {
            return Err(ServiceError::Conflict("username already exists".to_string()));
        }
        if db.users.values().any(|u| u.email == email) {
            return Err(ServiceError::Conflict(
                "email address is already registered".to_string(),
            ));
        }

        let role = if db.users.is_empty() {
            Role::Admin
        } else {
            Role::Student
        };

        let user = User {
            id: db.next_id(),
            username: username.to_string(),
            email: email.clone(),
            password_hash,
            role,
            reset_code: None,
            reset_code_expires: None,
            created_at: Utc::now(),
        };
        db.profiles.insert(
            user.id,
            Profile {
                user_id: user.id,
                display_name: user.username.clone(),
                theme: "light".to_string(),
                interests: Vec::new(),
                avatar_color: None,
            },
        );
        db.users.insert(user.id, user.clone());
        Ok(user)
    })?;

    log::info!("registered user {} ({:?})", user.username, user.role);
    Ok(user)
}

/// Verify credentials given a username or email
///
/// # Errors
/// * `InvalidCredentials` when no account matches or the password is wrong
pub fn authenticate(store: &Store, login: &str, password: &str) -> ServiceResult<User> {
    let login = login.trim();
    let user = store.read(|db| {
        db.users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(login) || u.email.eq_ignore_ascii_case(login))
            .cloned()
    });

    if let Some(user) = user {
        if verify_password(password, &user.password_hash)? {
            return Ok(user);
        }
    }

    log::debug!("failed login for {}", login);
    Err(ServiceError::InvalidCredentials)
}

/// Verify credentials and open a session
pub fn login(
    store: &Store,
    sessions: &SessionCache,
    login: &str,
    password: &str,
) -> ServiceResult<LoginResponse> {
    let user = authenticate(store, login, password)?;
    let token = sessions.create(user.id);
    Ok(LoginResponse {
        token,
        user: UserView::from(&user),
    })
}

/// Change the password of a logged-in user
pub fn change_password(
    store: &Store,
    user_id: Id,
    request: &PasswordChangeRequest,
) -> ServiceResult<()> {
    if request.new_password != request.confirm_password {
        return Err(ServiceError::validation("new passwords don't match"));
    }
    check_password(&request.new_password)?;

    let current_hash = store.read(|db| db.user(user_id).map(|u| u.password_hash.clone()))?;
    if !verify_password(&request.old_password, &current_hash)? {
        return Err(ServiceError::validation("invalid old password"));
    }

    let hash = hash_password(&request.new_password)?;
    store.write(|db| {
        let user = db
            .users
            .get_mut(&user_id)
            .ok_or(ServiceError::NotFound("user"))?;
        user.password_hash = hash;
        Ok(())
    })
}

/// Issue a reset code for the account with this email
///
/// # Returns
/// * `ServiceResult<String>` - The code, to be delivered out of band
pub fn request_password_reset(store: &Store, email: &str) -> ServiceResult<String> {
    let email = email.trim().to_lowercase();
    let code = generate_reset_code();
    let expires = Utc::now() + chrono::Duration::minutes(RESET_CODE_MINUTES);

    store.write(|db| {
        let user = db
            .users
            .values_mut()
            .find(|u| u.email == email)
            .ok_or(ServiceError::NotFound("email"))?;
        user.reset_code = Some(code.clone());
        user.reset_code_expires = Some(expires);
        Ok(())
    })?;

    Ok(code)
}

/// Set a new password using a reset code
///
/// All sessions of the account are revoked on success.
pub fn reset_password(
    store: &Store,
    sessions: &SessionCache,
    request: &PasswordResetConfirm,
) -> ServiceResult<()> {
    check_password(&request.new_password)?;
    let email = request.email.trim().to_lowercase();

    let (user_id, stored_code, expires) = store.read(|db| {
        db.users
            .values()
            .find(|u| u.email == email)
            .map(|u| (u.id, u.reset_code.clone(), u.reset_code_expires))
            .ok_or(ServiceError::NotFound("email"))
    })?;

    let (Some(stored_code), Some(expires)) = (stored_code, expires) else {
        return Err(ServiceError::validation("no reset code found"));
    };
    if Utc::now() > expires {
        return Err(ServiceError::validation("reset code expired"));
    }
    if stored_code != request.reset_code.trim().to_uppercase() {
        return Err(ServiceError::validation("invalid reset code"));
    }

    let hash = hash_password(&request.new_password)?;
    store.write(|db| {
        let user = db
            .users
            .get_mut(&user_id)
            .ok_or(ServiceError::NotFound("user"))?;
        user.password_hash = hash;
        user.reset_code = None;
        user.reset_code_expires = None;
        Ok(())
    })?;

    sessions.revoke_user(user_id);
    log::info!("password reset for user {}", user_id);
    Ok(())
}

pub fn list_users(store: &Store) -> Vec<UserView> {
    store.read(|db| db.users.values().map(UserView::from).collect())
}

/// Change the role of an account
///
/// # Errors
/// * `Conflict` when demoting the last remaining admin
pub fn set_role(store: &Store, user_id: Id, role: Role) -> ServiceResult<UserView> {
    store.write(|db| {
        let admins = db.users.values().filter(|u| u.role == Role::Admin).count();
        let user = db
            .users
            .get_mut(&user_id)
            .ok_or(ServiceError::NotFound("user"))?;
        if user.role == Role::Admin && role != Role::Admin && admins <= 1 {
            return Err(ServiceError::Conflict(
                "cannot demote the last admin".to_string(),
            ));
        }
        user.role = role;
        Ok(UserView::from(&*user))
    })
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Handle user registration
#[cfg(feature = "web")]
pub async fn handle_register(
    State(state): State<SharedState>,
    ApiJson(form): ApiJson<RegisterRequest>,
) -> ApiResult<UserView> {
    let user = register(&state.store, &form.username, &form.email, &form.password)?;
    ok(UserView::from(&user))
}

/// Handle user login requests
///
/// The token is returned in the body for bearer use and also set as the
/// session cookie.
#[cfg(feature = "web")]
pub async fn handle_login(
    State(state): State<SharedState>,
    jar: CookieJar,
    ApiJson(form): ApiJson<LoginRequest>,
) -> Result<(CookieJar, axum::Json<crate::api::Envelope<LoginResponse>>), ApiError> {
    let response = login(&state.store, &state.sessions, &form.login, &form.password)?;
    let jar = jar.add(session_cookie(response.token.clone()));
    Ok((jar, ok(response)?))
}

/// Handle user logout
#[cfg(feature = "web")]
pub async fn handle_logout(
    State(state): State<SharedState>,
    caller: AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, axum::Json<crate::api::Envelope<bool>>), ApiError> {
    state.sessions.revoke(&caller.token);
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/").build());
    Ok((jar, ok(true)?))
}

#[cfg(feature = "web")]
pub async fn handle_me(caller: AuthUser) -> ApiResult<UserView> {
    ok(UserView::from(&caller.user))
}

#[cfg(feature = "web")]
pub async fn handle_change_password(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiJson(form): ApiJson<PasswordChangeRequest>,
) -> ApiResult<bool> {
    change_password(&state.store, caller.user.id, &form)?;
    ok(true)
}

/// Handle password reset requests
///
/// The code is mailed when SMTP is configured, otherwise it is logged so
/// a local installation can still recover accounts.
#[cfg(feature = "web")]
pub async fn handle_forgot_password(
    State(state): State<SharedState>,
    ApiJson(form): ApiJson<PasswordResetRequest>,
) -> ApiResult<bool> {
    // Unknown addresses get the same answer as known ones.
    let code = match request_password_reset(&state.store, &form.email) {
        Ok(code) => code,
        Err(ServiceError::NotFound(_)) => {
            log::info!("password reset requested for unknown email {}", form.email);
            return ok(true);
        }
        Err(e) => return Err(e.into()),
    };

    match state.mailer.clone() {
        Some(mailer) => {
            let email = form.email.clone();
            let sent = tokio::task::spawn_blocking(move || {
                mailer.send_password_reset(&email, &code)
            })
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

            if let Err(e) = sent {
                log::warn!("failed to send reset code to {}: {}", form.email, e);
                return Err(ApiError::new(
                    axum::http::StatusCode::BAD_GATEWAY,
                    "failed to send email",
                ));
            }
        }
        None => log::warn!("SMTP not configured; reset code for {} is {}", form.email, code),
    }

    ok(true)
}

#[cfg(feature = "web")]
pub async fn handle_reset_password(
    State(state): State<SharedState>,
    ApiJson(form): ApiJson<PasswordResetConfirm>,
) -> ApiResult<bool> {
    reset_password(&state.store, &state.sessions, &form)?;
    ok(true)
}

#[cfg(feature = "web")]
pub async fn handle_list_users(
    State(state): State<SharedState>,
    _admin: AdminUser,
) -> ApiResult<Vec<UserView>> {
    ok(list_users(&state.store))
}

#[cfg(feature = "web")]
pub async fn handle_set_role(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(user_id): Path<Id>,
    ApiJson(form): ApiJson<RoleUpdate>,
) -> ApiResult<UserView> {
    ok(set_role(&state.store, user_id, form.role)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_sessions_are_rejected_and_dropped() {
        let cache = SessionCache::new(Duration::from_secs(0));
        let token = cache.create(7);
        assert_eq!(cache.validate(&token), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn revoke_user_drops_every_session() {
        let cache = SessionCache::new(Duration::from_secs(3600));
        let a = cache.create(1);
        let b = cache.create(1);
        let c = cache.create(2);
        assert_eq!(cache.validate(&a), Some(1));

        cache.revoke_user(1);
        assert_eq!(cache.validate(&a), None);
        assert_eq!(cache.validate(&b), None);
        assert_eq!(cache.validate(&c), Some(2));
    }

    #[test]
    fn huge_lifetimes_saturate() {
        // Roughly 285,000 years: past the last representable date.
        let cache = SessionCache::new(Duration::from_secs(9_000_000_000_000));
        let token = cache.create(3);
        assert_eq!(cache.validate(&token), Some(3));
    }

    #[test]
    fn reset_codes_use_the_charset() {
        let code = generate_reset_code();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }
}
