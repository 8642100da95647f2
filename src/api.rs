#![cfg(feature = "web")]

//! Response envelope, error mapping and authentication extractors shared
//! by every handler.

use crate::app::SharedState;
use crate::assistant::AssistantError;
use crate::auth::SESSION_COOKIE;
use crate::charts::ChartError;
use crate::color::ColorError;
use crate::error::ServiceError;
use crate::fractal::FractalError;
use crate::models::{Role, User};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, async_trait};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;

/// Uniform body of every JSON response
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub body: Option<T>,
    pub error: Option<String>,
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

/// Wrap a successful result
pub fn ok<T: Serialize>(body: T) -> ApiResult<T> {
    Ok(Json(Envelope {
        success: true,
        body: Some(body),
        error: None,
    }))
}

/// An error on its way to the client
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::error!("{} {}", self.status, self.message);
        } else {
            log::debug!("{} {}", self.status, self.message);
        }

        let body = Envelope::<()> {
            success: false,
            body: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Unauthenticated | ServiceError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ServiceError::Forbidden => StatusCode::FORBIDDEN,
            ServiceError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Storage(_) | ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<FractalError> for ApiError {
    fn from(err: FractalError) -> Self {
        let status = match err {
            FractalError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            FractalError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<ChartError> for ApiError {
    fn from(err: ChartError) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<ColorError> for ApiError {
    fn from(err: ColorError) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, err.to_string())
    }
}

impl From<AssistantError> for ApiError {
    fn from(err: AssistantError) -> Self {
        let status = match err {
            AssistantError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            AssistantError::EmptyInput => StatusCode::BAD_REQUEST,
            AssistantError::Http(_) | AssistantError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

/// `Json` extractor whose rejections use the envelope
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Query` extractor whose rejections use the envelope
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Session token from `Authorization: Bearer` or the session cookie
pub fn request_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    bearer.or_else(|| {
        CookieJar::from_headers(headers)
            .get(SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }
}

#[async_trait]
impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = request_token(&parts.headers).ok_or(ServiceError::Unauthenticated)?;
        let user_id = state
            .sessions
            .validate(&token)
            .ok_or(ServiceError::Unauthenticated)?;
        // The account may have been removed while the session was alive.
        let user = state
            .store
            .read(|db| db.user(user_id).cloned())
            .map_err(|_| ServiceError::Unauthenticated)?;

        Ok(AuthUser { user, token })
    }
}

/// An authenticated caller with the admin role
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<SharedState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let caller = AuthUser::from_request_parts(parts, state).await?;
        if !caller.is_admin() {
            return Err(ServiceError::Forbidden.into());
        }
        Ok(AdminUser(caller.user))
    }
}
