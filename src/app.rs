//! Routing, shared state and server startup.

use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
};
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::api::ApiError;
use crate::assistant::{self, GeminiClient, SearchClient};
use crate::auth::{self, SessionCache};
use crate::config::Config;
use crate::mailer::Mailer;
use crate::media::{self, MAX_MEDIA_BYTES};
use crate::store::Store;
use crate::{
    cards, charts, export, lessons, profile, progress, quiz, sandbox, tasks, tracker,
};

/// Everything a handler can reach
pub struct AppState {
    pub store: Store,
    pub sessions: SessionCache,
    pub config: Config,
    /// None when SMTP is not configured; reset codes are logged instead
    pub mailer: Option<Arc<Mailer>>,
    pub gemini: Option<GeminiClient>,
    pub search: Option<SearchClient>,
}

pub type SharedState = Arc<AppState>;

/// Open the store and build the optional outbound clients
///
/// # Arguments
/// * `config` - Runtime configuration
///
/// # Returns
/// * `Result<SharedState, Box<dyn Error>>` - State ready to hand to `router`
pub fn build_state(config: Config) -> Result<SharedState, Box<dyn Error>> {
    let store = if config.persist {
        std::fs::create_dir_all(&config.data_dir)?;
        Store::open(config.snapshot_path())?
    } else {
        log::info!("persistence disabled, data lives in memory only");
        Store::in_memory()
    };

    let mailer = match &config.smtp {
        Some(smtp) => match Mailer::new(smtp) {
            Ok(mailer) => Some(Arc::new(mailer)),
            Err(e) => {
                log::warn!("SMTP disabled: {}", e);
                None
            }
        },
        None => None,
    };

    let gemini = match &config.gemini_key {
        Some(key) => Some(GeminiClient::new(key.clone(), config.gemini_model.clone())?),
        None => None,
    };

    let search = match (&config.search_key, &config.search_engine) {
        (Some(key), Some(engine)) => Some(SearchClient::new(key.clone(), engine.clone())?),
        _ => None,
    };

    Ok(Arc::new(AppState {
        store,
        sessions: SessionCache::new(config.session_ttl),
        config,
        mailer,
        gemini,
        search,
    }))
}

fn api_routes() -> Router<SharedState> {
    Router::new()
        // Accounts
        .route("/auth/register", post(auth::handle_register))
        .route("/auth/login", post(auth::handle_login))
        .route("/auth/logout", post(auth::handle_logout))
        .route("/auth/me", get(auth::handle_me))
        .route("/auth/change-password", post(auth::handle_change_password))
        .route("/auth/forgot-password", post(auth::handle_forgot_password))
        .route("/auth/reset-password", post(auth::handle_reset_password))
        .route("/admin/users", get(auth::handle_list_users))
        .route("/admin/users/:id/role", put(auth::handle_set_role))
        // Lessons and cards
        .route(
            "/lessons",
            get(lessons::handle_list_lessons).post(lessons::handle_create_lesson),
        )
        .route(
            "/lessons/:id",
            get(lessons::handle_get_lesson)
                .put(lessons::handle_update_lesson)
                .delete(lessons::handle_delete_lesson),
        )
        .route(
            "/lessons/:id/cards",
            get(cards::handle_list_cards).post(cards::handle_create_card),
        )
        .route("/lessons/:id/cards/order", put(cards::handle_reorder_cards))
        .route(
            "/cards/:id",
            get(cards::handle_get_card)
                .put(cards::handle_update_card)
                .delete(cards::handle_delete_card),
        )
        // Tests
        .route(
            "/cards/:id/questions",
            get(quiz::handle_list_questions).post(quiz::handle_create_question),
        )
        .route("/cards/:id/questions/import", post(quiz::handle_import_questions))
        .route(
            "/questions/:id",
            put(quiz::handle_update_question).delete(quiz::handle_delete_question),
        )
        .route("/cards/:id/submit", post(quiz::handle_submit_test))
        .route("/cards/:id/complete", post(progress::handle_complete_card))
        // Media
        .route(
            "/cards/:id/media",
            post(media::handle_upload).layer(DefaultBodyLimit::max(MAX_MEDIA_BYTES + 64 * 1024)),
        )
        .route(
            "/media/:id",
            get(media::handle_download).delete(media::handle_delete),
        )
        // Tasks
        .route(
            "/lessons/:id/tasks",
            get(tasks::handle_list_tasks).post(tasks::handle_create_task),
        )
        .route(
            "/tasks/:id",
            put(tasks::handle_update_task).delete(tasks::handle_delete_task),
        )
        .route(
            "/tasks/:id/submissions",
            get(tasks::handle_list_submissions).post(tasks::handle_submit_task),
        )
        .route("/submissions/:id/review", put(tasks::handle_review_submission))
        // Progress
        .route("/lessons/:id/progress", get(progress::handle_lesson_progress))
        .route("/progress", get(progress::handle_overview))
        .route("/progress/charts/time.png", get(charts::handle_time_chart))
        .route("/progress/charts/scores.png", get(charts::handle_score_chart))
        .route(
            "/tracker",
            get(tracker::handle_list).post(tracker::handle_record),
        )
        // Personalization
        .route(
            "/profile",
            get(profile::handle_get_profile).put(profile::handle_update_profile),
        )
        .route("/profile/recommendations", get(profile::handle_recommendations))
        // Sandbox
        .route("/sandbox/fractal", get(sandbox::handle_fractal))
        .route("/sandbox/color/convert", post(sandbox::handle_convert))
        // External services
        .route("/assistant/generate", post(assistant::handle_generate))
        .route("/assistant/search", get(assistant::handle_search))
        // Reports
        .route("/admin/export/progress.csv", get(export::handle_export_csv))
        .route("/admin/export/progress.xlsx", get(export::handle_export_xlsx))
        .fallback(api_not_found)
}

async fn api_not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "no such endpoint")
}

/// Log method, path, status and latency of every request
async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    log::info!(
        "{} {} -> {} ({} ms)",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

fn cors_layer(origin: &str) -> Result<CorsLayer, Box<dyn Error>> {
    Ok(CorsLayer::new()
        .allow_origin(origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true))
}

/// Build the full application router
///
/// API routes live under `/api`; any other path is served from the
/// static directory when one is configured.
pub fn router(state: SharedState) -> Result<Router, Box<dyn Error>> {
    let mut app = Router::new().nest("/api", api_routes());

    if let Some(dir) = &state.config.static_dir {
        app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }

    if let Some(origin) = &state.config.cors_origin {
        app = app.layer(cors_layer(origin)?);
    }

    Ok(app
        .layer(middleware::from_fn(log_requests))
        .with_state(state))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("shutting down");
}

/// Start the web server and serve until interrupted
pub async fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let bind = config.bind.clone();
    let state = build_state(config)?;
    let app = router(state)?;

    let listener = TcpListener::bind(&bind).await?;
    log::info!("listening on http://{}", bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
