#![cfg(feature = "web")]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use learnlab::app::{build_state, router};
use learnlab::config::Config;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    _dir: TempDir,
}

fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        persist: false,
        ..Config::default()
    };
    let state = build_state(config).unwrap();
    TestApp {
        router: router(state).unwrap(),
        _dir: dir,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>, Option<String>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec(), content_type)
    }

    async fn json(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let (status, bytes, _) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn register_and_login(&self, username: &str) -> String {
        let (status, _) = self
            .json(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{}@example.com", username),
                    "password": "secret123",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = self
            .json(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "login": username, "password": "secret123" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["body"]["token"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn responses_use_the_envelope() {
    let app = test_app();

    let (status, body) = app.json("GET", "/api/lessons", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["body"], Value::Null);
    assert_eq!(body["error"], json!("authentication required"));

    let (status, body) = app.json("GET", "/api/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn bad_credentials_and_malformed_json_are_rejected() {
    let app = test_app();
    app.register_and_login("owner").await;

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "login": "owner", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!("invalid credentials"));

    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, bytes, _) = app.send(request).await;
    assert!(status.is_client_error());
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn students_cannot_author_content() {
    let app = test_app();
    let admin = app.register_and_login("admin").await;
    let student = app.register_and_login("student").await;

    let lesson = json!({ "title": "Fractals", "published": true });
    let (status, _) = app.json("POST", "/api/lessons", Some(&student), Some(lesson.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.json("POST", "/api/lessons", Some(&admin), Some(lesson)).await;
    assert_eq!(status, StatusCode::OK);
    let lesson_id = body["body"]["id"].as_u64().unwrap();

    let (status, body) = app.json("GET", "/api/lessons", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["body"][0]["id"].as_u64(), Some(lesson_id));
}

#[tokio::test]
async fn test_card_flow_over_http() {
    let app = test_app();
    let admin = app.register_and_login("admin").await;
    let student = app.register_and_login("student").await;

    let (_, body) = app
        .json(
            "POST",
            "/api/lessons",
            Some(&admin),
            Some(json!({ "title": "Colors", "published": true })),
        )
        .await;
    let lesson_id = body["body"]["id"].as_u64().unwrap();

    let (status, body) = app
        .json(
            "POST",
            &format!("/api/lessons/{}/cards", lesson_id),
            Some(&admin),
            Some(json!({ "title": "Check", "content": { "test": { "pass_percent": 100 } } })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let card_id = body["body"]["id"].as_u64().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/cards/{}/questions/import", card_id))
        .header(header::AUTHORIZATION, format!("Bearer {}", admin))
        .header(header::CONTENT_TYPE, "text/csv")
        .body(Body::from("Complement of red?,*cyan,magenta,yellow\n"))
        .unwrap();
    let (status, bytes, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let imported: Value = serde_json::from_slice(&bytes).unwrap();
    let question_id = imported["body"][0]["id"].as_u64().unwrap();

    let (_, body) = app
        .json("GET", &format!("/api/cards/{}/questions", card_id), Some(&student), None)
        .await;
    let question = &body["body"][0];
    assert_eq!(question["answers"][0]["correct"], Value::Null);
    let cyan = question["answers"][0]["id"].as_u64().unwrap();

    let (status, body) = app
        .json(
            "POST",
            &format!("/api/cards/{}/submit", card_id),
            Some(&student),
            Some(json!({ "answers": { (question_id.to_string()): [cyan] } })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["body"]["passed"], json!(true));

    let (_, body) = app
        .json("GET", &format!("/api/lessons/{}/progress", lesson_id), Some(&student), None)
        .await;
    assert_eq!(body["body"]["completed_cards"], json!(1));
    assert_eq!(body["body"]["score"], json!(1));
}

#[tokio::test]
async fn logout_revokes_the_token() {
    let app = test_app();
    let token = app.register_and_login("someone").await;

    let (status, body) = app.json("GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["body"]["username"], json!("someone"));

    let (status, _) = app.json("POST", "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.json("GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sandbox_endpoints_are_public() {
    let app = test_app();

    let request = Request::builder()
        .uri("/api/sandbox/fractal?kind=sierpinski&depth=3&width=64&height=64")
        .body(Body::empty())
        .unwrap();
    let (status, bytes, content_type) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");

    let (status, body) = app
        .json(
            "GET",
            "/api/sandbox/fractal?width=0",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));

    let (status, body) = app
        .json(
            "POST",
            "/api/sandbox/color/convert",
            None,
            Some(json!({ "color": { "rgb": { "r": 0, "g": 0, "b": 255 } }, "target": "hsv" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["body"]["report"]["hex"], json!("#0000ff"));
    assert_eq!(body["body"]["converted"]["hsv"]["h"], json!(240.0));
}

#[tokio::test]
async fn assistant_without_keys_is_unavailable() {
    let app = test_app();
    let token = app.register_and_login("curious").await;

    let (status, body) = app
        .json(
            "POST",
            "/api/assistant/generate",
            Some(&token),
            Some(json!({ "prompt": "Explain the Mandelbrot set" })),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], json!("content generation is not configured"));
}

#[tokio::test]
async fn password_reset_endpoints_do_not_reveal_accounts() {
    let app = test_app();
    app.register_and_login("member").await;

    for email in ["member@example.com", "stranger@example.com"] {
        let (status, body) = app
            .json(
                "POST",
                "/api/auth/forgot-password",
                None,
                Some(json!({ "email": email })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["body"], json!(true));
    }

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/reset-password",
            None,
            Some(json!({
                "email": "member@example.com",
                "reset_code": "not-it",
                "new_password": "newsecret",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("invalid reset code"));

    let (status, _) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "login": "member", "password": "secret123" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}
