mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{memory_store, CountingSender};
use glowws_server::bot::broadcast::Broadcaster;
use glowws_server::http::{router, AppState};
use glowws_server::storage::{SqliteUserStore, UserStore};
use http_body_util::BodyExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

type TestResult = Result<(), Box<dyn std::error::Error>>;

struct Harness {
    store: Arc<SqliteUserStore>,
    sender: Arc<CountingSender>,
}

impl Harness {
    async fn new(failing: &[i64]) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            store: memory_store().await?,
            sender: Arc::new(CountingSender {
                failing: failing.iter().copied().collect::<HashSet<_>>(),
                ..CountingSender::default()
            }),
        })
    }

    fn app(&self, models_path: &str, with_bot: bool) -> axum::Router {
        let broadcaster = with_bot.then(|| {
            Broadcaster::new(
                self.store.clone(),
                self.sender.clone(),
                Duration::from_secs(1),
                4,
            )
        });
        router(Arc::new(AppState {
            store: self.store.clone(),
            broadcaster,
            models_path: models_path.to_string(),
        }))
    }
}

fn post_json(uri: &str, body: &str) -> Result<Request<Body>, axum::http::Error> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
}

fn get(uri: &str) -> Result<Request<Body>, axum::http::Error> {
    Request::builder().uri(uri).body(Body::empty())
}

async fn body_bytes(response: axum::response::Response) -> Result<Vec<u8>, axum::Error> {
    Ok(response.into_body().collect().await?.to_bytes().to_vec())
}

#[tokio::test]
async fn models_serves_file_verbatim() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("glowws_models.json");
    let content = br#"[{"name":"Gemma 2B","url":"https://example.com/gemma.bin"}]"#;
    std::fs::write(&path, content)?;

    let harness = Harness::new(&[]).await?;
    let response = harness
        .app(&path.to_string_lossy(), false)
        .oneshot(get("/models")?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await?, content.to_vec());
    Ok(())
}

#[tokio::test]
async fn models_missing_file_returns_empty_body() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("absent.json");

    let harness = Harness::new(&[]).await?;
    let response = harness
        .app(&path.to_string_lossy(), false)
        .oneshot(get("/models")?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn stats_broadcasts_to_every_user() -> TestResult {
    let harness = Harness::new(&[]).await?;
    for (identity, address) in [(1, 11), (2, 22), (3, 33)] {
        harness.store.insert_user(identity, address).await?;
    }

    let response = harness
        .app("unused", true)
        .oneshot(post_json(
            "/stats",
            r#"{"header":"Feedback","rating":4.5,"description":"Great"}"#,
        )?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let summary: serde_json::Value = serde_json::from_slice(&body_bytes(response).await?)?;
    assert_eq!(summary["recipients"], 3);
    assert_eq!(summary["delivered"], 3);
    assert_eq!(summary["failed"], 0);

    let mut attempts = harness.sender.attempts();
    attempts.sort_unstable();
    assert_eq!(
        attempts,
        vec![
            (11, "Feedback\nRating: 4.5 ⭐\nGreat".to_string()),
            (22, "Feedback\nRating: 4.5 ⭐\nGreat".to_string()),
            (33, "Feedback\nRating: 4.5 ⭐\nGreat".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn stats_failed_recipient_does_not_block_others() -> TestResult {
    let harness = Harness::new(&[22]).await?;
    for (identity, address) in [(1, 11), (2, 22), (3, 33)] {
        harness.store.insert_user(identity, address).await?;
    }

    let response = harness
        .app("unused", true)
        .oneshot(post_json(
            "/stats",
            r#"{"header":"h","rating":1,"description":"d"}"#,
        )?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let summary: serde_json::Value = serde_json::from_slice(&body_bytes(response).await?)?;
    assert_eq!(summary["delivered"], 2);
    assert_eq!(summary["failed"], 1);
    assert_eq!(harness.sender.attempts().len(), 3);
    Ok(())
}

#[tokio::test]
async fn stats_rejects_missing_field_without_side_effects() -> TestResult {
    let harness = Harness::new(&[]).await?;
    harness.store.insert_user(1, 11).await?;

    let response = harness
        .app("unused", true)
        .oneshot(post_json("/stats", r#"{"header":"h","rating":3}"#)?)
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(harness.sender.attempts().is_empty());
    assert_eq!(harness.store.count_users().await?, 1);
    assert_eq!(harness.store.get_user(1).await?.address, 11);
    Ok(())
}

#[tokio::test]
async fn stats_rejects_invalid_json() -> TestResult {
    let harness = Harness::new(&[]).await?;
    harness.store.insert_user(1, 11).await?;

    let response = harness
        .app("unused", true)
        .oneshot(post_json("/stats", "not json")?)
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(harness.sender.attempts().is_empty());
    Ok(())
}

#[tokio::test]
async fn feedback_route_accepts_mobile_payload() -> TestResult {
    let harness = Harness::new(&[]).await?;
    harness.store.insert_user(1, 11).await?;

    let response = harness
        .app("unused", true)
        .oneshot(post_json(
            "/feedback",
            r#"{"header":"Café","rating":5,"desc":"Nice"}"#,
        )?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        harness.sender.attempts(),
        vec![(11, "Café\nRating: 5.0 ⭐\nNice".to_string())]
    );
    Ok(())
}

#[tokio::test]
async fn stats_without_bot_is_unavailable() -> TestResult {
    let harness = Harness::new(&[]).await?;
    harness.store.insert_user(1, 11).await?;

    let response = harness
        .app("unused", false)
        .oneshot(post_json(
            "/stats",
            r#"{"header":"h","rating":1,"description":"d"}"#,
        )?)
        .await?;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(harness.sender.attempts().is_empty());
    Ok(())
}

#[tokio::test]
async fn health_reports_user_count() -> TestResult {
    let harness = Harness::new(&[]).await?;
    harness.store.insert_user(1, 11).await?;
    harness.store.insert_user(2, 22).await?;

    let response = harness.app("unused", true).oneshot(get("/health")?).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body_bytes(response).await?)?;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["users"], 2);
    assert_eq!(health["bot"], true);
    Ok(())
}
