//! HTTP clients against a throwaway local server.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use scribe::fetch::{HttpImageSource, ImageSource};
use scribe::generator::anthropic::AnthropicGenerator;
use scribe::generator::gemini::GeminiGenerator;
use scribe::generator::{GenerationRequest, Generator, InlineImage};
use scribe::sink::{Callback, Delivery, HttpCallback};

#[derive(Clone, Default)]
struct Captured {
    bodies: Arc<Mutex<Vec<Value>>>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn record(
    State(captured): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    captured.bodies.lock().unwrap().push(body);
    captured.headers.lock().unwrap().push(headers);
    StatusCode::OK
}

// --- Images ---

#[tokio::test]
async fn image_source_returns_bytes() {
    let app = Router::new().route("/cat.jpg", get(|| async { vec![0xffu8, 0xd8, 0xff] }));
    let addr = spawn(app).await;

    let source = HttpImageSource::new(Some(Duration::from_secs(5))).unwrap();
    let bytes = source.fetch(&format!("http://{addr}/cat.jpg")).await.unwrap();
    assert_eq!(bytes, vec![0xff, 0xd8, 0xff]);
}

#[tokio::test]
async fn image_source_treats_non_2xx_as_failure() {
    let app = Router::new().route("/gone.jpg", get(|| async { StatusCode::NOT_FOUND }));
    let addr = spawn(app).await;

    let source = HttpImageSource::new(None).unwrap();
    assert!(source.fetch(&format!("http://{addr}/gone.jpg")).await.is_err());
}

#[tokio::test]
async fn image_source_honours_timeout() {
    let app = Router::new().route(
        "/slow.jpg",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            vec![1u8]
        }),
    );
    let addr = spawn(app).await;

    let source = HttpImageSource::new(Some(Duration::from_millis(100))).unwrap();
    assert!(source.fetch(&format!("http://{addr}/slow.jpg")).await.is_err());
}

// --- Callback ---

#[tokio::test]
async fn callback_posts_result_and_metadata() {
    let captured = Captured::default();
    let app = Router::new()
        .route("/ai-callback", post(record))
        .with_state(captured.clone());
    let addr = spawn(app).await;

    let callback = HttpCallback::new(&format!("http://{addr}"), None).unwrap();
    callback
        .deliver(&Delivery {
            result_text: "Nice!".to_string(),
            metadata: json!({"postId": "p1"}),
        })
        .await
        .unwrap();

    let bodies = captured.bodies.lock().unwrap();
    assert_eq!(
        bodies[0],
        json!({"resultText": "Nice!", "metadata": {"postId": "p1"}})
    );
}

#[tokio::test]
async fn callback_rejection_is_an_error() {
    let app = Router::new().route(
        "/ai-callback",
        post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    let addr = spawn(app).await;

    let callback = HttpCallback::new(&format!("http://{addr}"), None).unwrap();
    let result = callback
        .deliver(&Delivery {
            result_text: "x".to_string(),
            metadata: json!({}),
        })
        .await;
    assert!(result.is_err());
}

// --- Providers ---

fn request_with_image() -> GenerationRequest {
    GenerationRequest {
        text: "Describe".to_string(),
        images: vec![InlineImage {
            data: "AAAA".to_string(),
            media_type: "image/jpeg".to_string(),
        }],
    }
}

#[tokio::test]
async fn gemini_round_trip() {
    let captured = Captured::default();
    let app = Router::new()
        .route(
            "/v1beta/models/gemini-1.5-flash:generateContent",
            post(
                |State(captured): State<Captured>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    captured.bodies.lock().unwrap().push(body);
                    captured.headers.lock().unwrap().push(headers);
                    Json(json!({
                        "candidates": [{"content": {"parts": [{"text": "A cat."}]}}]
                    }))
                },
            ),
        )
        .with_state(captured.clone());
    let addr = spawn(app).await;

    let generator =
        GeminiGenerator::new("g-key", None).with_base_url(format!("http://{addr}/v1beta"));
    let text = generator.generate(&request_with_image()).await.unwrap();
    assert_eq!(text, "A cat.");

    let headers = captured.headers.lock().unwrap();
    assert_eq!(headers[0]["x-goog-api-key"], "g-key");
    let bodies = captured.bodies.lock().unwrap();
    let parts = &bodies[0]["contents"][0]["parts"];
    assert_eq!(parts[0]["text"], "Describe");
    assert_eq!(parts[1]["inline_data"]["data"], "AAAA");
}

#[tokio::test]
async fn gemini_error_status_is_an_error() {
    let app = Router::new().route(
        "/v1beta/models/gemini-1.5-flash:generateContent",
        post(|| async { (StatusCode::TOO_MANY_REQUESTS, "quota") }),
    );
    let addr = spawn(app).await;

    let generator =
        GeminiGenerator::new("g-key", None).with_base_url(format!("http://{addr}/v1beta"));
    let err = generator.generate(&request_with_image()).await.unwrap_err();
    assert!(err.to_string().contains("429"));
}

#[tokio::test]
async fn anthropic_round_trip() {
    let captured = Captured::default();
    let app = Router::new()
        .route(
            "/v1/messages",
            post(
                |State(captured): State<Captured>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    captured.bodies.lock().unwrap().push(body);
                    captured.headers.lock().unwrap().push(headers);
                    Json(json!({
                        "content": [{"type": "text", "text": "Looks sunny."}],
                        "usage": {"input_tokens": 10, "output_tokens": 3}
                    }))
                },
            ),
        )
        .with_state(captured.clone());
    let addr = spawn(app).await;

    let generator = AnthropicGenerator::new("sk-test", None)
        .with_endpoint(format!("http://{addr}/v1/messages"));
    let text = generator.generate(&request_with_image()).await.unwrap();
    assert_eq!(text, "Looks sunny.");

    let headers = captured.headers.lock().unwrap();
    assert_eq!(headers[0]["x-api-key"], "sk-test");
    assert!(headers[0].contains_key("anthropic-version"));
    let bodies = captured.bodies.lock().unwrap();
    assert_eq!(bodies[0]["messages"][0]["content"][0]["type"], "image");
    assert_eq!(bodies[0]["messages"][0]["content"][1]["text"], "Describe");
}
