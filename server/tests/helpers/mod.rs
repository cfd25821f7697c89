//! Reusable test helpers for HTTP and WebSocket integration tests.
//!
//! Provides `TestApp` for building and sending requests through the full axum router,
//! backed by an in-memory store so tests need no external services.
//!
//! ## Test Servers
//!
//! Use [`spawn_test_server()`] when a test needs real sockets (WebSocket
//! clients) instead of `tower::ServiceExt::oneshot`.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{self, header, Method, Request, Response};
use axum::Router;
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use serde_json::Value;
use shopchat_server::api::{create_router, AppState};
use shopchat_server::config::Config;
use shopchat_server::db::{Conversation, MemoryStore, Message, User};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

/// How long a test waits for something that should happen.
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test App
// ============================================================================

/// A test application wrapping the full axum router.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

impl TestApp {
    /// Create a new test app with the assistant disabled.
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    /// Create a test app whose assistant calls `{base_url}/webhook`.
    pub fn with_webhook(base_url: &str) -> Self {
        let mut config = Config::default_for_test();
        config.webhook_url = Some(format!("{base_url}/webhook"));
        Self::with_config(config)
    }

    /// Create a test app with a custom config.
    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state =
            AppState::new(store.clone(), config).expect("Failed to build application state");
        let router = create_router(state.clone());

        Self {
            router,
            store,
            state,
        }
    }

    /// Seed a user and a conversation they take part in.
    pub async fn seed_chat(&self, username: &str) -> (User, Conversation) {
        let user = self.store.seed_user(username).await;
        let conversation = self.store.seed_conversation(&[user.id]).await;
        (user, conversation)
    }

    /// Build an HTTP request with the given method and URI.
    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Build a JSON request.
    pub fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
        Self::request(method, uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("Failed to build request")
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    /// Wait until a conversation has `count` live subscribers.
    pub async fn wait_for_subscribers(&self, conversation_id: i64, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.state.hub.subscriber_count(conversation_id) != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Subscribers did not join in time");
    }

    /// Wait until the store holds `count` messages and return them.
    pub async fn wait_for_messages(&self, count: usize) -> Vec<Message> {
        tokio::time::timeout(WAIT, async {
            loop {
                let messages = self.store.messages().await;
                if messages.len() >= count {
                    return messages;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Messages were not stored in time")
    }
}

pub async fn body_to_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}

// ============================================================================
// Test Server
// ============================================================================

/// A running test server bound to a random port.
pub struct TestServer {
    /// Server address (127.0.0.1:PORT).
    pub addr: SocketAddr,
    /// Base URL for HTTP requests (e.g., `http://127.0.0.1:12345`).
    pub url: String,
    /// Handle to the server task for cleanup.
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// WebSocket URL of a conversation.
    pub fn ws_url(&self, conversation_id: i64) -> String {
        format!("ws://{}/ws/chat/{conversation_id}", self.addr)
    }
}

/// Spawn a real HTTP server on a random port.
pub async fn spawn_test_server(router: Router) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let url = format!("http://{addr}");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Test server failed");
    });

    TestServer {
        addr,
        url,
        _handle: handle,
    }
}

// ============================================================================
// WebSocket client helpers
// ============================================================================

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect a WebSocket client to a conversation and wait until it is subscribed.
pub async fn connect_chat(app: &TestApp, server: &TestServer, conversation_id: i64) -> WsClient {
    let expected = app.state.hub.subscriber_count(conversation_id) + 1;
    let (ws, _) = tokio_tungstenite::connect_async(server.ws_url(conversation_id))
        .await
        .expect("WebSocket connect failed");
    app.wait_for_subscribers(conversation_id, expected).await;
    ws
}

/// Send a JSON text frame.
pub async fn send_json(ws: &mut WsClient, value: &Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .expect("WebSocket send failed");
}

/// Receive the next text frame as JSON.
pub async fn next_json(ws: &mut WsClient) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).expect("Frame is not JSON");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket closed"),
            }
        }
    })
    .await
    .expect("No frame received in time")
}

/// Assert that no text frame arrives within `window`.
pub async fn expect_silence(ws: &mut WsClient, window: Duration) {
    let result = tokio::time::timeout(window, async {
        loop {
            match ws.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => return text.to_string(),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => std::future::pending::<()>().await,
            }
        }
    })
    .await;

    if let Ok(frame) = result {
        panic!("Unexpected frame: {frame}");
    }
}
