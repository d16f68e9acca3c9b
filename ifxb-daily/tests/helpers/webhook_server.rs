//! In-process webhook endpoint
//!
//! Answers every POST with a fixed status and JSON body and keeps the
//! received payloads for inspection.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

#[derive(Clone)]
struct ServerState {
    received: Arc<Mutex<Vec<Value>>>,
    status: StatusCode,
    reply: Value,
}

/// Running webhook endpoint; shut down on drop
pub struct WebhookServer {
    pub url: String,
    received: Arc<Mutex<Vec<Value>>>,
    handle: JoinHandle<()>,
}

impl WebhookServer {
    pub async fn start(status: StatusCode, reply: Value) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = ServerState {
            received: Arc::clone(&received),
            status,
            reply,
        };

        let app = Router::new()
            .route("/cgi-bin/webhook/send", post(receive))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}/cgi-bin/webhook/send?key=test-key", addr),
            received,
            handle,
        }
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for WebhookServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn receive(
    State(state): State<ServerState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.received.lock().unwrap().push(body);
    (state.status, Json(state.reply.clone()))
}
