//! Local HTTP server answering every request with one canned response.

use axum::http::{header, StatusCode, Uri};
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

pub struct CannedServer {
    pub base_url: String,
    /// Path and query of every request received, in order
    pub requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl CannedServer {
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for CannedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn serve(status: StatusCode, body: &'static str) -> CannedServer {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);

    let app = Router::new().fallback(move |uri: Uri| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().unwrap().push(uri.to_string());
            (status, [(header::CONTENT_TYPE, "application/json")], body)
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    CannedServer {
        base_url: format!("http://{}", addr),
        requests,
        task,
    }
}
