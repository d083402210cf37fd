//! Per-fetch-cycle client scope
//!
//! A [`ProcessContext`] is created at the start of one scheduler tick. Every
//! client obtained through it records its responses into the context and is
//! closed by [`ProcessContext::cleanup`], which also runs on drop.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::http::{HttpClient, HttpResponse, ResponseHook};
use super::{ClientManager, SiteError};
use crate::models::Target;

/// Number of leading body bytes kept in traces of binary responses
const BINARY_PREVIEW_BYTES: usize = 50;

type Records = Arc<Mutex<Vec<HttpResponse>>>;

struct RecordHook {
    records: Records,
}

#[async_trait]
impl ResponseHook for RecordHook {
    async fn on_response(&self, response: &HttpResponse) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(response.clone());
    }
}

pub struct ProcessContext {
    client_mgr: Arc<dyn ClientManager>,
    records: Records,
    clients: Mutex<Vec<Arc<HttpClient>>>,
}

impl ProcessContext {
    pub fn new(client_mgr: Arc<dyn ClientManager>) -> Self {
        Self {
            client_mgr,
            records: Arc::new(Mutex::new(Vec::new())),
            clients: Mutex::new(Vec::new()),
        }
    }

    pub async fn get_client(&self, target: Option<&Target>) -> Result<Arc<HttpClient>, SiteError> {
        let client = self.client_mgr.get_client(target).await?;
        Ok(self.register(client))
    }

    pub async fn get_client_for_static(&self) -> Result<Arc<HttpClient>, SiteError> {
        let client = self.client_mgr.get_client_for_static().await?;
        Ok(self.register(client))
    }

    pub async fn get_query_name_client(&self) -> Result<Arc<HttpClient>, SiteError> {
        let client = self.client_mgr.get_query_name_client().await?;
        Ok(self.register(client))
    }

    pub async fn refresh_client(&self) -> Result<(), SiteError> {
        self.client_mgr.refresh_client().await
    }

    fn register(&self, client: HttpClient) -> Arc<HttpClient> {
        client.add_hook(Arc::new(RecordHook {
            records: Arc::clone(&self.records),
        }));
        let client = Arc::new(client);
        self.clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&client));
        client
    }

    /// Number of clients still owned by this context
    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Human-readable trace of every response seen through this context
    pub fn gen_req_records(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(format_record)
            .collect()
    }

    /// Close every client exactly once. Close failures are logged.
    pub fn cleanup(&self) {
        let clients: Vec<Arc<HttpClient>> = self
            .clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        for client in clients {
            if let Err(e) = client.close() {
                warn!(error = %e, "Failed to close HTTP client");
            }
        }
    }
}

impl Drop for ProcessContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn format_record(response: &HttpResponse) -> String {
    let printable = response
        .content_type()
        .is_some_and(|ct| ct.starts_with("text") || ct.contains("json"));

    let body = if printable {
        response.text()
    } else {
        let end = response.body.len().min(BINARY_PREVIEW_BYTES);
        format!("b64encoded: {}", STANDARD.encode(&response.body[..end]))
    };

    format!(
        "{} {:?} | [{}] {:?} {}",
        response.url,
        response.request_headers,
        response.status.as_u16(),
        response.headers,
        body
    )
}
