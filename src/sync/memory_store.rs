//! In-memory stand-in for the shared-log store, for tests.

use super::transport::Transport;
use crate::error::{Result, TrailError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ENDPOINT: &str = "https://www.protectedtext.com/";

type PostHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
    documents: HashMap<String, String>,
    posts: Vec<HashMap<String, String>>,
    offline: bool,
    next_get_delay: Option<Duration>,
    on_post: Option<PostHook>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().unwrap().offline = offline;
    }

    /// Store raw `eContent` for a document id under the default endpoint
    pub fn put_raw(&self, docid: &str, encrypted: &str) {
        self.inner
            .lock()
            .unwrap()
            .documents
            .insert(format!("{}{}", ENDPOINT, docid), encrypted.to_string());
    }

    pub fn posts(&self) -> Vec<HashMap<String, String>> {
        self.inner.lock().unwrap().posts.clone()
    }

    pub fn delay_next_get(&self, delay: Duration) {
        self.inner.lock().unwrap().next_get_delay = Some(delay);
    }

    /// Run `hook` while a POST is in flight
    pub fn on_post(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.lock().unwrap().on_post = Some(Box::new(hook));
    }
}

#[async_trait]
impl Transport for MemoryStore {
    async fn get_json(&self, url: &str, _no_cache: bool) -> Result<serde_json::Value> {
        let delay = self.inner.lock().unwrap().next_get_delay.take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inner = self.inner.lock().unwrap();
        if inner.offline {
            return Err(TrailError::network("offline"));
        }
        let document = url.split('?').next().unwrap_or(url);
        let content = inner.documents.get(document).cloned().unwrap_or_default();
        Ok(serde_json::json!({ "eContent": content }))
    }

    async fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.offline {
            return Err(TrailError::network("offline"));
        }
        if let Some(hook) = inner.on_post.take() {
            drop(inner);
            hook();
            inner = self.inner.lock().unwrap();
        }

        let fields: HashMap<String, String> = form
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        if let Some(encrypted) = fields.get("encryptedContent") {
            inner.documents.insert(url.to_string(), encrypted.clone());
        }
        inner.posts.push(fields);
        Ok(())
    }
}
