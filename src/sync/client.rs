use super::crypto::{Cipher, CryptoJsCipher};
use super::diagnostics::{DiagnosticLog, LogClass};
use super::pending::PendingQueue;
use super::transport::{HttpTransport, Transport};
use crate::config::SyncSettings;
use crate::error::{Result, TrailError};
use std::sync::atomic::{AtomicU64, Ordering};

/// Suffix appended to both compare-and-swap hashes by the store's protocol
const HASH_VERSION: &str = "2";

/// Client of the encrypted, append-only shared log
///
/// # Protocol
/// - `GET  {relay}{endpoint}{docid}?action=getJSON` → `{"eContent": ...}`
/// - `POST {relay}{endpoint}{docid}` with `initHashContent`,
///   `currentHashContent`, `encryptedContent`, `action=save`
///
/// The plaintext document is the log content followed by `hash("/" + docid)`,
/// which is checked and stripped on read.
///
/// # Failure policy
/// Nothing escapes this boundary: a failed read yields empty content, a
/// failed append leaves the chunk in the [`PendingQueue`]; both are recorded
/// in the [`DiagnosticLog`].
///
/// The hashes sent with an append only *signal* the expected previous state.
/// Whether the store rejects a stale write is not checked, a 2xx answer is
/// taken as success.
pub struct SharedLogClient {
    transport: Box<dyn Transport>,
    cipher: Box<dyn Cipher>,
    settings: SyncSettings,
    pending: PendingQueue,
    diagnostics: DiagnosticLog,
    issued_fetches: AtomicU64,
    applied_fetch: AtomicU64,
}

impl SharedLogClient {
    pub fn new(
        settings: SyncSettings,
        transport: Box<dyn Transport>,
        cipher: Box<dyn Cipher>,
        pending: PendingQueue,
        diagnostics: DiagnosticLog,
    ) -> Self {
        SharedLogClient {
            transport,
            cipher,
            settings,
            pending,
            diagnostics,
            issued_fetches: AtomicU64::new(0),
            applied_fetch: AtomicU64::new(0),
        }
    }

    /// Client over HTTPS with the CryptoJS-compatible cipher
    pub fn http(settings: SyncSettings, pending: PendingQueue, diagnostics: DiagnosticLog) -> Result<Self> {
        let transport = HttpTransport::new(settings.timeout_secs)?;
        Ok(Self::new(settings, Box::new(transport), Box::new(CryptoJsCipher), pending, diagnostics))
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    /// Remote document id; the store reserves `@`, so it becomes `__`
    pub fn document_id(&self, key: &str) -> String {
        format!(
            "{}{}{}",
            self.settings.document_prefix,
            key.replacen('@', "__", 1),
            self.settings.document_suffix
        )
    }

    fn integrity_token(&self, docid: &str) -> String {
        self.cipher.hash(&format!("/{}", docid))
    }

    fn relay(&self) -> &str {
        self.settings.cors_relay.as_deref().unwrap_or("")
    }

    fn get_url(&self, docid: &str) -> String {
        format!("{}{}{}?action=getJSON", self.relay(), self.settings.endpoint, docid)
    }

    fn post_url(&self, docid: &str) -> String {
        format!("{}{}{}", self.relay(), self.settings.endpoint, docid)
    }

    /// Human-openable link to the document, passphrase included
    pub fn share_link(&self, key: &str) -> String {
        format!(
            "{}{}?{}",
            self.settings.endpoint,
            self.document_id(key),
            self.settings.passphrase
        )
    }

    /// Read and decrypt the log, propagating every failure
    pub async fn try_fetch(&self, key: &str) -> Result<String> {
        let docid = self.document_id(key);
        let body = self
            .transport
            .get_json(&self.get_url(&docid), self.settings.cors_relay.is_some())
            .await?;

        let encrypted = body.get("eContent").and_then(|v| v.as_str()).unwrap_or("");
        if encrypted.is_empty() {
            log::debug!("Shared document {} is empty", docid);
            return Ok(String::new());
        }

        let raw = self.cipher.decrypt(encrypted, &self.settings.passphrase)?;
        let token = self.integrity_token(&docid);
        if raw.len() < token.len() {
            return Err(TrailError::decode("payload shorter than integrity token"));
        }
        match raw.strip_suffix(token.as_str()) {
            Some(content) => Ok(content.to_string()),
            None => Err(TrailError::decode("integrity token mismatch")),
        }
    }

    /// Read the log; any failure is recorded and yields empty content
    pub async fn fetch(&self, key: &str) -> String {
        match self.try_fetch(key).await {
            Ok(content) => content,
            Err(e) => {
                self.diagnostics
                    .error(&format!("Cannot read shared log: {}", e));
                String::new()
            }
        }
    }

    /// Like [`fetch`](Self::fetch), but `None` when a fetch issued later has
    /// already been answered
    pub async fn fetch_latest(&self, key: &str) -> Option<String> {
        let generation = self.issued_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let content = self.fetch(key).await;
        let newest_applied = self.applied_fetch.fetch_max(generation, Ordering::SeqCst);
        if newest_applied > generation {
            log::debug!(
                "Dropping superseded shared-log response #{} (#{} already applied)",
                generation,
                newest_applied
            );
            return None;
        }
        Some(content)
    }

    /// Append `chunk` after a newline and write the whole document back
    ///
    /// Returns the new content.
    pub async fn append(&self, key: &str, chunk: &str) -> Result<String> {
        let docid = self.document_id(key);
        let content = self.try_fetch(key).await?;

        let passphrase_hash = self.cipher.hash(&self.settings.passphrase);
        let init_hash = format!(
            "{}{}",
            self.cipher.hash(&format!("{}{}", content, passphrase_hash)),
            HASH_VERSION
        );
        let new_content = format!("{}\n{}", content, chunk);
        let current_hash = format!(
            "{}{}",
            self.cipher.hash(&format!("{}{}", new_content, passphrase_hash)),
            HASH_VERSION
        );
        let encrypted = self.cipher.encrypt(
            &format!("{}{}", new_content, self.integrity_token(&docid)),
            &self.settings.passphrase,
        )?;

        let form = [
            ("initHashContent", init_hash),
            ("currentHashContent", current_hash),
            ("encryptedContent", encrypted),
            ("action", "save".to_string()),
        ];
        self.transport.post_form(&self.post_url(&docid), &form).await?;
        log::debug!("Appended {} bytes to {}", chunk.len(), docid);
        Ok(new_content)
    }

    /// Append, or keep the chunk for later when the store cannot be reached
    pub async fn append_or_enqueue(&self, key: &str, chunk: &str) -> Option<String> {
        match self.append(key, chunk).await {
            Ok(content) => Some(content),
            Err(e) => {
                self.pending.push(chunk.to_string());
                self.diagnostics
                    .push(LogClass::ErrorPending, &format!("{}… saved as pending", e));
                None
            }
        }
    }

    /// Send every queued chunk in one append
    ///
    /// On success exactly the chunks present when the attempt started are
    /// removed. Chunks queued meanwhile stay, and a warning is recorded.
    pub async fn send_pending(&self, key: &str) -> Option<String> {
        let queued = self.pending.snapshot();
        let count = queued.len();
        if count == 0 {
            return None;
        }

        match self.append(key, &queued.join("\n")).await {
            Ok(content) => {
                if self.pending.len() != count {
                    self.diagnostics.error(&format!(
                        "{} pending contributions sent but the queue changed meanwhile",
                        count
                    ));
                } else {
                    self.diagnostics
                        .done(&format!("{} pending contributions sent.", count));
                }
                self.pending.drain_front(count);
                Some(content)
            }
            Err(e) => {
                self.diagnostics.error(&e.to_string());
                None
            }
        }
    }
}
