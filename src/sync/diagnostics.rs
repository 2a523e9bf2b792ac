use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogClass {
    Pending,
    Done,
    Error,
    /// Failed, but the contribution was kept in the pending queue
    ErrorPending,
}

impl LogClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogClass::Pending => "pending",
            LogClass::Done => "done",
            LogClass::Error => "error",
            LogClass::ErrorPending => "error pending",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub class: LogClass,
    pub text: String, // HTML-escaped
}

/// Escape text for display inside HTML
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// User-visible, append-only log of sync activity
///
/// Cheap to clone; clones share the same entries. Every entry is also sent
/// to the `log` facade.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, class: LogClass, text: &str) {
        match class {
            LogClass::Error | LogClass::ErrorPending => log::warn!("[{}] {}", class.as_str(), text),
            _ => log::info!("[{}] {}", class.as_str(), text),
        }
        let entry = LogEntry {
            class,
            text: escape_html(text),
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    pub fn pending(&self, text: &str) {
        self.push(LogClass::Pending, text);
    }

    pub fn error(&self, text: &str) {
        self.push(LogClass::Error, text);
    }

    /// Record success; a trailing `pending` entry for the same text is replaced
    pub fn done(&self, text: &str) {
        let escaped = escape_html(text);
        if let Ok(mut entries) = self.entries.lock() {
            if entries
                .last()
                .map_or(false, |e| e.class == LogClass::Pending && e.text == escaped)
            {
                entries.pop();
            }
        }
        self.push(LogClass::Done, text);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
