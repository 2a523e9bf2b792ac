pub mod client;
pub mod crypto;
pub mod diagnostics;
pub mod import;
pub mod pending;
pub mod transport;

#[cfg(test)]
pub(crate) mod memory_store;

pub use client::SharedLogClient;
pub use crypto::{Cipher, CryptoJsCipher};
pub use diagnostics::{escape_html, DiagnosticLog, LogClass, LogEntry};
pub use import::{
    contribute_url, contribution_chunk, contribution_from_params, guess_timestamp, import_contributions,
    url_params, Contribution, SharedImport,
};
pub use pending::PendingQueue;
pub use transport::{HttpTransport, Transport};
