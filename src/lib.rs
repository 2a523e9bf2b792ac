//! Follow a participant along a reference course from noisy GPS fixes, and
//! share those fixes through an encrypted append-only log.

pub mod config;
pub mod error;
pub mod format;
pub mod location;
pub mod matching;
pub mod session;
pub mod store;
pub mod sync;
pub mod track;
pub mod types;

pub use config::{Config, Preferences, SyncSettings};
pub use error::{Result, TrailError};
pub use session::Session;
pub use store::LocalStore;
pub use types::{Fix, FixLog, TrailPoint};
