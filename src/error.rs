//! Error taxonomy for the offline runtime.
//!
//! Transport failures are always recovered locally (cache or offline
//! fallback) and never reach the user as a hard error; storage failures are
//! propagated without internal retry; sync delivery failures leave the
//! pending queue intact for the next host-driven attempt.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for runtime operations
#[derive(Debug, Error)]
pub enum Error {
  /// Network unreachable, DNS failure, timeout. Recovered by falling back
  /// to cache or the offline page.
  #[error("transport failure: {0}")]
  Transport(String),

  /// Durable store operation rejected (quota, corruption, lock poisoning).
  /// Not retried internally.
  #[error("storage failure: {0}")]
  Storage(String),

  /// A submitted write was rejected for missing or invalid fields.
  #[error("validation failure: {0}")]
  Validation(String),

  /// Remote API unreachable or returned non-success during a drain.
  /// The pending queue is retained.
  #[error("sync delivery failure: {0}")]
  SyncDelivery(String),

  #[error("configuration error: {0}")]
  Config(String),
}

impl Error {
  pub fn is_transport(&self) -> bool {
    matches!(self, Error::Transport(_))
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    Error::Storage(e.to_string())
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Error::Storage(format!("serialization: {}", e))
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    Error::Transport(e.to_string())
  }
}
