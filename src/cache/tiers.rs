//! Named response cache tiers over SQLite.
//!
//! A tier is created implicitly by its first `put`, enumerated by name, and
//! evicted wholesale by name. Entries are byte-exact responses keyed by
//! request identity; the version-based eviction contract lives in the tier
//! names themselves (one version-tagged static tier, the rest versionless).

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::response::{Request, Response};
use crate::error::{Error, Result};

/// Fixed database file name for the response cache.
pub const CACHE_NAME: &str = "response-cache.db";

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    tier TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (tier, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_key
    ON response_cache(request_key);
"#;

/// Manager for the named, independently-lifecycled cache tiers.
#[derive(Clone)]
pub struct TierManager {
  conn: Arc<Mutex<Connection>>,
}

impl TierManager {
  /// Open (or create) the response cache at `dir/response-cache.db`.
  pub fn open(dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(dir)
      .map_err(|e| Error::Storage(format!("failed to create cache directory: {}", e)))?;

    let path = dir.join(CACHE_NAME);
    let conn = Connection::open(&path)
      .map_err(|e| Error::Storage(format!("failed to open cache at {}: {}", path.display(), e)))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| Error::Storage(format!("failed to run cache migrations: {}", e)))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Storage(format!("lock poisoned: {}", e)))
  }

  /// Store a response copy in the named tier, upserting by request identity.
  pub fn put(&self, tier: &str, request: &Request, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    let headers = serde_json::to_string(&response.headers)?;

    conn.execute(
      "INSERT OR REPLACE INTO response_cache (tier, request_key, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        tier,
        request.identity(),
        response.url,
        response.status,
        headers,
        response.body
      ],
    )?;

    Ok(())
  }

  /// Exact prior match anywhere, searching tiers in name order.
  pub fn match_any(&self, request: &Request) -> Result<Option<(String, Response)>> {
    let conn = self.lock()?;

    let row: Option<(String, String, u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT tier, url, status, headers, body FROM response_cache
         WHERE request_key = ? ORDER BY tier LIMIT 1",
        params![request.identity()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()?;

    row
      .map(|(tier, url, status, headers, body)| {
        Ok((
          tier,
          Response {
            url,
            status,
            headers: serde_json::from_str(&headers)?,
            body,
          },
        ))
      })
      .transpose()
  }

  /// Exact prior match within one tier.
  pub fn match_in_tier(&self, tier: &str, request: &Request) -> Result<Option<Response>> {
    let conn = self.lock()?;

    let row: Option<(String, u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT url, status, headers, body FROM response_cache
         WHERE tier = ? AND request_key = ?",
        params![tier, request.identity()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    row
      .map(|(url, status, headers, body)| {
        Ok(Response {
          url,
          status,
          headers: serde_json::from_str(&headers)?,
          body,
        })
      })
      .transpose()
  }

  /// Names of every tier that currently holds at least one entry.
  pub fn tier_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn.prepare("SELECT DISTINCT tier FROM response_cache ORDER BY tier")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<std::result::Result<_, _>>()?;

    Ok(names)
  }

  /// Number of entries in a tier.
  pub fn entry_count(&self, tier: &str) -> Result<u64> {
    let conn = self.lock()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM response_cache WHERE tier = ?",
      params![tier],
      |row| row.get(0),
    )?;
    Ok(count as u64)
  }

  /// Evict a whole tier by name. Returns whether anything was removed.
  pub fn delete_tier(&self, tier: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn.execute("DELETE FROM response_cache WHERE tier = ?", params![tier])?;
    Ok(removed > 0)
  }
}
