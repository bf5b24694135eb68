//! Durable record store: the mirrored feed and the pending-write log.
//!
//! One SQLite database with two collections, both keyed by post id. The
//! mirror holds the last-known server state and is only ever replaced
//! wholesale; pending writes form an append-only log with a monotonic
//! sequence so a drain can capture a snapshot boundary and later remove
//! exactly the entries it submitted.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::entity::Post;
use crate::error::{Error, Result};

/// Fixed database file name.
pub const STORE_NAME: &str = "posts-store.db";

const SCHEMA_VERSION: i32 = 1;

/// Schema for the two record collections. `IF NOT EXISTS` gates creation so
/// repeated opens across version bumps never fail on "already exists".
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS posts (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_posts (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    data BLOB NOT NULL
);
"#;

/// The two named collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
  /// Last-known server state of the feed
  Mirror,
  /// Client writes awaiting delivery
  Pending,
}

impl Collection {
  fn table(self) -> &'static str {
    match self {
      Collection::Mirror => "posts",
      Collection::Pending => "sync_posts",
    }
  }
}

/// A boundary captured at the start of a drain: the queued posts plus the
/// highest sequence number among them.
#[derive(Debug, Clone)]
pub struct PendingSnapshot {
  pub posts: Vec<Post>,
  pub boundary: i64,
}

/// Durable store over a single SQLite database.
#[derive(Clone)]
pub struct DurableStore {
  conn: Arc<Mutex<Connection>>,
}

impl DurableStore {
  /// Open (or create) the store at `dir/posts-store.db` and run the
  /// idempotent schema migration.
  pub fn open(dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(dir)
      .map_err(|e| Error::Storage(format!("failed to create data directory: {}", e)))?;

    let path = dir.join(STORE_NAME);
    let conn = Connection::open(&path)
      .map_err(|e| Error::Storage(format!("failed to open store at {}: {}", path.display(), e)))?;

    let store = Self {
      conn: Arc::new(Mutex::new(conn)),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| Error::Storage(format!("failed to run store migrations: {}", e)))?;
    conn
      .pragma_update(None, "user_version", SCHEMA_VERSION)
      .map_err(|e| Error::Storage(format!("failed to set schema version: {}", e)))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Storage(format!("lock poisoned: {}", e)))
  }

  /// Get a single record by id.
  pub fn get(&self, collection: Collection, id: &str) -> Result<Option<Post>> {
    let conn = self.lock()?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        &format!("SELECT data FROM {} WHERE id = ?", collection.table()),
        params![id],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  /// Get every record in a collection, in insertion order.
  pub fn get_all(&self, collection: Collection) -> Result<Vec<Post>> {
    let conn = self.lock()?;

    let order = match collection {
      Collection::Mirror => "rowid",
      Collection::Pending => "seq",
    };
    let mut stmt = conn.prepare(&format!(
      "SELECT data FROM {} ORDER BY {}",
      collection.table(),
      order
    ))?;

    let rows: Vec<Vec<u8>> = stmt
      .query_map([], |row| row.get(0))?
      .collect::<std::result::Result<_, _>>()?;

    rows
      .into_iter()
      .map(|bytes| serde_json::from_slice(&bytes).map_err(Error::from))
      .collect()
  }

  /// Store a record.
  ///
  /// Mirror puts upsert by id. Pending puts append to the log and are
  /// rejected if the id is already queued: a post is never mutated in place.
  pub fn put(&self, collection: Collection, post: &Post) -> Result<()> {
    let conn = self.lock()?;
    let data = serde_json::to_vec(post)?;

    match collection {
      Collection::Mirror => {
        conn.execute(
          "INSERT OR REPLACE INTO posts (id, data) VALUES (?, ?)",
          params![post.id, data],
        )?;
      }
      Collection::Pending => {
        conn
          .execute(
            "INSERT INTO sync_posts (id, data) VALUES (?, ?)",
            params![post.id, data],
          )
          .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
              if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
              Error::Validation(format!("post {} is already queued", post.id))
            }
            other => Error::from(other),
          })?;
      }
    }

    Ok(())
  }

  /// Remove every record in a collection.
  pub fn clear(&self, collection: Collection) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(&format!("DELETE FROM {}", collection.table()), [])?;
    Ok(())
  }

  /// Replace the mirror wholesale with the given posts, in one transaction.
  pub fn replace_mirror(&self, posts: &[Post]) -> Result<()> {
    let conn = self.lock()?;

    conn.execute("BEGIN TRANSACTION", [])?;

    let result = (|| -> Result<()> {
      conn.execute("DELETE FROM posts", [])?;
      for post in posts {
        let data = serde_json::to_vec(post)?;
        conn.execute(
          "INSERT INTO posts (id, data) VALUES (?, ?)",
          params![post.id, data],
        )?;
      }
      Ok(())
    })();

    match result {
      Ok(()) => {
        conn.execute("COMMIT", [])?;
        Ok(())
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }

  /// Capture the current pending log as a snapshot boundary.
  ///
  /// Returns `None` when the log is empty.
  pub fn pending_snapshot(&self) -> Result<Option<PendingSnapshot>> {
    let conn = self.lock()?;

    let mut stmt = conn.prepare("SELECT seq, data FROM sync_posts ORDER BY seq")?;
    let rows: Vec<(i64, Vec<u8>)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<std::result::Result<_, _>>()?;

    let Some(&(boundary, _)) = rows.last() else {
      return Ok(None);
    };

    let posts = rows
      .into_iter()
      .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(Error::from))
      .collect::<Result<Vec<Post>>>()?;

    Ok(Some(PendingSnapshot { posts, boundary }))
  }

  /// Remove exactly the snapshotted entries: everything at or below the
  /// boundary. Writes queued after the snapshot stay for the next drain.
  pub fn clear_through(&self, boundary: i64) -> Result<()> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM sync_posts WHERE seq <= ?", params![boundary])?;
    Ok(())
  }

  /// Number of writes awaiting delivery.
  pub fn pending_count(&self) -> Result<u64> {
    let conn = self.lock()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_posts", [], |row| row.get(0))?;
    Ok(count as u64)
  }
}
