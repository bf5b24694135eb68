//! Sync queue coordinator: deferred-write registration and the drain.
//!
//! The coordinator never polls and never backs off on its own; the host
//! invokes the drain when connectivity allows. A drain captures a snapshot
//! of the pending log, submits it as one batch, and clears exactly the
//! snapshotted entries only on an all-created reply. Anything else retains
//! the queue for the next invocation (at-least-once delivery; the remote
//! deduplicates by id).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::api::{FeedApi, SubmitOutcome};
use crate::error::{Error, Result};
use crate::store::DurableStore;

/// Tag under which client writes ask to be synced.
pub const SYNC_POSTS_TAG: &str = "sync-new-posts";

/// Outcome of one host-driven drain invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
  /// Nothing pending; no network call was made
  Empty,
  /// The whole snapshot was delivered and cleared
  Delivered { count: usize },
  /// Delivery failed; the queue is retained for the next invocation
  Retained { count: usize, reason: String },
  /// Not a tag this coordinator drains
  IgnoredTag,
}

#[derive(Clone)]
pub struct SyncCoordinator {
  store: DurableStore,
  api: FeedApi,
  registered: Arc<Mutex<HashSet<String>>>,
}

impl SyncCoordinator {
  pub fn new(store: DurableStore, api: FeedApi) -> Self {
    Self {
      store,
      api,
      registered: Arc::new(Mutex::new(HashSet::new())),
    }
  }

  /// Record that queued writes are waiting under `tag`. Called by the
  /// client right after a write lands in the pending log; the host decides
  /// when connectivity allows a drain.
  pub fn register(&self, tag: &str) -> Result<()> {
    self
      .registered
      .lock()
      .map_err(|e| Error::Storage(format!("lock poisoned: {}", e)))?
      .insert(tag.to_string());
    debug!(%tag, "sync registration recorded");
    Ok(())
  }

  /// Whether a registration is outstanding for `tag`.
  pub fn is_registered(&self, tag: &str) -> bool {
    self
      .registered
      .lock()
      .map(|tags| tags.contains(tag))
      .unwrap_or(false)
  }

  fn unregister(&self, tag: &str) {
    if let Ok(mut tags) = self.registered.lock() {
      tags.remove(tag);
    }
  }

  /// Drain the pending log against the remote API.
  ///
  /// Storage failures propagate; delivery failures come back as
  /// `Retained` so the host simply tries again later.
  pub async fn drain(&self, tag: &str) -> Result<DrainOutcome> {
    if tag != SYNC_POSTS_TAG {
      debug!(%tag, "ignoring sync invocation for unknown tag");
      return Ok(DrainOutcome::IgnoredTag);
    }

    let Some(snapshot) = self.store.pending_snapshot()? else {
      debug!("pending log empty, nothing to drain");
      return Ok(DrainOutcome::Empty);
    };
    let count = snapshot.posts.len();

    match self.api.submit_batch(&snapshot.posts).await {
      Ok(SubmitOutcome::Created(created)) => {
        self.store.clear_through(snapshot.boundary)?;
        self.unregister(tag);
        info!(count, confirmed = created.len(), "pending writes delivered");
        Ok(DrainOutcome::Delivered { count })
      }
      Ok(SubmitOutcome::Partial { created, failed }) => {
        // Partial batch success clears nothing; the identical batch is
        // retried and the remote deduplicates by id
        for failure in &failed {
          warn!(
            index = failure.index,
            error = %failure.error,
            data = %failure.data,
            "item rejected in partial batch"
          );
        }
        let reason = format!(
          "partial success: {} created, {} rejected",
          created.len(),
          failed.len()
        );
        warn!(count, "{}; queue retained", reason);
        Ok(DrainOutcome::Retained { count, reason })
      }
      Ok(SubmitOutcome::Rejected { failed }) => {
        for failure in &failed {
          warn!(
            index = failure.index,
            error = %failure.error,
            data = %failure.data,
            "item rejected by validation"
          );
        }
        let reason = format!("batch rejected: {} validation failures", failed.len());
        warn!(count, "{}; queue retained", reason);
        Ok(DrainOutcome::Retained { count, reason })
      }
      Err(err @ (Error::Transport(_) | Error::SyncDelivery(_))) => {
        warn!(count, "drain failed: {}; queue retained", err);
        Ok(DrainOutcome::Retained {
          count,
          reason: err.to_string(),
        })
      }
      Err(err) => Err(err),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entity::Post;
  use crate::store::Collection;

  fn coordinator(server_url: &str) -> (SyncCoordinator, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = DurableStore::open(dir.path()).unwrap();
    let api = FeedApi::new(&format!("{}/api/posts", server_url));
    (SyncCoordinator::new(store, api), dir)
  }

  fn queue_post(coordinator: &SyncCoordinator, id: &str) {
    let post = Post {
      id: id.to_string(),
      title: "Boat".to_string(),
      location: "SF, CA".to_string(),
      image: Default::default(),
    };
    coordinator.store.put(Collection::Pending, &post).unwrap();
    coordinator.register(SYNC_POSTS_TAG).unwrap();
  }

  #[tokio::test]
  async fn test_empty_drain_makes_no_network_call() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/api/posts")
      .expect(0)
      .create_async()
      .await;

    let (coordinator, _dir) = coordinator(&server.url());
    assert_eq!(coordinator.drain(SYNC_POSTS_TAG).await.unwrap(), DrainOutcome::Empty);
    assert_eq!(coordinator.drain(SYNC_POSTS_TAG).await.unwrap(), DrainOutcome::Empty);

    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_offline_write_is_delivered_on_reconnect() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/api/posts")
      .match_body(mockito::Matcher::PartialJson(serde_json::json!([
        {"id": "a1", "title": "Boat", "location": "SF, CA"}
      ])))
      .with_status(201)
      .with_header("content-type", "application/json")
      .with_body(r#"{"message":"All posts created successfully","posts":[{"id":"a1","title":"Boat","location":"SF, CA"}]}"#)
      .create_async()
      .await;

    let (coordinator, _dir) = coordinator(&server.url());
    queue_post(&coordinator, "a1");
    assert!(coordinator.is_registered(SYNC_POSTS_TAG));

    // Connectivity restored: the host invokes the drain
    let outcome = coordinator.drain(SYNC_POSTS_TAG).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Delivered { count: 1 });
    assert_eq!(coordinator.store.pending_count().unwrap(), 0);
    assert!(!coordinator.is_registered(SYNC_POSTS_TAG));

    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_transient_failure_retains_then_delivers() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/api/posts")
      .with_status(503)
      .with_body("unavailable")
      .create_async()
      .await;

    let (coordinator, _dir) = coordinator(&server.url());
    queue_post(&coordinator, "a1");
    queue_post(&coordinator, "a2");

    let outcome = coordinator.drain(SYNC_POSTS_TAG).await.unwrap();
    assert!(matches!(outcome, DrainOutcome::Retained { count: 2, .. }));
    assert_eq!(coordinator.store.pending_count().unwrap(), 2);

    // Remote recovers; the identical batch goes out again
    server
      .mock("POST", "/api/posts")
      .with_status(201)
      .with_header("content-type", "application/json")
      .with_body(r#"{"message":"All posts created successfully","posts":[{"id":"a1","title":"Boat","location":"SF, CA"},{"id":"a2","title":"Boat","location":"SF, CA"}]}"#)
      .create_async()
      .await;

    let outcome = coordinator.drain(SYNC_POSTS_TAG).await.unwrap();
    assert_eq!(outcome, DrainOutcome::Delivered { count: 2 });
    assert_eq!(coordinator.store.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_partial_success_retains_whole_batch() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/api/posts")
      .with_status(207)
      .with_body(
        r#"{"message":"Some posts were created successfully","created":[{"id":"a1","title":"Boat","location":"SF, CA"}],"failed":[{"index":1,"error":"Title and location are required","data":{"id":"a2"}}]}"#,
      )
      .create_async()
      .await;

    let (coordinator, _dir) = coordinator(&server.url());
    queue_post(&coordinator, "a1");
    queue_post(&coordinator, "a2");

    let outcome = coordinator.drain(SYNC_POSTS_TAG).await.unwrap();
    assert!(matches!(outcome, DrainOutcome::Retained { count: 2, .. }));
    assert_eq!(coordinator.store.pending_count().unwrap(), 2);
  }

  #[tokio::test]
  async fn test_unknown_tag_is_ignored() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/api/posts")
      .expect(0)
      .create_async()
      .await;

    let (coordinator, _dir) = coordinator(&server.url());
    queue_post(&coordinator, "a1");

    let outcome = coordinator.drain("sync-other-things").await.unwrap();
    assert_eq!(outcome, DrainOutcome::IgnoredTag);
    assert_eq!(coordinator.store.pending_count().unwrap(), 1);

    mock.assert_async().await;
  }
}
