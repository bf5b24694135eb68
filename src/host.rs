//! Host event dispatch.
//!
//! The platform's events flow through one table: each `HostEvent` maps onto
//! a handler owned by the `Runtime`. The future `dispatch` returns is the
//! handler's lifetime-extension contract: the host awaits it before tearing
//! anything down. Components are constructed explicitly and passed in by
//! handle; there are no ambient singletons.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::cache::{Request, TierManager};
use crate::entity::Post;
use crate::error::{Error, Result};
use crate::fetch::{FetchHandler, Fetched};
use crate::lifecycle::LifecycleManager;
use crate::store::{Collection, DurableStore};
use crate::sync::{DrainOutcome, SyncCoordinator, SYNC_POSTS_TAG};

/// Events the host platform dispatches into the runtime.
#[derive(Debug, Clone)]
pub enum HostEvent {
  Install,
  Activate,
  Fetch(Request),
  Sync { tag: String },
  /// Opaque push payload, JSON on this platform
  Push { payload: String },
  NotificationClick { action: String, open_url: String },
}

/// What a dispatched event produced.
#[derive(Debug)]
pub enum EventOutcome {
  Installed,
  Activated { evicted: Vec<String> },
  Fetched(Fetched),
  Synced(DrainOutcome),
  Notified(Notification),
  Handled,
}

/// A displayed notification, fields per the app's push contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub open_url: String,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
  title: String,
  body: String,
  #[serde(rename = "openUrl")]
  open_url: Option<String>,
}

impl Notification {
  /// Parse a push payload into a displayable notification.
  pub fn from_push_payload(payload: &str) -> Result<Self> {
    let parsed: PushPayload = serde_json::from_str(payload)
      .map_err(|e| Error::Validation(format!("malformed push payload: {}", e)))?;

    Ok(Self {
      title: parsed.title,
      body: parsed.body,
      icon: "/src/images/icons/app-icon-96x96.png".to_string(),
      badge: "/src/images/icons/app-icon-96x96.png".to_string(),
      vibrate: vec![100, 50, 200],
      open_url: parsed.open_url.unwrap_or_else(|| "/".to_string()),
    })
  }
}

/// Open client windows, as far as the runtime can see them.
pub trait ClientSurface: Send + Sync {
  /// Take over every open client so the new version serves them without a
  /// reload.
  fn claim_all(&self);

  /// Navigate and focus a visible client. Returns false when none exists.
  fn navigate_existing(&self, url: &str) -> bool;

  fn open_window(&self, url: &str);
}

/// Where notifications are displayed.
pub trait NotificationSurface: Send + Sync {
  fn show(&self, notification: &Notification);
}

/// Client surface for a host without windows: claims are a no-op and
/// navigation always opens "a new window" in the log.
pub struct LogClientSurface;

impl ClientSurface for LogClientSurface {
  fn claim_all(&self) {
    info!("claimed open clients");
  }

  fn navigate_existing(&self, _url: &str) -> bool {
    false
  }

  fn open_window(&self, url: &str) {
    info!(%url, "opening window");
  }
}

/// Notification surface that prints to standard output.
pub struct StdoutNotificationSurface;

impl NotificationSurface for StdoutNotificationSurface {
  fn show(&self, notification: &Notification) {
    println!("🔔 {}: {}", notification.title, notification.body);
    debug!(
      icon = %notification.icon,
      badge = %notification.badge,
      vibrate = ?notification.vibrate,
      open_url = %notification.open_url,
      "notification displayed"
    );
  }
}

/// The composition root: owns every component and routes host events.
pub struct Runtime {
  store: DurableStore,
  tiers: TierManager,
  fetch: FetchHandler,
  sync: SyncCoordinator,
  lifecycle: LifecycleManager,
  clients: Arc<dyn ClientSurface>,
  notifications: Arc<dyn NotificationSurface>,
}

impl Runtime {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    store: DurableStore,
    tiers: TierManager,
    fetch: FetchHandler,
    sync: SyncCoordinator,
    lifecycle: LifecycleManager,
    clients: Arc<dyn ClientSurface>,
    notifications: Arc<dyn NotificationSurface>,
  ) -> Self {
    Self {
      store,
      tiers,
      fetch,
      sync,
      lifecycle,
      clients,
      notifications,
    }
  }

  /// Dispatch one host event and run its handler to completion.
  pub async fn dispatch(&mut self, event: HostEvent) -> Result<EventOutcome> {
    debug!(?event, "dispatching host event");
    match event {
      HostEvent::Install => {
        // The app always skips the waiting period
        self.lifecycle.skip_waiting();
        self.lifecycle.install().await?;
        debug!(state = ?self.lifecycle.state(), "lifecycle transition");
        Ok(EventOutcome::Installed)
      }
      HostEvent::Activate => {
        let evicted = self.lifecycle.activate(self.clients.as_ref())?;
        Ok(EventOutcome::Activated { evicted })
      }
      HostEvent::Fetch(request) => Ok(EventOutcome::Fetched(self.fetch.handle(&request).await?)),
      HostEvent::Sync { tag } => Ok(EventOutcome::Synced(self.sync.drain(&tag).await?)),
      HostEvent::Push { payload } => {
        let notification = Notification::from_push_payload(&payload)?;
        self.notifications.show(&notification);
        Ok(EventOutcome::Notified(notification))
      }
      HostEvent::NotificationClick { action, open_url } => {
        if action == "confirm" {
          info!("confirm action acknowledged");
        } else if !self.clients.navigate_existing(&open_url) {
          self.clients.open_window(&open_url);
        }
        Ok(EventOutcome::Handled)
      }
    }
  }

  /// The client submission action: durably queue a post, then register for
  /// a sync opportunity.
  pub fn queue_post(&self, post: &Post) -> Result<()> {
    // Mirrored posts are immutable; a write may only create a new entity
    if self.store.get(Collection::Mirror, &post.id)?.is_some() {
      return Err(Error::Validation(format!("post {} already exists", post.id)));
    }
    self.store.put(Collection::Pending, post)?;
    self.sync.register(SYNC_POSTS_TAG)?;
    info!(id = %post.id, "post queued for deferred delivery");
    Ok(())
  }

  /// Drop the local mirror and the pending queue.
  pub fn clear_local_state(&self) -> Result<()> {
    self.store.clear(Collection::Mirror)?;
    self.store.clear(Collection::Pending)?;
    Ok(())
  }

  /// Last-known server state of the feed, for reads with no network.
  pub fn mirrored_posts(&self) -> Result<Vec<Post>> {
    self.store.get_all(Collection::Mirror)
  }

  pub fn pending_count(&self) -> Result<u64> {
    self.store.pending_count()
  }

  /// (name, entry count) for every live cache tier.
  pub fn tier_summary(&self) -> Result<Vec<(String, u64)>> {
    let mut summary = Vec::new();
    for name in self.tiers.tier_names()? {
      let count = self.tiers.entry_count(&name)?;
      summary.push((name, count));
    }
    Ok(summary)
  }
}
