//! Install/activate lifecycle: pre-caching the app shell and evicting
//! stale versioned tiers.

use tracing::{info, warn};

use crate::cache::{Request, TierManager};
use crate::error::{Error, Result};
use crate::fetch;
use crate::host::ClientSurface;
use crate::routes::STATIC_TIER_PREFIX;

/// Lifecycle states, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  /// Installed and waiting to take over
  Installed,
  Activating,
  /// Serving all clients until the next version installs
  Activated,
}

/// Governs install, activation, and version transitions.
pub struct LifecycleManager {
  tiers: TierManager,
  client: reqwest::Client,
  /// Version-tagged name of this version's static tier
  static_tier: String,
  precache_urls: Vec<String>,
  state: LifecycleState,
  skip_waiting: bool,
}

impl LifecycleManager {
  pub fn new(tiers: TierManager, static_tier: &str, precache_urls: Vec<String>) -> Self {
    Self {
      tiers,
      client: reqwest::Client::new(),
      static_tier: static_tier.to_string(),
      precache_urls,
      state: LifecycleState::Installing,
      skip_waiting: false,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// Collapse the waiting period so this version activates without waiting
  /// for open clients to close.
  pub fn skip_waiting(&mut self) {
    self.skip_waiting = true;
  }

  /// Pre-populate the static tier with the whole asset manifest, fetched
  /// concurrently.
  ///
  /// All-or-nothing: a single failed asset fails the install and the state
  /// stays `Installing` for a retry.
  pub async fn install(&mut self) -> Result<()> {
    info!(
      count = self.precache_urls.len(),
      tier = %self.static_tier,
      "installing: pre-caching static assets"
    );

    let fetches = self.precache_urls.iter().map(|url| {
      let client = self.client.clone();
      async move {
        let request = Request::get(url);
        let response = fetch::forward(&client, &request).await?;
        if !response.is_success() {
          return Err(Error::Transport(format!(
            "pre-cache fetch for {} returned {}",
            url, response.status
          )));
        }
        Ok((request, response))
      }
    });
    let assets = futures::future::try_join_all(fetches).await?;

    for (request, response) in &assets {
      self.tiers.put(&self.static_tier, request, response)?;
    }

    self.state = LifecycleState::Installed;
    info!("install complete");
    Ok(())
  }

  /// Evict every versioned tier that is not this version's, then claim all
  /// open clients. Versionless tiers are left alone.
  pub fn activate(&mut self, clients: &dyn ClientSurface) -> Result<Vec<String>> {
    if self.state == LifecycleState::Installed && !self.skip_waiting {
      info!("activating without an explicit skip-waiting directive");
    }
    self.state = LifecycleState::Activating;

    let mut evicted = Vec::new();
    for name in self.tiers.tier_names()? {
      if name.starts_with(STATIC_TIER_PREFIX) && name != self.static_tier {
        if self.tiers.delete_tier(&name)? {
          info!(tier = %name, "evicted stale static tier");
          evicted.push(name);
        }
      }
    }

    clients.claim_all();
    self.state = LifecycleState::Activated;
    info!(evicted = evicted.len(), "activation complete");

    if evicted.is_empty() && self.tiers.entry_count(&self.static_tier)? == 0 {
      warn!(tier = %self.static_tier, "activated with an empty static tier; was install run?");
    }

    Ok(evicted)
  }
}
