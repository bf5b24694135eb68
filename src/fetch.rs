//! Fetch interceptor: every outgoing request passes through here and comes
//! back with a response, with or without a network.
//!
//! A matched route executes its strategy; anything else takes the default
//! flow: exact cache match anywhere, then the network with write-through to
//! the dynamic tier, then the pre-cached offline page. Only a transport
//! error triggers the offline substitution; non-2xx responses pass through
//! untouched.

use tracing::{debug, warn};

use crate::api::CollectionBody;
use crate::cache::{Request, Response, ResponseSource, TierManager};
use crate::error::{Error, Result};
use crate::routes::{RouteTable, Strategy, DYNAMIC_TIER, STATIC_TIER};
use crate::store::DurableStore;

/// A response paired with where it came from.
#[derive(Debug)]
pub struct Fetched {
  pub response: Response,
  pub source: ResponseSource,
}

/// The request-handling entry point.
#[derive(Clone)]
pub struct FetchHandler {
  client: reqwest::Client,
  tiers: TierManager,
  store: DurableStore,
  routes: RouteTable,
  offline_url: String,
}

impl FetchHandler {
  pub fn new(
    tiers: TierManager,
    store: DurableStore,
    routes: RouteTable,
    offline_url: &str,
  ) -> Self {
    Self {
      client: reqwest::Client::new(),
      tiers,
      store,
      routes,
      offline_url: offline_url.to_string(),
    }
  }

  /// Produce a response for an outgoing request. Transport failure never
  /// propagates while the offline page is cached.
  pub async fn handle(&self, request: &Request) -> Result<Fetched> {
    match self.routes.select(request) {
      Some(rule) => match rule.strategy.clone() {
        Strategy::StaleWhileRevalidate { tier } => {
          self.stale_while_revalidate(&tier, request).await
        }
        Strategy::NetworkFirstMirror => self.network_first_mirror(request).await,
      },
      None => self.default_flow(request).await,
    }
  }

  /// Cache-first short circuit, then network with write-through to the
  /// dynamic tier, then the offline fallback.
  async fn default_flow(&self, request: &Request) -> Result<Fetched> {
    if let Some((tier, response)) = self.tiers.match_any(request)? {
      debug!(url = %request.url, %tier, "served from cache");
      return Ok(Fetched {
        response,
        source: ResponseSource::Cache { tier },
      });
    }

    match forward(&self.client, request).await {
      Ok(response) => {
        if request.is_get() {
          // A copy is cached; the response goes back untouched
          self.tiers.put(DYNAMIC_TIER, request, &response)?;
        }
        Ok(Fetched {
          response,
          source: ResponseSource::Network,
        })
      }
      Err(err) => self.offline_fallback(request, err),
    }
  }

  /// Return the cached copy immediately and refresh it for next time; with
  /// no cached copy, wait for the network once.
  ///
  /// The lookup falls back to any tier so that install-time pre-cached
  /// copies of route-matched assets are served without the network.
  async fn stale_while_revalidate(&self, tier: &str, request: &Request) -> Result<Fetched> {
    let cached = match self.tiers.match_in_tier(tier, request)? {
      Some(response) => Some((tier.to_string(), response)),
      None => self.tiers.match_any(request)?,
    };
    if let Some((hit_tier, response)) = cached {
      self.spawn_refresh(tier, request);
      return Ok(Fetched {
        response,
        source: ResponseSource::Cache { tier: hit_tier },
      });
    }

    match forward(&self.client, request).await {
      Ok(response) => {
        self.tiers.put(tier, request, &response)?;
        Ok(Fetched {
          response,
          source: ResponseSource::Network,
        })
      }
      Err(err) => self.offline_fallback(request, err),
    }
  }

  /// Network first; on success the mirror is replaced wholesale from the
  /// body before the response is returned unmodified.
  async fn network_first_mirror(&self, request: &Request) -> Result<Fetched> {
    match forward(&self.client, request).await {
      Ok(response) => {
        let body = match response.json::<CollectionBody>() {
          Ok(body) => body,
          // An unparseable collection body counts as a failed fetch
          Err(err) => return self.offline_fallback(request, err),
        };
        self.store.replace_mirror(&body.posts)?;
        debug!(count = body.posts.len(), "mirror replaced from collection fetch");
        Ok(Fetched {
          response,
          source: ResponseSource::Network,
        })
      }
      Err(err) => self.offline_fallback(request, err),
    }
  }

  /// Background refresh of one cache entry. The caller does not wait.
  fn spawn_refresh(&self, tier: &str, request: &Request) {
    let client = self.client.clone();
    let tiers = self.tiers.clone();
    let tier = tier.to_string();
    let request = request.clone();

    tokio::spawn(async move {
      match forward(&client, &request).await {
        Ok(response) => {
          if let Err(e) = tiers.put(&tier, &request, &response) {
            warn!(url = %request.url, %tier, "failed to store refreshed entry: {}", e);
          }
        }
        Err(e) => debug!(url = %request.url, "background refresh failed: {}", e),
      }
    });
  }

  fn offline_fallback(&self, request: &Request, err: Error) -> Result<Fetched> {
    warn!(url = %request.url, "falling back to offline page: {}", err);

    let fallback = Request::get(&self.offline_url);
    match self.tiers.match_in_tier(STATIC_TIER, &fallback)? {
      Some(response) => Ok(Fetched {
        response,
        source: ResponseSource::OfflineFallback,
      }),
      // Nothing pre-cached to substitute, so the failure stands
      None => Err(err),
    }
  }
}

/// Perform the network leg of a request. Only transport-level failures are
/// errors here; any status code comes back as a response.
pub(crate) async fn forward(client: &reqwest::Client, request: &Request) -> Result<Response> {
  let method = reqwest::Method::from_bytes(request.method.as_bytes())
    .map_err(|e| Error::Transport(format!("invalid method {}: {}", request.method, e)))?;

  let response = client.request(method, &request.url).send().await?;

  let status = response.status().as_u16();
  let headers = response
    .headers()
    .iter()
    .map(|(name, value)| {
      (
        name.as_str().to_string(),
        String::from_utf8_lossy(value.as_bytes()).into_owned(),
      )
    })
    .collect();
  let body = response.bytes().await?.to_vec();

  Ok(Response {
    url: request.url.clone(),
    status,
    headers,
    body,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::Collection;

  fn handler_for(server_url: Option<&str>) -> (FetchHandler, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let tiers = TierManager::open(dir.path()).unwrap();
    let store = DurableStore::open(dir.path()).unwrap();
    let collection_url = server_url
      .map(|u| format!("{}/api/posts", u))
      .unwrap_or_else(|| "http://127.0.0.1:1/api/posts".to_string());
    let routes = RouteTable::with_defaults(&collection_url);
    let handler = FetchHandler::new(tiers, store, routes, "http://localhost:8080/offline.html");
    (handler, dir)
  }

  fn precache_offline(handler: &FetchHandler) -> Response {
    let request = Request::get("http://localhost:8080/offline.html");
    let response = Response {
      url: request.url.clone(),
      status: 200,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: b"<h1>You are offline</h1>".to_vec(),
    };
    handler.tiers.put(STATIC_TIER, &request, &response).unwrap();
    response
  }

  #[tokio::test]
  async fn test_precached_asset_served_without_network() {
    let (handler, _dir) = handler_for(None);
    let expected = precache_offline(&handler);

    // The URL resolves nowhere; only the cache can answer
    let fetched = handler
      .handle(&Request::get("http://localhost:8080/offline.html"))
      .await
      .unwrap();

    assert_eq!(fetched.response, expected);
    assert_eq!(
      fetched.source,
      ResponseSource::Cache {
        tier: STATIC_TIER.to_string()
      }
    );
  }

  #[tokio::test]
  async fn test_network_success_populates_dynamic_tier() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/page")
      .with_status(200)
      .with_body("hello")
      .expect(1)
      .create_async()
      .await;

    let (handler, _dir) = handler_for(Some(&server.url()));
    let request = Request::get(&format!("{}/page", server.url()));

    let first = handler.handle(&request).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(first.response.body, b"hello".to_vec());

    // Second fetch is the cache-first short circuit: no second network hit
    let second = handler.handle(&request).await.unwrap();
    assert_eq!(
      second.source,
      ResponseSource::Cache {
        tier: DYNAMIC_TIER.to_string()
      }
    );
    assert_eq!(second.response.body, b"hello".to_vec());

    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_transport_failure_returns_offline_fallback() {
    let (handler, _dir) = handler_for(None);
    let expected = precache_offline(&handler);

    let fetched = handler
      .handle(&Request::get("http://127.0.0.1:1/unreachable"))
      .await
      .unwrap();

    assert_eq!(fetched.source, ResponseSource::OfflineFallback);
    assert_eq!(fetched.response, expected);
  }

  #[tokio::test]
  async fn test_collection_fetch_replaces_mirror_wholesale() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/api/posts")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"{"posts":[{"id":"p1","title":"First","location":"SF, CA"}]}"#)
      .create_async()
      .await;

    let (handler, _dir) = handler_for(Some(&server.url()));
    let request = Request::get(&format!("{}/api/posts", server.url()));

    handler.handle(&request).await.unwrap();
    assert_eq!(handler.store.get_all(Collection::Mirror).unwrap()[0].id, "p1");

    // The mock defined last takes precedence for the same route
    server
      .mock("GET", "/api/posts")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"{"posts":[{"id":"p2","title":"Second","location":"LA, CA"}]}"#)
      .create_async()
      .await;

    let fetched = handler.handle(&request).await.unwrap();
    assert_eq!(fetched.source, ResponseSource::Network);

    let mirrored = handler.store.get_all(Collection::Mirror).unwrap();
    assert_eq!(mirrored.len(), 1);
    assert_eq!(mirrored[0].id, "p2");
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_serves_cached_then_refreshes() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/css")
      .with_status(200)
      .with_body("v1")
      .create_async()
      .await;

    let (handler, _dir) = handler_for(None);
    // Rule table routing this origin into a named tier
    let handler = FetchHandler {
      routes: RouteTable::new(vec![crate::routes::Rule {
        matcher: crate::routes::Matcher::Prefix(server.url()),
        strategy: Strategy::StaleWhileRevalidate {
          tier: "material".to_string(),
        },
      }]),
      ..handler
    };
    let request = Request::get(&format!("{}/css", server.url()));

    // No cached entry yet: waits for the network once
    let first = handler.handle(&request).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(first.response.body, b"v1".to_vec());

    server
      .mock("GET", "/css")
      .with_status(200)
      .with_body("v2")
      .create_async()
      .await;

    // Cached entry: immediate return of the stale copy, refresh in background
    let second = handler.handle(&request).await.unwrap();
    assert_eq!(
      second.source,
      ResponseSource::Cache {
        tier: "material".to_string()
      }
    );
    assert_eq!(second.response.body, b"v1".to_vec());

    // Give the background refresh a moment to land
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let third = handler.handle(&request).await.unwrap();
    assert_eq!(third.response.body, b"v2".to_vec());
  }

  #[tokio::test]
  async fn test_precached_copy_satisfies_route_matched_request() {
    let (handler, _dir) = handler_for(None);
    let handler = FetchHandler {
      routes: RouteTable::new(vec![crate::routes::Rule {
        matcher: crate::routes::Matcher::Origin("http://localhost:9".to_string()),
        strategy: Strategy::StaleWhileRevalidate {
          tier: "material".to_string(),
        },
      }]),
      ..handler
    };

    // Installed into the static tier, not the rule's own tier
    let request = Request::get("http://localhost:9/lib.css");
    let response = Response {
      url: request.url.clone(),
      status: 200,
      headers: Vec::new(),
      body: b"precached".to_vec(),
    };
    handler.tiers.put(STATIC_TIER, &request, &response).unwrap();

    let fetched = handler.handle(&request).await.unwrap();
    assert_eq!(
      fetched.source,
      ResponseSource::Cache {
        tier: STATIC_TIER.to_string()
      }
    );
    assert_eq!(fetched.response.body, b"precached".to_vec());
  }

  #[tokio::test]
  async fn test_non_get_is_not_cached() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/submit")
      .with_status(201)
      .with_body("ok")
      .create_async()
      .await;

    let (handler, _dir) = handler_for(Some(&server.url()));
    let request = Request {
      method: "POST".to_string(),
      url: format!("{}/submit", server.url()),
    };

    let fetched = handler.handle(&request).await.unwrap();
    assert_eq!(fetched.source, ResponseSource::Network);
    assert_eq!(handler.tiers.entry_count(DYNAMIC_TIER).unwrap(), 0);
  }
}
