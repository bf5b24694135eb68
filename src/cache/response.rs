//! Request and response types as seen by the cache and fetch layers.

use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Error, Result};

/// An outgoing request, reduced to what cache identity needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  /// Uppercase HTTP verb
  pub method: String,
  pub url: String,
}

impl Request {
  pub fn get(url: &str) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.to_string(),
    }
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  /// Stable fixed-length cache key for this request.
  pub fn identity(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Origin (`scheme://host[:port]`) of the request URL, if it parses.
  pub fn origin(&self) -> Option<String> {
    let url = Url::parse(&self.url).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
      Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
      None => format!("{}://{}", url.scheme(), host),
    })
  }
}

/// A network response held byte-exact: status, headers, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Parse the body as JSON.
  pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_slice(&self.body)
      .map_err(|e| Error::Transport(format!("invalid response body from {}: {}", self.url, e)))
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Where a fetched response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
  /// Served from a cache tier with no network activity
  Cache { tier: String },
  /// Fresh from the network
  Network,
  /// Transport failed; this is the pre-cached offline substitute
  OfflineFallback,
}
