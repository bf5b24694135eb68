//! Route policy table: ordered request matchers bound to caching strategies.
//!
//! Evaluated first-match-wins by linear scan; an unmatched request falls
//! through to the interceptor's default flow against the dynamic tier.

use crate::cache::Request;

/// Version-tagged static tier for the current app shell.
pub const STATIC_TIER: &str = "static-v1";
/// Name prefix shared by every versioned static tier.
pub const STATIC_TIER_PREFIX: &str = "static-";
/// Unversioned tier for opportunistically cached responses.
pub const DYNAMIC_TIER: &str = "dynamic";

pub const FONTS_TIER: &str = "google-fonts";
pub const MATERIAL_TIER: &str = "material";
pub const IMAGES_TIER: &str = "post-images";

/// How a matched request is satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
  /// Serve the cached copy immediately and refresh it in the background;
  /// with no cached copy, wait for the network once.
  StaleWhileRevalidate { tier: String },
  /// Always try the network first and replace the durable mirror from the
  /// response body before returning it. Entity-collection endpoint only.
  NetworkFirstMirror,
}

/// Request matcher. All matchers apply to GET requests only; writes are
/// never served from cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
  /// Exact URL
  Exact(String),
  /// URL prefix
  Prefix(String),
  /// Whole origin, `scheme://host[:port]`
  Origin(String),
}

impl Matcher {
  fn matches(&self, request: &Request) -> bool {
    if !request.is_get() {
      return false;
    }
    match self {
      Matcher::Exact(url) => request.url == *url,
      Matcher::Prefix(prefix) => request.url.starts_with(prefix.as_str()),
      Matcher::Origin(origin) => request.origin().as_deref() == Some(origin.as_str()),
    }
  }
}

/// One policy rule.
#[derive(Debug, Clone)]
pub struct Rule {
  pub matcher: Matcher,
  pub strategy: Strategy,
}

impl Rule {
  fn swr(matcher: Matcher, tier: &str) -> Self {
    Self {
      matcher,
      strategy: Strategy::StaleWhileRevalidate {
        tier: tier.to_string(),
      },
    }
  }
}

/// Ordered, first-match-wins policy table.
#[derive(Debug, Clone)]
pub struct RouteTable {
  rules: Vec<Rule>,
}

impl RouteTable {
  pub fn new(rules: Vec<Rule>) -> Self {
    Self { rules }
  }

  /// The rule set the app ships with: third-party asset tiers under
  /// stale-while-revalidate and the collection endpoint under the
  /// mirror-updating network-first strategy.
  pub fn with_defaults(collection_url: &str) -> Self {
    Self::new(vec![
      Rule::swr(
        Matcher::Origin("https://fonts.googleapis.com".to_string()),
        FONTS_TIER,
      ),
      Rule::swr(
        Matcher::Origin("https://fonts.gstatic.com".to_string()),
        FONTS_TIER,
      ),
      Rule::swr(
        Matcher::Prefix("https://cdnjs.cloudflare.com/ajax/libs/material-design-lite/".to_string()),
        MATERIAL_TIER,
      ),
      Rule::swr(
        Matcher::Prefix("https://code.getmdl.io/".to_string()),
        MATERIAL_TIER,
      ),
      Rule::swr(
        Matcher::Origin("https://picsum.photos".to_string()),
        IMAGES_TIER,
      ),
      Rule {
        matcher: Matcher::Exact(collection_url.to_string()),
        strategy: Strategy::NetworkFirstMirror,
      },
    ])
  }

  /// First rule matching the request, if any.
  pub fn select(&self, request: &Request) -> Option<&Rule> {
    self.rules.iter().find(|rule| rule.matcher.matches(request))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table() -> RouteTable {
    RouteTable::with_defaults("http://localhost:3000/api/posts")
  }

  #[test]
  fn test_collection_endpoint_selects_mirror_strategy() {
    let t = table();
    let rule = t
      .select(&Request::get("http://localhost:3000/api/posts"))
      .unwrap();
    assert_eq!(rule.strategy, Strategy::NetworkFirstMirror);
  }

  #[test]
  fn test_font_origin_routes_to_fonts_tier() {
    let t = table();
    let rule = t
      .select(&Request::get("https://fonts.googleapis.com/css?family=Roboto:400,700"))
      .unwrap();
    assert_eq!(
      rule.strategy,
      Strategy::StaleWhileRevalidate {
        tier: FONTS_TIER.to_string()
      }
    );
  }

  #[test]
  fn test_unmatched_request_falls_through() {
    assert!(table().select(&Request::get("http://localhost:8080/index.html")).is_none());
  }

  #[test]
  fn test_writes_never_match() {
    let post = Request {
      method: "POST".to_string(),
      url: "http://localhost:3000/api/posts".to_string(),
    };
    assert!(table().select(&post).is_none());
  }

  #[test]
  fn test_first_match_wins() {
    let table = RouteTable::new(vec![
      Rule::swr(Matcher::Prefix("https://a.example/".to_string()), "first"),
      Rule::swr(Matcher::Origin("https://a.example".to_string()), "second"),
    ]);
    let rule = table.select(&Request::get("https://a.example/x")).unwrap();
    assert_eq!(
      rule.strategy,
      Strategy::StaleWhileRevalidate {
        tier: "first".to_string()
      }
    );
  }
}
