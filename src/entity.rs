//! Feed post types shared by the store, sync, and API layers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque image reference attached to a post.
///
/// Empty at creation time (`{}` on the wire); the server fills in a url.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
}

/// A feed post.
///
/// Posts are never mutated in place once mirrored; a write either creates a
/// new post or is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
  /// Globally unique, client- or server-assigned
  pub id: String,
  pub title: String,
  pub location: String,
  #[serde(default)]
  pub image: ImageRef,
}

impl Post {
  /// Create a client-side post with a fresh UUID.
  ///
  /// Title and location are required; the image reference stays empty until
  /// the server assigns one.
  pub fn create(title: &str, location: &str) -> Result<Self> {
    let title = title.trim();
    let location = location.trim();
    if title.is_empty() || location.is_empty() {
      return Err(Error::Validation(
        "title and location are required".to_string(),
      ));
    }

    Ok(Self {
      id: Uuid::new_v4().to_string(),
      title: title.to_string(),
      location: location.to_string(),
      image: ImageRef::default(),
    })
  }
}
