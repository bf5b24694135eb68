//! Remote feed API client.
//!
//! The server partitions batch submissions per item: 201 when every post was
//! created, 207 when only some were, 400 when all failed validation.

use serde::Deserialize;

use crate::entity::Post;
use crate::error::{Error, Result};

/// Body of a successful collection fetch.
#[derive(Debug, Deserialize)]
pub struct CollectionBody {
  pub posts: Vec<Post>,
}

/// Per-item rejection detail from a batch submission.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemFailure {
  pub index: usize,
  pub error: String,
  #[serde(default)]
  pub data: serde_json::Value,
}

/// Outcome of a batch submission.
#[derive(Debug)]
pub enum SubmitOutcome {
  /// Every item was created (HTTP 201)
  Created(Vec<Post>),
  /// Some items were created, some rejected (HTTP 207)
  Partial {
    created: Vec<Post>,
    failed: Vec<ItemFailure>,
  },
  /// Every item was rejected (HTTP 400)
  Rejected { failed: Vec<ItemFailure> },
}

#[derive(Debug, Deserialize)]
struct CreatedBody {
  posts: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct PartialBody {
  #[serde(default)]
  created: Vec<Post>,
  #[serde(default)]
  failed: Vec<ItemFailure>,
}

#[derive(Debug, Deserialize)]
struct RejectedBody {
  #[serde(default)]
  details: Vec<ItemFailure>,
}

/// Thin client over the collection write endpoint.
#[derive(Clone)]
pub struct FeedApi {
  client: reqwest::Client,
  collection_url: String,
}

impl FeedApi {
  pub fn new(collection_url: &str) -> Self {
    Self {
      client: reqwest::Client::new(),
      collection_url: collection_url.to_string(),
    }
  }

  /// Submit a batch of posts in one request.
  ///
  /// Transport errors surface as `Error::Transport`; an unexpected status
  /// (anything but 201/207/400) as `Error::SyncDelivery`.
  pub async fn submit_batch(&self, posts: &[Post]) -> Result<SubmitOutcome> {
    let response = self
      .client
      .post(&self.collection_url)
      .json(posts)
      .send()
      .await?;

    let status = response.status().as_u16();
    match status {
      201 => {
        let body: CreatedBody = response
          .json()
          .await
          .map_err(|e| Error::SyncDelivery(format!("invalid 201 body: {}", e)))?;
        Ok(SubmitOutcome::Created(body.posts))
      }
      207 => {
        let body: PartialBody = response
          .json()
          .await
          .map_err(|e| Error::SyncDelivery(format!("invalid 207 body: {}", e)))?;
        Ok(SubmitOutcome::Partial {
          created: body.created,
          failed: body.failed,
        })
      }
      400 => {
        let body: RejectedBody = response
          .json()
          .await
          .map_err(|e| Error::SyncDelivery(format!("invalid 400 body: {}", e)))?;
        Ok(SubmitOutcome::Rejected {
          failed: body.details,
        })
      }
      other => Err(Error::SyncDelivery(format!(
        "unexpected status {} from {}",
        other, self.collection_url
      ))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entity::ImageRef;

  fn post(id: &str) -> Post {
    Post {
      id: id.to_string(),
      title: "Boat".to_string(),
      location: "SF, CA".to_string(),
      image: ImageRef::default(),
    }
  }

  #[tokio::test]
  async fn test_submit_batch_created() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/api/posts")
      .with_status(201)
      .with_header("content-type", "application/json")
      .with_body(
        r#"{"message":"All posts created successfully","posts":[{"id":"a1","title":"Boat","location":"SF, CA","image":{"url":"https://picsum.photos/640/480"}}]}"#,
      )
      .create_async()
      .await;

    let api = FeedApi::new(&format!("{}/api/posts", server.url()));
    let outcome = api.submit_batch(&[post("a1")]).await.unwrap();

    match outcome {
      SubmitOutcome::Created(created) => assert_eq!(created[0].id, "a1"),
      other => panic!("expected Created, got {:?}", other),
    }
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_submit_batch_partial() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/api/posts")
      .with_status(207)
      .with_body(
        r#"{"message":"Some posts were created successfully","created":[{"id":"a1","title":"Boat","location":"SF, CA"}],"failed":[{"index":1,"error":"Title and location are required","data":{"id":"a2"}}]}"#,
      )
      .create_async()
      .await;

    let api = FeedApi::new(&format!("{}/api/posts", server.url()));
    let outcome = api.submit_batch(&[post("a1"), post("a2")]).await.unwrap();

    match outcome {
      SubmitOutcome::Partial { created, failed } => {
        assert_eq!(created.len(), 1);
        assert_eq!(failed[0].index, 1);
        assert_eq!(failed[0].error, "Title and location are required");
      }
      other => panic!("expected Partial, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_submit_batch_transport_error() {
    // Nothing listens here
    let api = FeedApi::new("http://127.0.0.1:1/api/posts");
    let err = api.submit_batch(&[post("a1")]).await.unwrap_err();
    assert!(err.is_transport());
  }

  #[tokio::test]
  async fn test_submit_batch_unexpected_status() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/api/posts")
      .with_status(500)
      .with_body("oops")
      .create_async()
      .await;

    let api = FeedApi::new(&format!("{}/api/posts", server.url()));
    let err = api.submit_batch(&[post("a1")]).await.unwrap_err();
    assert!(matches!(err, Error::SyncDelivery(_)));
  }
}
