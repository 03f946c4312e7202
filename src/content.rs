/// Content provider: fetches the posts to type, with a deterministic
/// fallback set so the automation pipeline can run (and be demoed) without
/// network access.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PinpointError, PinpointResult};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    #[serde(rename = "userId", default)]
    pub user_id: u64,
    pub id: u64,
    pub title: String,
    pub body: String,
}

impl Post {
    /// The text typed into the editor for this post.
    pub fn document_text(&self) -> String {
        format!("Title: {}\n\n{}", self.title, self.body)
    }

    pub fn filename(&self) -> String {
        format!("post_{}.txt", self.id)
    }
}

/// Fetch the first `count` posts, substituting fallback data on any failure.
pub async fn fetch_posts(api_url: &str, count: usize) -> Vec<Post> {
    match try_fetch(api_url, count).await {
        Ok(posts) => {
            tracing::info!(count = posts.len(), url = %api_url, "posts fetched");
            posts
        }
        Err(e) => {
            tracing::warn!(error = %e, count, "content fetch failed, using fallback posts");
            fallback_posts(count)
        }
    }
}

async fn try_fetch(api_url: &str, count: usize) -> PinpointResult<Vec<Post>> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| PinpointError::Content(format!("http client: {e}")))?;

    let response = client
        .get(api_url)
        .query(&[("limit", count)])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(PinpointError::Content(format!(
            "content API returned {}",
            response.status()
        )));
    }

    let value: serde_json::Value = response.json().await?;
    let posts = extract_posts(value, count)?;
    if posts.is_empty() {
        return Err(PinpointError::Content("content API returned no posts".into()));
    }
    Ok(posts)
}

/// Some services wrap the list in `{"posts": [...]}`, others return it flat.
fn extract_posts(value: serde_json::Value, count: usize) -> PinpointResult<Vec<Post>> {
    let list = match value {
        serde_json::Value::Object(mut obj) => obj
            .remove("posts")
            .ok_or_else(|| PinpointError::Content("response object has no 'posts' field".into()))?,
        other => other,
    };
    let mut posts: Vec<Post> = serde_json::from_value(list)?;
    posts.truncate(count);
    Ok(posts)
}

/// Deterministic offline substitute for the content API.
pub fn fallback_posts(count: usize) -> Vec<Post> {
    (1..=count as u64)
        .map(|i| Post {
            user_id: 1,
            id: i,
            title: format!("Sample Post {i}"),
            body: format!(
                "This is the body of sample post {i}. \
                 The content service was unavailable so fallback data is used."
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_deterministic_and_sized() {
        let a = fallback_posts(10);
        let b = fallback_posts(10);
        assert_eq!(a.len(), 10);
        assert_eq!(a[0].id, 1);
        assert_eq!(a[9].id, 10);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.title, y.title);
            assert_eq!(x.body, y.body);
        }
    }

    #[test]
    fn document_text_leads_with_title() {
        let post = Post {
            user_id: 1,
            id: 5,
            title: "Hello World".into(),
            body: "Some body text".into(),
        };
        let text = post.document_text();
        assert!(text.starts_with("Title: Hello World"));
        assert!(text.contains("Some body text"));
    }

    #[test]
    fn filename_uses_post_id() {
        let mut post = fallback_posts(1).remove(0);
        post.id = 5;
        assert_eq!(post.filename(), "post_5.txt");
        post.id = 10;
        assert_eq!(post.filename(), "post_10.txt");
    }

    #[test]
    fn extracts_wrapped_post_list() {
        let value = serde_json::json!({
            "posts": [
                {"userId": 1, "id": 1, "title": "A", "body": "a"},
                {"userId": 1, "id": 2, "title": "B", "body": "b"},
                {"userId": 2, "id": 3, "title": "C", "body": "c"},
            ],
            "total": 3,
        });
        let posts = extract_posts(value, 2).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].title, "B");
    }

    #[test]
    fn extracts_flat_post_list() {
        let value = serde_json::json!([
            {"userId": 1, "id": 7, "title": "Flat", "body": "list"},
        ]);
        let posts = extract_posts(value, 10).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, 7);
    }

    #[test]
    fn object_without_posts_field_is_an_error() {
        let value = serde_json::json!({"items": []});
        assert!(extract_posts(value, 10).is_err());
    }
}
