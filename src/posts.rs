use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::models::Post;
use crate::slug::{generate_slug, generate_unique_slug};

// In-process post storage backing the blog pages and the admin API
#[derive(Default)]
pub struct PostStore {
    inner: RwLock<PostTable>,
}

#[derive(Default)]
struct PostTable {
    posts: BTreeMap<i64, Post>,
    last_id: i64,
}

impl PostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, title: &str, content: &str, created_by_id: &str) -> Post {
        let mut table = self.inner.write().await;

        let base = match generate_slug(title) {
            slug if slug.is_empty() => "post".to_string(),
            slug => slug,
        };
        let existing: Vec<&str> = table.posts.values().map(|p| p.slug.as_str()).collect();
        let slug = generate_unique_slug(&base, &existing);

        table.last_id += 1;
        let post = Post {
            id: table.last_id,
            title: title.to_string(),
            slug,
            content: content.to_string(),
            created_by_id: created_by_id.to_string(),
            created_at: Utc::now(),
            updated_at: None,
        };
        table.posts.insert(post.id, post.clone());
        post
    }

    pub async fn get(&self, id: i64) -> Option<Post> {
        self.inner.read().await.posts.get(&id).cloned()
    }

    // Newest first
    pub async fn list(&self) -> Vec<Post> {
        self.inner.read().await.posts.values().rev().cloned().collect()
    }

    pub async fn delete(&self, id: i64) -> Option<Post> {
        self.inner.write().await.posts.remove(&id)
    }
}
