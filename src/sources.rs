//! External data sources consumed by the widget pipeline
//!
//! The social graph, content history, identity lookup and push-token
//! registration live outside this crate. Each is a trait passed in at
//! construction. [`FixtureSources`] serves all of them from one JSON document
//! for local runs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{SourceError, SourceResult};
use crate::widget::{ContentUpdate, SenderInfo};

/// Friend list lookup
#[async_trait]
pub trait SocialGraph: Send + Sync {
    async fn get_connection_ids(&self, user_id: &str) -> SourceResult<Vec<String>>;
}

/// Last photo lookup
#[async_trait]
pub trait ContentHistory: Send + Sync {
    /// Most recent update sent to `user_id` by any of `friend_ids`;
    /// `Ok(None)` when nothing was ever received
    async fn get_last_photo_from_senders(
        &self,
        user_id: &str,
        friend_ids: &[String],
    ) -> SourceResult<Option<ContentUpdate>>;
}

/// Sender identity lookup
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn get_user(&self, sender_id: &str) -> SourceResult<SenderInfo>;
}

/// Push token registration endpoint
#[async_trait]
pub trait TokenRegistrar: Send + Sync {
    async fn register_token(&self, user_id: &str, token: &str) -> SourceResult<()>;
}

/// Fixture document layout
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub connections: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub photos: Vec<ContentUpdate>,
    #[serde(default)]
    pub users: HashMap<String, SenderInfo>,
}

/// All sources backed by an in-memory [`Fixture`]
#[derive(Debug, Default)]
pub struct FixtureSources {
    fixture: Fixture,
    tokens: Mutex<HashMap<String, String>>,
}

impl FixtureSources {
    pub fn new(fixture: Fixture) -> Self {
        Self {
            fixture,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Load a fixture JSON file
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read sources file: {}", path.display()))?;
        let fixture: Fixture =
            serde_json::from_str(&content).context("Failed to parse sources file")?;

        info!(
            users = fixture.users.len(),
            photos = fixture.photos.len(),
            "Fixture sources loaded"
        );
        Ok(Self::new(fixture))
    }

    /// Token last registered for `user_id`
    pub fn registered_token(&self, user_id: &str) -> Option<String> {
        self.tokens
            .lock()
            .ok()
            .and_then(|tokens| tokens.get(user_id).cloned())
    }
}

#[async_trait]
impl SocialGraph for FixtureSources {
    async fn get_connection_ids(&self, user_id: &str) -> SourceResult<Vec<String>> {
        Ok(self
            .fixture
            .connections
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ContentHistory for FixtureSources {
    async fn get_last_photo_from_senders(
        &self,
        _user_id: &str,
        friend_ids: &[String],
    ) -> SourceResult<Option<ContentUpdate>> {
        let latest = self
            .fixture
            .photos
            .iter()
            .filter(|photo| friend_ids.contains(&photo.sender_id))
            .max_by_key(|photo| photo.date)
            .cloned();
        debug!(found = latest.is_some(), senders = friend_ids.len(), "Last photo lookup");
        Ok(latest)
    }
}

#[async_trait]
impl IdentitySource for FixtureSources {
    async fn get_user(&self, sender_id: &str) -> SourceResult<SenderInfo> {
        self.fixture
            .users
            .get(sender_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("user {}", sender_id)))
    }
}

#[async_trait]
impl TokenRegistrar for FixtureSources {
    async fn register_token(&self, user_id: &str, token: &str) -> SourceResult<()> {
        self.tokens
            .lock()
            .map_err(|e| SourceError::Network(e.to_string()))?
            .insert(user_id.to_string(), token.to_string());
        info!(user_id = %user_id, "Push token registered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn fixture() -> FixtureSources {
        let now = Utc::now();
        let mut older = ContentUpdate::new("u1", "p1", "L1");
        older.date = now - Duration::hours(2);
        let mut newer = ContentUpdate::new("u2", "p2", "L2");
        newer.date = now;
        let mut stranger = ContentUpdate::new("u9", "p9", "L9");
        stranger.date = now + Duration::hours(1);

        FixtureSources::new(Fixture {
            connections: HashMap::from([(
                "me".to_string(),
                vec!["u1".to_string(), "u2".to_string()],
            )]),
            photos: vec![older, newer, stranger],
            users: HashMap::from([("u1".to_string(), SenderInfo::new("P", "Ann"))]),
        })
    }

    #[tokio::test]
    async fn test_last_photo_only_from_friends() {
        let sources = fixture();
        let friends = sources.get_connection_ids("me").await.unwrap();
        let last = sources
            .get_last_photo_from_senders("me", &friends)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.photo_id, "p2");
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let sources = fixture();
        assert!(sources.get_user("u1").await.is_ok());
        assert!(matches!(
            sources.get_user("nobody").await,
            Err(SourceError::NotFound(_))
        ));
        assert!(sources.get_connection_ids("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_registration() {
        let sources = fixture();
        sources.register_token("me", "tok-1").await.unwrap();
        assert_eq!(sources.registered_token("me").as_deref(), Some("tok-1"));
    }
}
