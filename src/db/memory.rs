use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::TokenStore;
use crate::models::{AccessTokenRecord, NewAccessToken};

/// Token records held in process memory, keyed by jti.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    records: Arc<RwLock<HashMap<String, AccessTokenRecord>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Move a record's expiry, e.g. to simulate the clock passing it.
    pub async fn set_expires_at(&self, token_jti: &str, expires_at: DateTime<Utc>) -> bool {
        let mut records = self.records.write().await;
        match records.get_mut(token_jti) {
            Some(record) => {
                record.expires_at = expires_at;
                record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn create(&self, token: NewAccessToken) -> Result<AccessTokenRecord> {
        token.validate()?;

        let mut records = self.records.write().await;
        if records.contains_key(&token.token_jti) {
            anyhow::bail!("access token with jti {} already exists", token.token_jti);
        }

        let now = Utc::now();
        let record = AccessTokenRecord {
            id: Uuid::new_v4(),
            token_jti: token.token_jti,
            csrf: token.csrf,
            user_id: token.user_id,
            expires_at: token.expires_at,
            is_revoked: false,
            created_at: now,
            updated_at: now,
        };
        records.insert(record.token_jti.clone(), record.clone());
        Ok(record)
    }

    async fn read_by_token(&self, token_jti: &str) -> Result<Option<AccessTokenRecord>> {
        Ok(self.records.read().await.get(token_jti).cloned())
    }

    async fn revoke(&self, token_jti: &str) -> Result<u64> {
        let mut records = self.records.write().await;
        match records.get_mut(token_jti) {
            Some(record) if !record.is_revoked => {
                record.is_revoked = true;
                record.updated_at = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        let mut records = self.records.write().await;
        let now = Utc::now();
        let mut count = 0;
        for record in records.values_mut() {
            if record.user_id == user_id && !record.is_revoked {
                record.is_revoked = true;
                record.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn destroy(&self, token_jti: &str) -> Result<u64> {
        Ok(self.records.write().await.remove(token_jti).map_or(0, |_| 1))
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let initial = records.len();
        records.retain(|_, record| record.expires_at >= before);
        Ok((initial - records.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
