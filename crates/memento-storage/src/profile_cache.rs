//! Fallback cache holding the latest preference profile per scope.
//!
//! Readers always see either the previous or the new profile in full:
//! `replace` swaps the single row inside a transaction.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::info;

use memento_core::error::MementoError;
use memento_core::types::PreferenceProfile;

use crate::db::{storage_err, Database};

#[async_trait]
pub trait ProfileCache: Send + Sync {
    /// The current profile for `scope`, if one was ever published.
    async fn current(&self, scope: &str) -> Result<Option<PreferenceProfile>, MementoError>;

    /// The stored serialized body, byte for byte.
    async fn current_raw(&self, scope: &str) -> Result<Option<String>, MementoError>;

    /// Atomically replace the profile for `profile.scope`.
    async fn replace(&self, profile: &PreferenceProfile) -> Result<(), MementoError>;
}

/// SQLite implementation over the `profile_cache` table.
pub struct SqliteProfileCache {
    db: Arc<Database>,
}

impl SqliteProfileCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProfileCache for SqliteProfileCache {
    async fn current(&self, scope: &str) -> Result<Option<PreferenceProfile>, MementoError> {
        match self.current_raw(scope).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn current_raw(&self, scope: &str) -> Result<Option<String>, MementoError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT body FROM profile_cache WHERE scope = ?1",
                params![scope],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("Failed to read profile cache"))
        })
    }

    async fn replace(&self, profile: &PreferenceProfile) -> Result<(), MementoError> {
        let body = serde_json::to_string(profile)?;
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(storage_err("Failed to begin profile replace"))?;
            tx.execute(
                "INSERT INTO profile_cache (scope, profile_version, built_at, body)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(scope) DO UPDATE SET
                    profile_version = excluded.profile_version,
                    built_at = excluded.built_at,
                    body = excluded.body",
                params![
                    profile.scope,
                    profile.profile_version as i64,
                    profile.built_at.timestamp_millis(),
                    body,
                ],
            )
            .map_err(storage_err("Failed to write profile"))?;
            tx.commit()
                .map_err(storage_err("Failed to commit profile replace"))?;
            Ok(())
        })?;

        info!(
            scope = %profile.scope,
            version = profile.profile_version,
            "Preference profile replaced"
        );
        Ok(())
    }
}

/// Result of a profile read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProfileLookup {
    Current { profile: PreferenceProfile },
    NoProfileYet,
}

/// Read boundary used by prompt construction and the HTTP surface.
#[derive(Clone)]
pub struct ProfileReader {
    cache: Arc<dyn ProfileCache>,
}

impl ProfileReader {
    pub fn new(cache: Arc<dyn ProfileCache>) -> Self {
        Self { cache }
    }

    pub async fn read(&self, scope: &str) -> Result<ProfileLookup, MementoError> {
        Ok(match self.cache.current(scope).await? {
            Some(profile) => ProfileLookup::Current { profile },
            None => ProfileLookup::NoProfileYet,
        })
    }
}
