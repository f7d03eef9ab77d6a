use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::Serialize;
use uuid::Uuid;

use crate::entities::{prelude::*, projects};

/// Record written once an artifact bundle has been fully published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    pub owner_id: String,
    pub display_name: String,
    pub artifact_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub display_name: String,
    pub artifact_key: String,
}

/// Append-only catalog of converted projects per owner.
#[async_trait]
pub trait ProjectCatalog: Send + Sync {
    /// Writes `record` unless `(owner_id, artifact_key)` is already present.
    /// Returns whether a new row was written.
    async fn append(&self, record: CatalogRecord) -> Result<bool>;

    async fn contains(&self, owner_id: &str, artifact_key: &str) -> Result<bool>;

    /// All entries of one owner, in no particular order.
    async fn list(&self, owner_id: &str) -> Result<Vec<CatalogEntry>>;
}

pub struct DatabaseCatalog {
    db: DatabaseConnection,
}

impl DatabaseCatalog {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn is_unique_violation(e: &sea_orm::DbErr) -> bool {
    let msg = e.to_string();
    msg.contains("23505") || msg.contains("2067") || msg.contains("UNIQUE") || msg.contains("duplicate")
}

#[async_trait]
impl ProjectCatalog for DatabaseCatalog {
    async fn append(&self, record: CatalogRecord) -> Result<bool> {
        if self.contains(&record.owner_id, &record.artifact_key).await? {
            return Ok(false);
        }

        let row = projects::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            owner_id: Set(record.owner_id),
            display_name: Set(record.display_name),
            artifact_key: Set(record.artifact_key),
            created_at: Set(Some(Utc::now())),
        };

        match row.insert(&self.db).await {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => {
                // Lost a race against an identical append
                tracing::warn!("Duplicate catalog record detected during insert; keeping existing row.");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, owner_id: &str, artifact_key: &str) -> Result<bool> {
        let existing = Projects::find()
            .filter(projects::Column::OwnerId.eq(owner_id))
            .filter(projects::Column::ArtifactKey.eq(artifact_key))
            .one(&self.db)
            .await?;
        Ok(existing.is_some())
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<CatalogEntry>> {
        let rows = Projects::find()
            .filter(projects::Column::OwnerId.eq(owner_id))
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| CatalogEntry {
                display_name: row.display_name,
                artifact_key: row.artifact_key,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::run_migrations;
    use sea_orm::Database;

    async fn catalog() -> DatabaseCatalog {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        run_migrations(&db).await.unwrap();
        DatabaseCatalog::new(db)
    }

    fn record(owner: &str, name: &str, key: &str) -> CatalogRecord {
        CatalogRecord {
            owner_id: owner.to_string(),
            display_name: name.to_string(),
            artifact_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_and_list_by_owner() {
        let catalog = catalog().await;
        assert!(catalog.append(record("u@x.com", "terrain.zip", "k1")).await.unwrap());
        assert!(catalog.append(record("v@x.com", "other.zip", "k2")).await.unwrap());

        let entries = catalog.list("u@x.com").await.unwrap();
        assert_eq!(
            entries,
            vec![CatalogEntry {
                display_name: "terrain.zip".to_string(),
                artifact_key: "k1".to_string(),
            }]
        );
        assert!(catalog.list("nobody@x.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_uniqueness_is_owner_and_key() {
        let catalog = catalog().await;
        assert!(catalog.append(record("u@x.com", "a.zip", "k1")).await.unwrap());
        // same key, same owner, different name: not a new record
        assert!(!catalog.append(record("u@x.com", "b.zip", "k1")).await.unwrap());
        // same name, different key: new record
        assert!(catalog.append(record("u@x.com", "a.zip", "k2")).await.unwrap());
        // same key, other owner: new record
        assert!(catalog.append(record("v@x.com", "a.zip", "k1")).await.unwrap());

        assert_eq!(catalog.list("u@x.com").await.unwrap().len(), 2);
        assert!(catalog.contains("v@x.com", "k1").await.unwrap());
        assert!(!catalog.contains("v@x.com", "k2").await.unwrap());
    }

    #[tokio::test]
    async fn test_unique_index_backs_the_check() {
        let catalog = catalog().await;
        catalog.append(record("u@x.com", "a.zip", "k1")).await.unwrap();

        let dup = projects::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            owner_id: Set("u@x.com".to_string()),
            display_name: Set("again.zip".to_string()),
            artifact_key: Set("k1".to_string()),
            created_at: Set(None),
        };
        let err = dup.insert(&catalog.db).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
