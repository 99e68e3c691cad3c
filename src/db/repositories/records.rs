//! Persistence interface: "save record", "load all records of a kind",
//! "delete record" and "compact", with typed access layered on top.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use serde::{de::DeserializeOwned, Serialize};

use crate::db::{
    helpers::{decode_body, encode_body, timestamp},
    Database,
};

/// A persisted entity, stored as a JSON body keyed by `(KIND, record_id)`.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;

    fn record_id(&self) -> String;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save_raw(&self, kind: &str, id: &str, body: String) -> Result<()>;

    async fn query_all_raw(&self, kind: &str) -> Result<Vec<String>>;

    async fn delete_raw(&self, kind: &str, id: &str) -> Result<()>;

    async fn compact(&self) -> Result<()>;
}

pub async fn save_record<S, T>(store: &S, record: &T) -> Result<()>
where
    S: RecordStore + ?Sized,
    T: Record,
{
    let body = encode_body(record, T::KIND)?;
    store.save_raw(T::KIND, &record.record_id(), body).await
}

pub async fn query_all<S, T>(store: &S) -> Result<Vec<T>>
where
    S: RecordStore + ?Sized,
    T: Record,
{
    store
        .query_all_raw(T::KIND)
        .await?
        .iter()
        .map(|body| decode_body(body, T::KIND))
        .collect()
}

pub async fn delete_record<S, T>(store: &S, record: &T) -> Result<()>
where
    S: RecordStore + ?Sized,
    T: Record,
{
    store.delete_raw(T::KIND, &record.record_id()).await
}

#[async_trait]
impl RecordStore for Database {
    async fn save_raw(&self, kind: &str, id: &str, body: String) -> Result<()> {
        let kind = kind.to_string();
        let id = id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO records (kind, id, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(kind, id) DO UPDATE SET
                     body = excluded.body,
                     updated_at = excluded.updated_at",
                params![kind, id, body, timestamp(Utc::now())],
            )
            .with_context(|| format!("failed to save {kind} record {id}"))?;
            Ok(())
        })
        .await
    }

    async fn query_all_raw(&self, kind: &str) -> Result<Vec<String>> {
        let kind = kind.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM records
                 WHERE kind = ?1
                 ORDER BY updated_at ASC, id ASC",
            )?;

            let mut rows = stmt.query(params![kind])?;
            let mut bodies = Vec::new();
            while let Some(row) = rows.next()? {
                bodies.push(row.get::<_, String>(0)?);
            }
            Ok(bodies)
        })
        .await
    }

    async fn delete_raw(&self, kind: &str, id: &str) -> Result<()> {
        let kind = kind.to_string();
        let id = id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM records WHERE kind = ?1 AND id = ?2",
                params![kind, id],
            )
            .with_context(|| format!("failed to delete {kind} record {id}"))?;
            Ok(())
        })
        .await
    }

    async fn compact(&self) -> Result<()> {
        self.execute(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
                .context("failed to checkpoint WAL")?;
            conn.execute_batch("VACUUM")
                .context("failed to vacuum database")?;
            Ok(())
        })
        .await
    }
}
