//! SQLite-backed datastore.
//!
//! Single-writer SQLite via sqlx. Writes that double as linearization
//! points (join-token consumption) are single statements whose affected-row
//! count decides the outcome.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tessera_core::{selector, AttestedNode, JoinToken, RegistrationEntry, Selector};

use crate::datastore::{
    AttestedNodeUpdate, DataStore, DatastoreError, ListAttestedNodesRequest,
    ListAttestedNodesResponse,
};

pub struct SqliteDataStore {
    pool: SqlitePool,
}

impl SqliteDataStore {
    /// Wrap an existing pool, creating tables if they don't exist.
    pub async fn new(pool: SqlitePool) -> Result<Self, DatastoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attested_nodes (
                spiffe_id TEXT PRIMARY KEY,
                attestation_type TEXT NOT NULL,
                cert_serial_number TEXT NOT NULL,
                cert_not_after INTEGER NOT NULL,
                new_cert_serial_number TEXT NOT NULL,
                new_cert_not_after INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS node_selectors (
                spiffe_id TEXT NOT NULL,
                selector_type TEXT NOT NULL,
                selector_value TEXT NOT NULL,
                PRIMARY KEY (spiffe_id, selector_type, selector_value)
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS join_tokens (
                token TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS registration_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                spiffe_id TEXT NOT NULL,
                parent_id TEXT NOT NULL,
                selectors TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        Ok(Self { pool })
    }

    /// Open or create a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DatastoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatastoreError::Internal(format!("failed to create db directory: {e}"))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            // WAL mode for better concurrent read performance
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1) // SQLite performs best with single writer
            .connect_with(options)
            .await
            .map_err(db_err)?;

        Self::new(pool).await
    }

    /// An in-memory store for tests and ephemeral deployments.
    pub async fn in_memory() -> Result<Self, DatastoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        Self::new(pool).await
    }

    async fn fetch_node(&self, spiffe_id: &str) -> Result<Option<AttestedNode>, DatastoreError> {
        let row = sqlx::query(
            "SELECT spiffe_id, attestation_type, cert_serial_number, cert_not_after,
                    new_cert_serial_number, new_cert_not_after
             FROM attested_nodes WHERE spiffe_id = ?",
        )
        .bind(spiffe_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| node_from_row(&r)).transpose()
    }

    async fn selectors_for(&self, spiffe_id: &str) -> Result<Vec<Selector>, DatastoreError> {
        let rows = sqlx::query(
            "SELECT selector_type, selector_value FROM node_selectors
             WHERE spiffe_id = ? ORDER BY selector_type, selector_value",
        )
        .bind(spiffe_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|r| Selector::new(r.get::<String, _>("selector_type"), r.get::<String, _>("selector_value")))
            .collect())
    }
}

#[async_trait]
impl DataStore for SqliteDataStore {
    async fn count_attested_nodes(&self) -> Result<i32, DatastoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM attested_nodes")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("count") as i32)
    }

    async fn list_attested_nodes(
        &self,
        request: &ListAttestedNodesRequest,
    ) -> Result<ListAttestedNodesResponse, DatastoreError> {
        let rows = sqlx::query(
            "SELECT spiffe_id, attestation_type, cert_serial_number, cert_not_after,
                    new_cert_serial_number, new_cert_not_after
             FROM attested_nodes ORDER BY spiffe_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let selector_rows = sqlx::query(
            "SELECT spiffe_id, selector_type, selector_value FROM node_selectors
             ORDER BY spiffe_id, selector_type, selector_value",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut selectors: std::collections::HashMap<String, Vec<Selector>> =
            std::collections::HashMap::new();
        for row in selector_rows {
            selectors
                .entry(row.get("spiffe_id"))
                .or_default()
                .push(Selector::new(
                    row.get::<String, _>("selector_type"),
                    row.get::<String, _>("selector_value"),
                ));
        }

        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let node = node_from_row(&row)?;
            let node_selectors = selectors.remove(&node.spiffe_id).unwrap_or_default();

            if let Some(by_type) = &request.by_attestation_type {
                if node.attestation_type != *by_type {
                    continue;
                }
            }
            if let Some(by_banned) = request.by_banned {
                if node.is_banned() != by_banned {
                    continue;
                }
            }
            if let Some(by_match) = &request.by_selector_match {
                if !by_match.behavior.matches(&node_selectors, &by_match.selectors) {
                    continue;
                }
            }

            nodes.push((node, node_selectors));
        }

        // Offset-based pagination; the token is the count of rows consumed.
        let offset = match &request.page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| DatastoreError::Internal("could not parse page token".to_string()))?,
            None => 0,
        };
        if offset > 0 {
            nodes = nodes.split_off(offset.min(nodes.len()));
        }

        let mut next_page_token = None;
        if request.page_size > 0 && nodes.len() >= request.page_size as usize {
            nodes.truncate(request.page_size as usize);
            next_page_token = Some((offset + nodes.len()).to_string());
        }

        Ok(ListAttestedNodesResponse {
            nodes,
            next_page_token,
        })
    }

    async fn fetch_attested_node(
        &self,
        spiffe_id: &str,
    ) -> Result<Option<AttestedNode>, DatastoreError> {
        self.fetch_node(spiffe_id).await
    }

    async fn create_attested_node(
        &self,
        node: AttestedNode,
    ) -> Result<AttestedNode, DatastoreError> {
        sqlx::query(
            "INSERT INTO attested_nodes
             (spiffe_id, attestation_type, cert_serial_number, cert_not_after,
              new_cert_serial_number, new_cert_not_after)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&node.spiffe_id)
        .bind(&node.attestation_type)
        .bind(&node.cert_serial_number)
        .bind(node.cert_not_after)
        .bind(&node.new_cert_serial_number)
        .bind(node.new_cert_not_after)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(node)
    }

    async fn update_attested_node(
        &self,
        update: AttestedNodeUpdate,
    ) -> Result<AttestedNode, DatastoreError> {
        let mut node = self
            .fetch_node(&update.spiffe_id)
            .await?
            .ok_or(DatastoreError::NotFound)?;

        if let Some(serial) = update.cert_serial_number {
            node.cert_serial_number = serial;
        }
        if let Some(not_after) = update.cert_not_after {
            node.cert_not_after = not_after;
        }
        if let Some(serial) = update.new_cert_serial_number {
            node.new_cert_serial_number = serial;
        }
        if let Some(not_after) = update.new_cert_not_after {
            node.new_cert_not_after = not_after;
        }

        sqlx::query(
            "UPDATE attested_nodes SET
                attestation_type = ?2,
                cert_serial_number = ?3,
                cert_not_after = ?4,
                new_cert_serial_number = ?5,
                new_cert_not_after = ?6
             WHERE spiffe_id = ?1",
        )
        .bind(&node.spiffe_id)
        .bind(&node.attestation_type)
        .bind(&node.cert_serial_number)
        .bind(node.cert_not_after)
        .bind(&node.new_cert_serial_number)
        .bind(node.new_cert_not_after)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(node)
    }

    async fn delete_attested_node(
        &self,
        spiffe_id: &str,
    ) -> Result<AttestedNode, DatastoreError> {
        let node = self
            .fetch_node(spiffe_id)
            .await?
            .ok_or(DatastoreError::NotFound)?;

        sqlx::query("DELETE FROM attested_nodes WHERE spiffe_id = ?")
            .bind(spiffe_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM node_selectors WHERE spiffe_id = ?")
            .bind(spiffe_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(node)
    }

    async fn set_node_selectors(
        &self,
        spiffe_id: &str,
        selectors: Vec<Selector>,
    ) -> Result<(), DatastoreError> {
        let selectors = selector::dedupe(selectors);

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM node_selectors WHERE spiffe_id = ?")
            .bind(spiffe_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        for selector in &selectors {
            sqlx::query(
                "INSERT INTO node_selectors (spiffe_id, selector_type, selector_value)
                 VALUES (?, ?, ?)",
            )
            .bind(spiffe_id)
            .bind(&selector.r#type)
            .bind(&selector.value)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        Ok(())
    }

    async fn get_node_selectors(&self, spiffe_id: &str) -> Result<Vec<Selector>, DatastoreError> {
        self.selectors_for(spiffe_id).await
    }

    async fn create_join_token(&self, token: JoinToken) -> Result<(), DatastoreError> {
        sqlx::query("INSERT INTO join_tokens (token, expires_at) VALUES (?, ?)")
            .bind(&token.token)
            .bind(token.expires_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn fetch_join_token(&self, token: &str) -> Result<Option<JoinToken>, DatastoreError> {
        let row = sqlx::query("SELECT token, expires_at FROM join_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(|r| JoinToken {
            token: r.get("token"),
            expires_at: r.get("expires_at"),
        }))
    }

    async fn delete_join_token(&self, token: &str) -> Result<(), DatastoreError> {
        // Single atomic DELETE; the affected-row count decides which of two
        // racing consumers wins.
        let result = sqlx::query("DELETE FROM join_tokens WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(DatastoreError::NotFound);
        }
        Ok(())
    }

    async fn create_registration_entry(
        &self,
        entry: RegistrationEntry,
    ) -> Result<(), DatastoreError> {
        sqlx::query(
            "INSERT INTO registration_entries (spiffe_id, parent_id, selectors) VALUES (?, ?, ?)",
        )
        .bind(&entry.spiffe_id)
        .bind(&entry.parent_id)
        .bind(serde_json::to_string(&entry.selectors).unwrap())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_registration_entries(&self) -> Result<Vec<RegistrationEntry>, DatastoreError> {
        let rows = sqlx::query(
            "SELECT spiffe_id, parent_id, selectors FROM registration_entries ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let selectors_json: String = row.get("selectors");
                let selectors: Vec<Selector> = serde_json::from_str(&selectors_json)
                    .map_err(|e| DatastoreError::Internal(format!("invalid selectors JSON: {e}")))?;
                Ok(RegistrationEntry {
                    spiffe_id: row.get("spiffe_id"),
                    parent_id: row.get("parent_id"),
                    selectors,
                })
            })
            .collect()
    }
}

fn db_err(e: sqlx::Error) -> DatastoreError {
    DatastoreError::Internal(format!("database error: {e}"))
}

fn node_from_row(row: &SqliteRow) -> Result<AttestedNode, DatastoreError> {
    Ok(AttestedNode {
        spiffe_id: row.try_get("spiffe_id").map_err(db_err)?,
        attestation_type: row.try_get("attestation_type").map_err(db_err)?,
        cert_serial_number: row.try_get("cert_serial_number").map_err(db_err)?,
        cert_not_after: row.try_get("cert_not_after").map_err(db_err)?,
        new_cert_serial_number: row.try_get("new_cert_serial_number").map_err(db_err)?,
        new_cert_not_after: row.try_get("new_cert_not_after").map_err(db_err)?,
    })
}
