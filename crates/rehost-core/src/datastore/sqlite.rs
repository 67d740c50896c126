//! SQLite-backed datastore over a WordPress-style schema.

use super::{AttachmentRow, ContentRow, Datastore, MetadataRow, RecordFilter};
use crate::config::DatastoreConfig;
use crate::error::{RehostError, Result};
use crate::taxonomy::TaxonomyRow;
use crate::types::{AssetRole, BatchUpdate, RecordId, RecordSummary, TaxonomyId};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Datastore reading and rewriting a `{prefix}posts` style database.
///
/// The connection is long-lived; [`Datastore::ensure_connected`] re-validates
/// it and reopens the file once if the probe fails.
pub struct SqliteDatastore {
    path: PathBuf,
    conn: Connection,
    prefix: String,
    attachment_mime_prefix: String,
    metadata_key: String,
}

impl SqliteDatastore {
    /// Open the database described by `config`.
    pub fn open(config: &DatastoreConfig) -> Result<Self> {
        let conn = open_connection(&config.path)?;
        info!("Datastore opened at {}", config.path.display());

        Ok(Self {
            path: config.path.clone(),
            conn,
            prefix: config.table_prefix.clone(),
            attachment_mime_prefix: config.attachment_mime_prefix.clone(),
            metadata_key: config.metadata_key.clone(),
        })
    }

    /// Create the tables this datastore reads if they do not exist yet.
    pub fn init_schema(&self) -> Result<()> {
        let p = &self.prefix;
        self.conn
            .execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {p}posts (
                    ID INTEGER PRIMARY KEY,
                    post_name TEXT NOT NULL DEFAULT '',
                    post_type TEXT NOT NULL DEFAULT 'post',
                    post_status TEXT NOT NULL DEFAULT 'publish',
                    post_parent INTEGER NOT NULL DEFAULT 0,
                    post_mime_type TEXT NOT NULL DEFAULT '',
                    post_content TEXT NOT NULL DEFAULT '',
                    guid TEXT NOT NULL DEFAULT ''
                );

                CREATE INDEX IF NOT EXISTS idx_{p}posts_parent
                    ON {p}posts(post_parent, post_type);

                CREATE TABLE IF NOT EXISTS {p}postmeta (
                    meta_id INTEGER PRIMARY KEY,
                    post_id INTEGER NOT NULL DEFAULT 0,
                    meta_key TEXT,
                    meta_value TEXT
                );

                CREATE TABLE IF NOT EXISTS {p}terms (
                    term_id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL DEFAULT '',
                    slug TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS {p}term_taxonomy (
                    term_taxonomy_id INTEGER PRIMARY KEY,
                    term_id INTEGER NOT NULL DEFAULT 0,
                    taxonomy TEXT NOT NULL DEFAULT '',
                    parent INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS {p}term_relationships (
                    object_id INTEGER NOT NULL,
                    term_taxonomy_id INTEGER NOT NULL,
                    term_order INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (object_id, term_taxonomy_id)
                );
                "#
            ))
            .map_err(|e| RehostError::Database {
                message: format!("Failed to initialize schema: {}", e),
                source: Some(e),
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Table, value column and id column rewritten for a role.
    fn write_target(&self, role: AssetRole) -> (String, &'static str, &'static str) {
        match role {
            AssetRole::Attachment => (self.table("posts"), "guid", "ID"),
            AssetRole::Content => (self.table("posts"), "post_content", "ID"),
            AssetRole::Metadata => (self.table("postmeta"), "meta_value", "meta_id"),
        }
    }

    fn query_rows<T>(
        &self,
        sql: &str,
        params: Vec<Value>,
        map: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), map)?
            .collect::<rusqlite::Result<Vec<T>>>()?;
        Ok(rows)
    }
}

impl SqliteDatastore {
    /// The connection is usable when the records table answers a query.
    fn probe(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {})", self.table("posts")),
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|_| ())
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    Connection::open(path).map_err(|e| RehostError::Database {
        message: format!("Failed to open datastore {}: {}", path.display(), e),
        source: Some(e),
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn id_values(ids: &[RecordId]) -> impl Iterator<Item = Value> + '_ {
    ids.iter().map(|id| Value::Integer(*id))
}

impl Datastore for SqliteDatastore {
    fn ensure_connected(&mut self) -> Result<()> {
        if self.probe(&self.conn).is_ok() {
            return Ok(());
        }

        warn!("Datastore connection lost, reconnecting to {}", self.path.display());
        let conn = open_connection(&self.path).map_err(|e| RehostError::DatastoreUnavailable {
            message: e.to_string(),
        })?;
        self.probe(&conn).map_err(|e| RehostError::DatastoreUnavailable {
            message: format!("Reconnect to {} failed: {}", self.path.display(), e),
        })?;
        self.conn = conn;
        info!("Datastore reconnected");
        Ok(())
    }

    fn list_record_ids(&mut self, filter: &RecordFilter) -> Result<Vec<RecordId>> {
        if filter.types.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT ID FROM {} WHERE post_type IN ({})",
            self.table("posts"),
            placeholders(filter.types.len())
        );
        let mut params: Vec<Value> = filter.types.iter().cloned().map(Value::Text).collect();
        if let Some(status) = &filter.status {
            sql.push_str(" AND post_status = ?");
            params.push(Value::Text(status.clone()));
        }
        sql.push_str(" ORDER BY ID");

        self.query_rows(&sql, params, |row| row.get(0))
    }

    fn list_records(&mut self, ids: &[RecordId]) -> Result<Vec<RecordSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT ID, post_name FROM {} WHERE ID IN ({}) ORDER BY ID",
            self.table("posts"),
            placeholders(ids.len())
        );
        self.query_rows(&sql, id_values(ids).collect(), |row| {
            Ok(RecordSummary {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })
    }

    fn list_taxonomy_nodes(&mut self) -> Result<Vec<TaxonomyRow>> {
        let sql = format!(
            "SELECT t.term_id, tt.term_taxonomy_id, tt.parent, t.name, t.slug, tt.taxonomy
             FROM {} AS t
             JOIN {} AS tt ON tt.term_id = t.term_id
             ORDER BY tt.term_taxonomy_id",
            self.table("terms"),
            self.table("term_taxonomy")
        );
        self.query_rows(&sql, Vec::new(), |row| {
            Ok(TaxonomyRow {
                term_id: row.get(0)?,
                taxonomy_id: row.get(1)?,
                parent_term_id: row.get(2)?,
                name: row.get(3)?,
                slug: row.get(4)?,
                kind: row.get(5)?,
            })
        })
    }

    fn list_record_terms(&mut self, ids: &[RecordId]) -> Result<Vec<(RecordId, TaxonomyId)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT object_id, term_taxonomy_id FROM {}
             WHERE object_id IN ({})
             ORDER BY object_id, term_order, term_taxonomy_id",
            self.table("term_relationships"),
            placeholders(ids.len())
        );
        self.query_rows(&sql, id_values(ids).collect(), |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
    }

    fn list_attachments(&mut self, ids: &[RecordId]) -> Result<Vec<AttachmentRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT post_parent, ID, guid FROM {}
             WHERE post_type = 'attachment'
               AND post_mime_type LIKE ?
               AND post_parent IN ({})
             ORDER BY post_parent, ID",
            self.table("posts"),
            placeholders(ids.len())
        );
        let mut params = vec![Value::Text(format!("{}%", self.attachment_mime_prefix))];
        params.extend(id_values(ids));

        self.query_rows(&sql, params, |row| {
            Ok(AttachmentRow {
                record_id: row.get(0)?,
                asset_id: row.get(1)?,
                url: row.get(2)?,
            })
        })
    }

    fn list_content_bodies(&mut self, ids: &[RecordId]) -> Result<Vec<ContentRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT ID, post_content FROM {}
             WHERE ID IN ({}) AND post_content LIKE '%<img%'
             ORDER BY ID",
            self.table("posts"),
            placeholders(ids.len())
        );
        self.query_rows(&sql, id_values(ids).collect(), |row| {
            Ok(ContentRow {
                record_id: row.get(0)?,
                body: row.get(1)?,
            })
        })
    }

    fn list_metadata(&mut self, ids: &[RecordId]) -> Result<Vec<MetadataRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT post_id, meta_id, meta_value FROM {}
             WHERE meta_key = ? AND meta_value IS NOT NULL AND post_id IN ({})
             ORDER BY post_id, meta_id",
            self.table("postmeta"),
            placeholders(ids.len())
        );
        let mut params = vec![Value::Text(self.metadata_key.clone())];
        params.extend(id_values(ids));

        self.query_rows(&sql, params, |row| {
            Ok(MetadataRow {
                record_id: row.get(0)?,
                meta_id: row.get(1)?,
                blob: row.get(2)?,
            })
        })
    }

    fn apply_batches(&mut self, batches: &[BatchUpdate]) -> Result<()> {
        let targets: Vec<_> = batches
            .iter()
            .map(|batch| (self.write_target(batch.role), batch))
            .collect();

        let tx = self.conn.transaction()?;
        for ((table, set_column, id_column), batch) in targets {
            if batch.is_empty() {
                continue;
            }
            let sql = format!("UPDATE {} SET {} = ?1 WHERE {} = ?2", table, set_column, id_column);
            let mut stmt = tx.prepare(&sql)?;
            for (value, id) in &batch.rows {
                stmt.execute(rusqlite::params![value, id])?;
            }
            debug!("Updated {} rows of {}.{}", batch.rows.len(), table, set_column);
        }
        tx.commit()?;
        Ok(())
    }
}
