//! Pipeline record repository: keyed upsert/read/query of records plus the
//! append-only processing error log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{
    ErrorStage, NewErrorRecord, PipelineRecord, ProcessingErrorRecord, Stage,
};
use super::{Database, DatabaseError};

/// Query filter parameters for record listing.
#[derive(Debug, Default, Clone)]
pub struct RecordFilter {
    pub stage: Option<Stage>,
    /// Matched case-insensitively.
    pub document_type: Option<String>,
    pub limit: Option<u64>,
}

/// Persistence used by the pipeline stages.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<PipelineRecord>, DatabaseError>;

    /// Inserts or merges the record and returns what was stored.
    async fn upsert(&self, record: PipelineRecord) -> Result<PipelineRecord, DatabaseError>;

    async fn query(&self, filter: RecordFilter) -> Result<Vec<PipelineRecord>, DatabaseError>;

    /// Moves an existing record to [`Stage::Error`]. Returns `false` if
    /// there is no record with that id.
    async fn mark_error(&self, id: &str) -> Result<bool, DatabaseError>;

    async fn append_error(&self, error: NewErrorRecord) -> Result<ProcessingErrorRecord, DatabaseError>;

    async fn errors_for(&self, document_id: &str) -> Result<Vec<ProcessingErrorRecord>, DatabaseError>;
}

/// [`RecordStore`] on SQLite. Queries run on the blocking thread pool.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Database,
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &std::path::Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Database) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| DatabaseError::Task(e.to_string()))?
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, id: &str) -> Result<Option<PipelineRecord>, DatabaseError> {
        let id = id.to_string();
        self.blocking(move |db| find_by_id(db, &id)).await
    }

    async fn upsert(&self, record: PipelineRecord) -> Result<PipelineRecord, DatabaseError> {
        self.blocking(move |db| upsert(db, record)).await
    }

    async fn query(&self, filter: RecordFilter) -> Result<Vec<PipelineRecord>, DatabaseError> {
        self.blocking(move |db| query(db, &filter)).await
    }

    async fn mark_error(&self, id: &str) -> Result<bool, DatabaseError> {
        let id = id.to_string();
        self.blocking(move |db| mark_error(db, &id)).await
    }

    async fn append_error(&self, error: NewErrorRecord) -> Result<ProcessingErrorRecord, DatabaseError> {
        self.blocking(move |db| append_error(db, error)).await
    }

    async fn errors_for(&self, document_id: &str) -> Result<Vec<ProcessingErrorRecord>, DatabaseError> {
        let document_id = document_id.to_string();
        self.blocking(move |db| errors_for(db, &document_id)).await
    }
}

/// Finds a record by its id.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<PipelineRecord>, DatabaseError> {
    db.with_conn(|conn| select_record(conn, id))
}

/// Inserts the record, or merges it onto the stored one inside a single
/// transaction. Returns the stored result.
pub fn upsert(db: &Database, record: PipelineRecord) -> Result<PipelineRecord, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let now = Utc::now();
        let mut merged = match select_record(&tx, &record.id)? {
            Some(stored) => record.merged_onto(&stored),
            None => PipelineRecord {
                created_at: now,
                ..record
            },
        };
        merged.updated_at = now;

        let classification = merged
            .classification
            .as_ref()
            .map(|c| to_json("classification", c))
            .transpose()?;
        let ocr = merged
            .ocr
            .as_ref()
            .map(|o| to_json("ocr", o))
            .transpose()?;
        let metadata = to_json("metadata", &merged.metadata)?;
        let document_type = merged
            .classification
            .as_ref()
            .map(|c| c.document_type.to_lowercase());

        tx.execute(
            "INSERT INTO pipeline_records (id, source_file_name, stage, document_type,
             classification, ocr, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET source_file_name=?2, stage=?3, document_type=?4,
             classification=?5, ocr=?6, metadata=?7, updated_at=?9",
            params![
                merged.id,
                merged.source_file_name,
                merged.stage.as_str(),
                document_type,
                classification,
                ocr,
                metadata,
                merged.created_at.to_rfc3339(),
                merged.updated_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(merged)
    })
}

/// Queries records with filters, oldest first.
pub fn query(db: &Database, filter: &RecordFilter) -> Result<Vec<PipelineRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(stage) = filter.stage {
            conditions.push(format!("stage = ?{}", param_values.len() + 1));
            param_values.push(Box::new(stage.as_str()));
        }
        if let Some(ref document_type) = filter.document_type {
            conditions.push(format!("document_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(document_type.to_lowercase()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let mut sql = format!(
            "SELECT * FROM pipeline_records{} ORDER BY created_at ASC, id ASC",
            where_clause
        );
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), RecordRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RecordRow::into_record).collect()
    })
}

/// Sets the stage of an existing record to `error`.
pub fn mark_error(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE pipeline_records SET stage = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, Stage::Error.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    })
}

/// Appends an entry to the error log.
pub fn append_error(db: &Database, error: NewErrorRecord) -> Result<ProcessingErrorRecord, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO processing_errors (document_id, error_message, error_type, stage, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                error.document_id,
                error.error_message,
                error.error_type,
                error.stage.as_str(),
                error.timestamp.to_rfc3339(),
            ],
        )?;

        Ok(ProcessingErrorRecord {
            id: conn.last_insert_rowid(),
            document_id: error.document_id,
            error_message: error.error_message,
            error_type: error.error_type,
            stage: error.stage,
            timestamp: error.timestamp,
        })
    })
}

/// Error entries for a document, in insertion order.
pub fn errors_for(db: &Database, document_id: &str) -> Result<Vec<ProcessingErrorRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, document_id, error_message, error_type, stage, timestamp
             FROM processing_errors WHERE document_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![document_id], |row| {
                Ok((
                    row.get::<_, i64>("id")?,
                    row.get::<_, String>("document_id")?,
                    row.get::<_, String>("error_message")?,
                    row.get::<_, String>("error_type")?,
                    row.get::<_, String>("stage")?,
                    row.get::<_, String>("timestamp")?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut errors = Vec::with_capacity(rows.len());
        for (id, document_id, error_message, error_type, stage, timestamp) in rows {
            let stage = ErrorStage::parse(&stage).ok_or(DatabaseError::InvalidColumn {
                column: "stage",
                value: stage.clone(),
            })?;
            errors.push(ProcessingErrorRecord {
                id,
                document_id,
                error_message,
                error_type,
                stage,
                timestamp: parse_timestamp("timestamp", &timestamp)?,
            });
        }
        Ok(errors)
    })
}

fn select_record(conn: &Connection, id: &str) -> Result<Option<PipelineRecord>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM pipeline_records WHERE id = ?1",
            params![id],
            RecordRow::from_row,
        )
        .optional()?;
    row.map(RecordRow::into_record).transpose()
}

/// A raw record row from the database.
struct RecordRow {
    id: String,
    source_file_name: String,
    stage: String,
    classification: Option<String>,
    ocr: Option<String>,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source_file_name: row.get("source_file_name")?,
            stage: row.get("stage")?,
            classification: row.get("classification")?,
            ocr: row.get("ocr")?,
            metadata: row.get("metadata")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_record(self) -> Result<PipelineRecord, DatabaseError> {
        Ok(PipelineRecord {
            stage: Stage::parse(&self.stage).ok_or_else(|| DatabaseError::InvalidColumn {
                column: "stage",
                value: self.stage.clone(),
            })?,
            classification: self
                .classification
                .as_deref()
                .map(|s| from_json("classification", s))
                .transpose()?,
            ocr: self.ocr.as_deref().map(|s| from_json("ocr", s)).transpose()?,
            metadata: from_json("metadata", &self.metadata)?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            id: self.id,
            source_file_name: self.source_file_name,
        })
    }
}

fn to_json<T: serde::Serialize>(column: &'static str, value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization { column, source: e })
}

fn from_json<T: serde::de::DeserializeOwned>(column: &'static str, value: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(value).map_err(|e| DatabaseError::Serialization { column, source: e })
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidColumn {
            column,
            value: value.to_string(),
        })
}
