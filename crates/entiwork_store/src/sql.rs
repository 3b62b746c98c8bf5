//! Entity store over an SQLite table.

use entiwork_codec::{JsonCodec, RecordCodec, StateRecord};
use entiwork_core::{
    EntityReference, EntityState, EntityStatus, EntityStore, Module, StateCommitter, StateIter,
    StoreError, StoreId, StoreResult, StoreUnitOfWorkInfo,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS entity_states (
    identity TEXT PRIMARY KEY NOT NULL,
    entity_type TEXT NOT NULL,
    version INTEGER NOT NULL,
    application_version TEXT NOT NULL,
    modified INTEGER NOT NULL,
    state BLOB NOT NULL
)";

fn sql_error(err: rusqlite::Error) -> StoreError {
    StoreError::backend(format!("sqlite: {err}"))
}

/// An entity store keeping one row per entity in an SQLite table.
///
/// The row carries the encoded record next to an integer row version.
/// Every write bumps the row version, and its decimal form is the
/// entity's version token. Commits run in one SQL transaction whose
/// updates and deletes are conditional on the row version read at
/// `apply_changes`, so a row changed by another writer in between makes
/// the whole commit roll back with `Conflict`.
///
/// # Example
///
/// ```rust
/// use entiwork_store::SqlEntityStore;
///
/// let store = SqlEntityStore::open_in_memory().unwrap();
/// assert_eq!(store.count().unwrap(), 0);
/// ```
pub struct SqlEntityStore {
    id: StoreId,
    inner: Arc<SqlInner>,
}

struct SqlInner {
    conn: Mutex<Connection>,
    codec: Box<dyn RecordCodec>,
}

impl SqlEntityStore {
    /// Opens or creates the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the table
    /// cannot be created.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(sql_error)?;
        Self::with_connection(conn, JsonCodec)
    }

    /// Creates a store over a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be created.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(sql_error)?;
        Self::with_connection(conn, JsonCodec)
    }

    /// Creates a store over an open connection, encoding records with
    /// `codec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be created.
    pub fn with_connection(
        conn: Connection,
        codec: impl RecordCodec + 'static,
    ) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA).map_err(sql_error)?;
        let id = StoreId::next();
        debug!(store = %id, codec = codec.name(), "sql store opened");
        Ok(Self {
            id,
            inner: Arc::new(SqlInner {
                conn: Mutex::new(conn),
                codec: Box::new(codec),
            }),
        })
    }

    /// Number of stored rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be queried.
    pub fn count(&self) -> StoreResult<usize> {
        let count: i64 = self
            .inner
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM entity_states", [], |row| row.get(0))
            .map_err(sql_error)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Row version of `reference`, if a row exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be queried.
    pub fn row_version(&self, reference: &EntityReference) -> StoreResult<Option<i64>> {
        row_version(&self.inner.conn.lock(), reference)
    }

    /// Decodes the stored record of `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read or decoded.
    pub fn record(&self, reference: &EntityReference) -> StoreResult<Option<StateRecord>> {
        let row = self.inner.row(reference)?;
        row.map(|(version, bytes)| self.inner.decode(version, &bytes)).transpose()
    }
}

impl fmt::Debug for SqlEntityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlEntityStore")
            .field("id", &self.id)
            .field("codec", &self.inner.codec.name())
            .finish_non_exhaustive()
    }
}

fn row_version(conn: &Connection, reference: &EntityReference) -> StoreResult<Option<i64>> {
    conn.query_row(
        "SELECT version FROM entity_states WHERE identity = ?1",
        params![reference.as_str()],
        |row| row.get(0),
    )
    .optional()
    .map_err(sql_error)
}

impl SqlInner {
    fn row(&self, reference: &EntityReference) -> StoreResult<Option<(i64, Vec<u8>)>> {
        self.conn
            .lock()
            .query_row(
                "SELECT version, state FROM entity_states WHERE identity = ?1",
                params![reference.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_error)
    }

    /// The row version is authoritative over the token inside the blob.
    fn decode(&self, version: i64, bytes: &[u8]) -> StoreResult<StateRecord> {
        let mut record = self.codec.decode(bytes)?;
        record.version = version.to_string();
        Ok(record)
    }
}

/// A prepared row write.
enum RowChange {
    Insert {
        reference: EntityReference,
        record: StateRecord,
        bytes: Vec<u8>,
    },
    Update {
        reference: EntityReference,
        expected: i64,
        record: StateRecord,
        bytes: Vec<u8>,
    },
    Delete {
        reference: EntityReference,
        expected: i64,
    },
}

/// Parses a version token; tokens of other stores never match a row.
fn parse_version(state: &EntityState) -> Option<i64> {
    state.version().as_str().parse().ok()
}

impl EntityStore for SqlEntityStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn entity_state_of(
        &self,
        _uow: &StoreUnitOfWorkInfo,
        module: &Module,
        reference: &EntityReference,
    ) -> StoreResult<EntityState> {
        let (version, bytes) = self.inner.row(reference)?.ok_or_else(|| StoreError::NotFound {
            reference: reference.clone(),
        })?;
        let record = self.inner.decode(version, &bytes)?;
        let descriptor = module
            .descriptor(&record.entity_type)
            .ok_or_else(|| StoreError::UnknownType {
                type_name: record.entity_type.clone(),
                module: module.name().to_string(),
            })?;
        let mut state =
            EntityState::from_record(&record, Arc::clone(descriptor), EntityStatus::Loaded);
        if record.application_version != module.application_version() {
            state.mark_updated();
        }
        Ok(state)
    }

    fn apply_changes(
        &self,
        uow: &StoreUnitOfWorkInfo,
        states: Vec<EntityState>,
    ) -> StoreResult<Box<dyn StateCommitter>> {
        let mut conflicts = Vec::new();
        let mut changes = Vec::with_capacity(states.len());
        {
            let conn = self.inner.conn.lock();
            for state in &states {
                let reference = state.reference().clone();
                let stored = row_version(&conn, &reference)?;
                if state.status() == EntityStatus::New {
                    if stored.is_some() {
                        return Err(StoreError::AlreadyExists { reference });
                    }
                    let record = state
                        .to_record(uow.application_version())
                        .with_version("1", uow.current_time());
                    let bytes = self.inner.codec.encode(&record)?;
                    changes.push(RowChange::Insert {
                        reference,
                        record,
                        bytes,
                    });
                    continue;
                }
                let expected = match (stored, parse_version(state)) {
                    (Some(stored), Some(read)) if stored == read => read,
                    _ => {
                        conflicts.push(reference);
                        continue;
                    }
                };
                if state.status() == EntityStatus::Removed {
                    changes.push(RowChange::Delete { reference, expected });
                } else {
                    let record = state
                        .to_record(uow.application_version())
                        .with_version((expected + 1).to_string(), uow.current_time());
                    let bytes = self.inner.codec.encode(&record)?;
                    changes.push(RowChange::Update {
                        reference,
                        expected,
                        record,
                        bytes,
                    });
                }
            }
        }
        if !conflicts.is_empty() {
            return Err(StoreError::Conflict { references: conflicts });
        }
        trace!(store = %self.id, uow = %uow.id(), changes = changes.len(), "sql changes prepared");
        Ok(Box::new(SqlCommitter {
            store: self.id,
            inner: Arc::clone(&self.inner),
            changes,
        }))
    }

    fn entity_states<'a>(&'a self, module: &'a Module) -> StoreResult<StateIter<'a>> {
        let rows: Vec<(i64, Vec<u8>)> = {
            let conn = self.inner.conn.lock();
            let mut stmt = conn
                .prepare("SELECT version, state FROM entity_states ORDER BY identity")
                .map_err(sql_error)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(sql_error)?;
            rows.collect::<Result<_, _>>().map_err(sql_error)?
        };
        let inner = &self.inner;
        Ok(Box::new(rows.into_iter().filter_map(move |(version, bytes)| {
            let record = match inner.decode(version, &bytes) {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            module
                .descriptor(&record.entity_type)
                .map(|d| Ok(EntityState::from_record(&record, Arc::clone(d), EntityStatus::Loaded)))
        })))
    }
}

struct SqlCommitter {
    store: StoreId,
    inner: Arc<SqlInner>,
    changes: Vec<RowChange>,
}

fn modified(record: &StateRecord) -> i64 {
    i64::try_from(record.modified).unwrap_or(i64::MAX)
}

impl StateCommitter for SqlCommitter {
    fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut conn = self.inner.conn.lock();
        let tx = conn.transaction().map_err(sql_error)?;
        let mut conflicts = Vec::new();
        for change in &self.changes {
            match change {
                RowChange::Insert {
                    reference,
                    record,
                    bytes,
                } => {
                    let inserted = tx
                        .execute(
                            "INSERT OR IGNORE INTO entity_states (identity, entity_type,
                                 version, application_version, modified, state)
                             VALUES (?1, ?2, 1, ?3, ?4, ?5)",
                            params![
                                reference.as_str(),
                                record.entity_type,
                                record.application_version,
                                modified(record),
                                bytes
                            ],
                        )
                        .map_err(sql_error)?;
                    if inserted == 0 {
                        return Err(StoreError::AlreadyExists {
                            reference: reference.clone(),
                        });
                    }
                }
                RowChange::Update {
                    reference,
                    expected,
                    record,
                    bytes,
                } => {
                    let updated = tx
                        .execute(
                            "UPDATE entity_states
                             SET entity_type = ?3, version = ?2 + 1, application_version = ?4,
                                 modified = ?5, state = ?6
                             WHERE identity = ?1 AND version = ?2",
                            params![
                                reference.as_str(),
                                expected,
                                record.entity_type,
                                record.application_version,
                                modified(record),
                                bytes
                            ],
                        )
                        .map_err(sql_error)?;
                    if updated == 0 {
                        conflicts.push(reference.clone());
                    }
                }
                RowChange::Delete { reference, expected } => {
                    let deleted = tx
                        .execute(
                            "DELETE FROM entity_states WHERE identity = ?1 AND version = ?2",
                            params![reference.as_str(), expected],
                        )
                        .map_err(sql_error)?;
                    if deleted == 0 {
                        conflicts.push(reference.clone());
                    }
                }
            }
        }
        if !conflicts.is_empty() {
            return Err(StoreError::Conflict { references: conflicts });
        }
        tx.commit().map_err(sql_error)?;
        debug!(store = %self.store, changes = self.changes.len(), "sql changes committed");
        Ok(())
    }

    fn cancel(self: Box<Self>) {
        trace!(store = %self.store, changes = self.changes.len(), "sql changes cancelled");
    }
}
