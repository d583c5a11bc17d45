//! Entity store implementation.

use crate::config::{Config, StoreMode};
use crate::dir::{Snapshot, StoreDir};
use crate::error::{CoreError, CoreResult};
use crate::query::Query;
use crate::record::{Record, RecordId};
use crate::schema::Schema;
use crate::store::graph::{self, Journal};
use crate::store::mutation::{Fields, Links, Mutation};
use crate::store::scan::Scan;
use crate::store::tables::Tables;
use crate::types::SequenceNumber;
use crate::wal::{WalManager, WalRecord, WalWrite};
use cdlab_storage::FileBackend;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Files backing a durable store.
struct Durability {
    dir: StoreDir,
    wal: WalManager,
}

/// Canonical owner of every record.
///
/// Reads (`get`, `scan`, `filter`) share a read lock and never wait on each
/// other. Writes go through [`EntityStore::apply`], which serializes on a
/// single commit lock; the single-operation helpers (`insert`, `update`,
/// ...) are one-mutation batches.
///
/// Obtain a store from [`crate::Stack::store`]; most callers go through a
/// [`crate::Context`] instead of writing to the store directly.
pub struct EntityStore {
    schema: Arc<Schema>,
    config: Config,
    tables: RwLock<Tables>,
    /// Serializes batches, checkpoints and shutdown.
    commit_lock: Mutex<()>,
    /// `None` for ephemeral stores and after close.
    durability: Mutex<Option<Durability>>,
    durable: bool,
    committed_seq: AtomicU64,
    next_context: AtomicU64,
    closed: AtomicBool,
}

impl EntityStore {
    /// Opens a store in `mode`, recovering durable state from disk.
    pub(crate) fn open(schema: Arc<Schema>, config: Config, mode: &StoreMode) -> CoreResult<Self> {
        match mode {
            StoreMode::Ephemeral => {
                debug!("opened ephemeral store");
                Ok(Self::assemble(schema, config, Tables::default(), None, SequenceNumber::new(0)))
            }
            StoreMode::Durable(path) => Self::open_durable(schema, config, path),
        }
    }

    fn open_durable(schema: Arc<Schema>, config: Config, path: &Path) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let mut tables = Tables::default();
        let mut sequence = SequenceNumber::new(0);

        if let Some(Snapshot {
            sequence: at,
            records,
        }) = dir.load_snapshot()?
        {
            for record in records {
                schema.entity(record.entity())?;
                tables.insert(record);
            }
            sequence = at;
        }

        let wal = WalManager::new(Box::new(FileBackend::open(&dir.wal_path())?), config.sync_on_commit);
        let mut replayed = 0usize;
        for (_, frame) in wal.recover()? {
            // Frames at or below the snapshot were already folded into it.
            if frame.sequence() <= sequence {
                continue;
            }
            let WalRecord::Commit {
                sequence: at,
                writes,
            } = frame;
            for write in writes {
                match write {
                    WalWrite::Put(record) => {
                        schema.entity(record.entity())?;
                        tables.insert(record);
                    }
                    WalWrite::Delete { id } => {
                        tables.take(id);
                    }
                }
            }
            sequence = at;
            replayed += 1;
        }

        info!(
            path = %path.display(),
            records = tables.len(),
            %sequence,
            replayed,
            "recovered durable store"
        );
        Ok(Self::assemble(
            schema,
            config,
            tables,
            Some(Durability { dir, wal }),
            sequence,
        ))
    }

    fn assemble(
        schema: Arc<Schema>,
        config: Config,
        tables: Tables,
        durability: Option<Durability>,
        sequence: SequenceNumber,
    ) -> Self {
        Self {
            schema,
            config,
            tables: RwLock::new(tables),
            commit_lock: Mutex::new(()),
            durable: durability.is_some(),
            durability: Mutex::new(durability),
            committed_seq: AtomicU64::new(sequence.as_u64()),
            next_context: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Schema the store validates against.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Sequence number of the latest commit (0 before the first).
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    /// Whether commits are logged to disk.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Whether the store was closed or destroyed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live records across all entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            Err(CoreError::StoreClosed)
        } else {
            Ok(())
        }
    }

    /// Creates a record and returns its identity.
    ///
    /// # Errors
    ///
    /// `SchemaViolation` when the entity or a field is undeclared, a value
    /// has the wrong type, a required field is missing or a relationship
    /// target does not exist.
    pub fn insert(&self, entity: &str, fields: Fields, links: Links) -> CoreResult<RecordId> {
        let id = RecordId::new();
        self.apply(&[Mutation::Insert {
            id,
            entity: entity.to_string(),
            fields,
            links,
        }])?;
        Ok(id)
    }

    /// Record `id` of `entity`, `None` when absent or of another entity.
    ///
    /// # Errors
    ///
    /// `SchemaViolation` for an undeclared entity.
    pub fn get(&self, entity: &str, id: RecordId) -> CoreResult<Option<Record>> {
        self.ensure_open()?;
        self.schema.entity(entity)?;
        Ok(self
            .tables
            .read()
            .get(id)
            .filter(|r| r.entity() == entity)
            .cloned())
    }

    /// Record `id` of any entity.
    pub fn record(&self, id: RecordId) -> CoreResult<Option<Record>> {
        self.ensure_open()?;
        Ok(self.load(id))
    }

    /// Overwrites some fields of an existing record.
    ///
    /// # Errors
    ///
    /// `NotFound` when `id` is absent; `SchemaViolation` for undeclared
    /// fields or mistyped values.
    pub fn update(&self, id: RecordId, changes: Fields) -> CoreResult<()> {
        self.apply(&[Mutation::Update { id, changes }]).map(|_| ())
    }

    /// Adds `target` to `relation` of `id`, and `id` to the inverse.
    pub fn link(&self, id: RecordId, relation: &str, target: RecordId) -> CoreResult<()> {
        self.apply(&[Mutation::Link {
            id,
            relation: relation.to_string(),
            target,
        }])
        .map(|_| ())
    }

    /// Removes `target` from `relation` of `id`, and `id` from the inverse.
    pub fn unlink(&self, id: RecordId, relation: &str, target: RecordId) -> CoreResult<()> {
        self.apply(&[Mutation::Unlink {
            id,
            relation: relation.to_string(),
            target,
        }])
        .map(|_| ())
    }

    /// Removes a record and detaches it from related records. Deleting an
    /// absent record is a no-op.
    pub fn delete(&self, id: RecordId) -> CoreResult<()> {
        self.apply(&[Mutation::Delete { id }]).map(|_| ())
    }

    /// Every live record of `entity`, in identity order.
    ///
    /// # Errors
    ///
    /// `SchemaViolation` for an undeclared entity.
    pub fn scan(&self, entity: &str) -> CoreResult<Scan> {
        self.ensure_open()?;
        self.schema.entity(entity)?;
        let records = self.tables.read().entity(entity).cloned().collect();
        Ok(Scan::new(records))
    }

    /// Records matching `query`.
    ///
    /// # Errors
    ///
    /// `InvalidPredicate` when the query does not fit the schema.
    pub fn filter(&self, query: &Query) -> CoreResult<Vec<Record>> {
        self.ensure_open()?;
        let tables = self.tables.read();
        let resolve = |id: RecordId| tables.get(id).cloned();
        query.execute(&self.schema, tables.entity(query.entity()), &resolve)
    }

    /// Number of records matching `query`.
    pub fn count(&self, query: &Query) -> CoreResult<usize> {
        self.filter(query).map(|records| records.len())
    }

    /// Applies a batch of mutations atomically and returns its sequence.
    ///
    /// The batch is validated against the current state one mutation at a
    /// time; the first failure undoes every earlier change in the batch. A
    /// batch that changes nothing (for example deleting absent records)
    /// returns the current sequence without logging.
    ///
    /// # Errors
    ///
    /// The first validation error (`SchemaViolation`, `NotFound`), or the
    /// I/O error that prevented logging the batch. In both cases the store
    /// is unchanged.
    pub fn apply(&self, mutations: &[Mutation]) -> CoreResult<SequenceNumber> {
        let _commit = self.commit_lock.lock();
        self.ensure_open()?;
        if mutations.is_empty() {
            return Ok(self.committed_seq());
        }

        let durability = self.durability.lock();
        let mut tables = self.tables.write();
        let mut journal = Journal::new(&mut *tables);

        for mutation in mutations {
            if let Err(err) = graph::apply(&self.schema, &mut journal, mutation) {
                journal.undo();
                debug!(subject = %mutation.subject(), error = %err, "batch rejected");
                return Err(err);
            }
        }

        let writes = journal.writes();
        if writes.is_empty() {
            return Ok(self.committed_seq());
        }

        let sequence = self.committed_seq().next();
        let touched = writes.len();
        if let Some(d) = durability.as_ref() {
            if let Err(err) = d.wal.append(&WalRecord::Commit { sequence, writes }) {
                journal.undo();
                warn!(%sequence, error = %err, "WAL append failed, batch undone");
                return Err(err);
            }
        }
        self.committed_seq.store(sequence.as_u64(), Ordering::SeqCst);
        drop(tables);
        debug!(%sequence, mutations = mutations.len(), touched, "batch committed");

        if let Some(d) = durability.as_ref() {
            self.maybe_checkpoint(d);
        }
        Ok(sequence)
    }

    fn maybe_checkpoint(&self, durability: &Durability) {
        let threshold = self.config.checkpoint_threshold;
        if threshold == 0 {
            return;
        }
        match durability.wal.size() {
            Ok(size) if size >= threshold => {
                // The batch is already durable in the WAL; a failed
                // checkpoint only delays log truncation.
                if let Err(err) = self.checkpoint_locked(durability) {
                    warn!(error = %err, "automatic checkpoint failed");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "could not read WAL size"),
        }
    }

    /// Writes every record to the snapshot and truncates the WAL.
    ///
    /// A no-op for ephemeral stores.
    pub fn checkpoint(&self) -> CoreResult<()> {
        let _commit = self.commit_lock.lock();
        self.ensure_open()?;
        let durability = self.durability.lock();
        match durability.as_ref() {
            Some(d) => self.checkpoint_locked(d),
            None => Ok(()),
        }
    }

    fn checkpoint_locked(&self, durability: &Durability) -> CoreResult<()> {
        let snapshot = {
            let tables = self.tables.read();
            Snapshot {
                sequence: self.committed_seq(),
                records: tables.all().cloned().collect(),
            }
        };
        durability.dir.save_snapshot(&snapshot)?;
        durability.wal.clear()?;
        info!(
            path = %durability.dir.path().display(),
            sequence = %snapshot.sequence,
            records = snapshot.records.len(),
            "checkpoint complete"
        );
        Ok(())
    }

    /// Flushes and releases the store. Further calls fail with
    /// `StoreClosed`; closing twice is a no-op.
    pub(crate) fn close(&self) -> CoreResult<()> {
        let _commit = self.commit_lock.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(d) = self.durability.lock().take() {
            // Fold the log into the snapshot so the next open starts fast.
            self.checkpoint_locked(&d)?;
        }
        self.tables.write().clear();
        debug!("store closed");
        Ok(())
    }

    /// Closes the store and removes its files.
    pub(crate) fn destroy(&self) -> CoreResult<()> {
        let _commit = self.commit_lock.lock();
        self.closed.store(true, Ordering::SeqCst);
        self.tables.write().clear();
        if let Some(Durability { dir, wal }) = self.durability.lock().take() {
            drop(wal);
            let path = dir.path().to_path_buf();
            dir.destroy()?;
            info!(path = %path.display(), "destroyed durable store");
        }
        Ok(())
    }

    /// Current version of `id` without the closed check; used by context
    /// views, which check once per operation.
    pub(crate) fn load(&self, id: RecordId) -> Option<Record> {
        self.tables.read().get(id).cloned()
    }

    /// Live records of `entity` at this instant.
    pub(crate) fn records_of(&self, entity: &str) -> CoreResult<Vec<Record>> {
        self.ensure_open()?;
        self.schema.entity(entity)?;
        Ok(self.tables.read().entity(entity).cloned().collect())
    }

    pub(crate) fn check_open(&self) -> CoreResult<()> {
        self.ensure_open()
    }

    /// Allocates a diagnostic identifier for a new context.
    pub(crate) fn next_context_id(&self) -> u64 {
        self.next_context.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("durable", &self.durable)
            .field("committed_seq", &self.committed_seq())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Predicate;
    use crate::record::FieldValue;
    use crate::schema::{EntitySchema, FieldType, RelationshipDef};
    use tempfile::tempdir;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .entity(
                    EntitySchema::new("Library")
                        .required("name", FieldType::Text)
                        .relationship(RelationshipDef::to_many("musics", "Music", "library")),
                )
                .entity(
                    EntitySchema::new("Music")
                        .optional("name", FieldType::Text)
                        .relationship(RelationshipDef::to_one("library", "Library", "musics")),
                )
                .build()
                .unwrap(),
        )
    }

    fn ephemeral() -> EntityStore {
        EntityStore::open(schema(), Config::default(), &StoreMode::Ephemeral).unwrap()
    }

    fn named(name: &str) -> Fields {
        Fields::from([("name".to_string(), FieldValue::from(name))])
    }

    #[test]
    fn insert_then_get() {
        let store = ephemeral();
        let id = store.insert("Library", named("TestLibrary"), Links::new()).unwrap();

        let record = store.get("Library", id).unwrap().unwrap();
        assert_eq!(record.text("name").unwrap(), Some("TestLibrary"));
        assert!(store.get("Music", id).unwrap().is_none());
        assert_eq!(store.committed_seq(), SequenceNumber::new(1));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let store = ephemeral();
        let err = store.insert("Library", Fields::new(), Links::new()).unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation { .. }));
        assert!(store.is_empty());
        assert_eq!(store.committed_seq(), SequenceNumber::new(0));
    }

    #[test]
    fn update_missing_record_is_not_found() {
        let store = ephemeral();
        let err = store.update(RecordId::new(), named("x")).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn delete_twice_is_a_noop() {
        let store = ephemeral();
        let id = store.insert("Library", named("L"), Links::new()).unwrap();
        store.delete(id).unwrap();
        let seq = store.committed_seq();
        store.delete(id).unwrap();
        assert_eq!(store.committed_seq(), seq);
        assert!(store.get("Library", id).unwrap().is_none());
    }

    #[test]
    fn failed_batch_leaves_no_trace() {
        let store = ephemeral();
        let library = store.insert("Library", named("L"), Links::new()).unwrap();
        let music = RecordId::new();

        let err = store
            .apply(&[
                Mutation::Insert {
                    id: music,
                    entity: "Music".into(),
                    fields: named("M"),
                    links: Links::from([("library".into(), [library].into())]),
                },
                Mutation::Update {
                    id: RecordId::new(),
                    changes: named("ghost"),
                },
            ])
            .unwrap_err();

        assert!(matches!(err, CoreError::NotFound { .. }));
        assert!(store.record(music).unwrap().is_none());
        assert!(store.record(library).unwrap().unwrap().related("musics").is_empty());
    }

    #[test]
    fn scan_and_filter() {
        let store = ephemeral();
        store.insert("Library", named("Favorites"), Links::new()).unwrap();
        store.insert("Library", named("Olds"), Links::new()).unwrap();

        let mut scan = store.scan("Library").unwrap();
        assert_eq!(scan.len(), 2);
        let first_pass: Vec<Record> = scan.by_ref().collect();
        scan.restart();
        assert_eq!(scan.collect::<Vec<_>>(), first_pass);

        let query = Query::new("Library").filter(Predicate::eq("name", "Favorites"));
        assert_eq!(store.filter(&query).unwrap().len(), 1);
        assert_eq!(store.count(&Query::new("Library")).unwrap(), 2);
        assert!(matches!(
            store.scan("Playlist").unwrap_err(),
            CoreError::SchemaViolation { .. }
        ));
    }

    #[test]
    fn closed_store_rejects_operations() {
        let store = ephemeral();
        store.close().unwrap();
        assert!(matches!(
            store.insert("Library", named("L"), Links::new()),
            Err(CoreError::StoreClosed)
        ));
        assert!(matches!(store.scan("Library"), Err(CoreError::StoreClosed)));
        store.close().unwrap();
    }

    #[test]
    fn durable_store_recovers_from_wal() {
        let temp = tempdir().unwrap();
        let mode = StoreMode::durable(temp.path());
        let config = Config::default().checkpoint_threshold(0);

        let (library, music) = {
            let store = EntityStore::open(schema(), config.clone(), &mode).unwrap();
            let library = store.insert("Library", named("Favorites"), Links::new()).unwrap();
            let music = store
                .insert("Music", named("Hello"), Links::from([("library".into(), [library].into())]))
                .unwrap();
            (library, music)
        };

        let store = EntityStore::open(schema(), config, &mode).unwrap();
        assert_eq!(store.committed_seq(), SequenceNumber::new(2));
        let library = store.get("Library", library).unwrap().unwrap();
        assert!(library.is_related("musics", music));
    }

    #[test]
    fn checkpoint_then_more_commits() {
        let temp = tempdir().unwrap();
        let mode = StoreMode::durable(temp.path());
        let config = Config::default().checkpoint_threshold(0);

        {
            let store = EntityStore::open(schema(), config.clone(), &mode).unwrap();
            store.insert("Library", named("before"), Links::new()).unwrap();
            store.checkpoint().unwrap();
            store.insert("Library", named("after"), Links::new()).unwrap();
        }

        let store = EntityStore::open(schema(), config, &mode).unwrap();
        assert_eq!(store.count(&Query::new("Library")).unwrap(), 2);
        assert_eq!(store.committed_seq(), SequenceNumber::new(2));
    }

    #[test]
    fn automatic_checkpoint_truncates_wal() {
        let temp = tempdir().unwrap();
        let mode = StoreMode::durable(temp.path());
        let store = EntityStore::open(schema(), Config::default().checkpoint_threshold(1), &mode).unwrap();
        store.insert("Library", named("L"), Links::new()).unwrap();

        assert_eq!(std::fs::metadata(temp.path().join("wal.log")).unwrap().len(), 0);
        assert!(temp.path().join("SNAPSHOT").exists());
    }

    #[test]
    fn destroy_removes_durable_files() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        let store = EntityStore::open(schema(), Config::default(), &StoreMode::durable(&path)).unwrap();
        store.insert("Library", named("L"), Links::new()).unwrap();

        store.destroy().unwrap();
        assert!(!path.exists());
        assert!(store.is_closed());
    }

    #[test]
    fn failed_log_write_leaves_store_and_log_clean() {
        use crate::wal::faulty::FaultyBackend;

        let temp = tempdir().unwrap();
        let (backend, faults) = FaultyBackend::new();
        let durability = Durability {
            dir: StoreDir::open(temp.path(), true).unwrap(),
            wal: WalManager::new(Box::new(backend), false),
        };
        let config = Config::default().checkpoint_threshold(0);
        let store = EntityStore::assemble(
            schema(),
            config,
            Tables::default(),
            Some(durability),
            SequenceNumber::new(0),
        );
        store.insert("Library", named("Kept"), Links::new()).unwrap();

        faults.tear_append.store(true, Ordering::SeqCst);
        assert!(store.insert("Library", named("Lost"), Links::new()).is_err());
        assert_eq!(store.len(), 1);
        assert_eq!(store.committed_seq(), SequenceNumber::new(1));

        store.insert("Library", named("Later"), Links::new()).unwrap();
        assert_eq!(store.committed_seq(), SequenceNumber::new(2));

        let guard = store.durability.lock();
        let frames = guard.as_ref().unwrap().wal.recover().unwrap();
        let sequences: Vec<_> = frames.iter().map(|(_, frame)| frame.sequence()).collect();
        assert_eq!(sequences, vec![SequenceNumber::new(1), SequenceNumber::new(2)]);
    }
}
