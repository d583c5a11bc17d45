//! Context implementation.

use crate::context::state::{ContextKind, ContextState, Phase};
use crate::error::{CoreError, CoreResult};
use crate::query::{Predicate, Query};
use crate::record::{EntityRecord, FieldValue, Record, RecordId};
use crate::store::graph::{self, GraphView, Journal};
use crate::store::{EntityStore, Fields, Links, Mutation, Scan};
use crate::types::SequenceNumber;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Working copies of the records a context has touched; `None` marks a
/// staged delete.
type Overlay = HashMap<RecordId, Option<Record>>;

/// An overlay and the store sequence its copies were taken at.
struct Working {
    base: SequenceNumber,
    overlay: Overlay,
}

/// Store reads with a context's working copies layered on top.
struct OverlayView<'a> {
    store: &'a EntityStore,
    overlay: &'a mut Overlay,
}

impl GraphView for OverlayView<'_> {
    fn load(&self, id: RecordId) -> Option<Record> {
        match self.overlay.get(&id) {
            Some(copy) => copy.clone(),
            None => self.store.load(id),
        }
    }

    fn put(&mut self, record: Record) {
        self.overlay.insert(record.id(), Some(record));
    }

    fn remove(&mut self, id: RecordId) {
        self.overlay.insert(id, None);
    }
}

/// A single-owner unit of work over the store.
///
/// Open one per logical task from [`crate::Stack::context`]. Every write
/// is validated as it is staged, so mistakes surface at the call that made
/// them; nothing reaches the store until [`Context::commit`].
///
/// Reads layer the staged changes over the latest committed state: when
/// another context commits, fields and edges this one never touched show
/// the new values.
///
/// A context is used once: after `commit` or `rollback` every further
/// operation fails with `InvalidOperation`. Dropping a context with staged
/// changes discards them.
///
/// ```rust
/// use cdlab_core::{ContextState, EntitySchema, FieldType, Schema, Stack, StoreMode};
///
/// let schema = Schema::builder()
///     .entity(EntitySchema::new("Note").optional("title", FieldType::Text))
///     .build()
///     .unwrap();
/// let stack = Stack::configure(schema);
/// stack.setup(StoreMode::Ephemeral).unwrap();
///
/// let mut ctx = stack.background_context().unwrap();
/// let id = ctx.insert("Note", [("title", "draft")]).unwrap();
/// assert_eq!(ctx.state(), ContextState::Staged(1));
/// assert!(ctx.get("Note", id).unwrap().is_some());
///
/// ctx.rollback().unwrap();
/// assert!(stack.store().unwrap().get("Note", id).unwrap().is_none());
/// ```
pub struct Context {
    id: u64,
    kind: ContextKind,
    store: Arc<EntityStore>,
    phase: Phase,
    staged: Vec<Mutation>,
    working: Mutex<Working>,
}

impl Context {
    pub(crate) fn new(store: Arc<EntityStore>, kind: ContextKind) -> Self {
        let id = store.next_context_id();
        let base = store.committed_seq();
        debug!(context = id, %kind, "context opened");
        Self {
            id,
            kind,
            store,
            phase: Phase::Active,
            staged: Vec::new(),
            working: Mutex::new(Working {
                base,
                overlay: Overlay::new(),
            }),
        }
    }

    /// Role the context was opened for.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ContextState {
        match self.phase {
            Phase::Active if self.staged.is_empty() => ContextState::Open,
            Phase::Active => ContextState::Staged(self.staged.len()),
            Phase::Committed => ContextState::Committed,
            Phase::RolledBack => ContextState::RolledBack,
        }
    }

    /// Whether anything is waiting for commit.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Mutations staged so far, in order.
    #[must_use]
    pub fn staged(&self) -> &[Mutation] {
        &self.staged
    }

    fn ensure_active(&self) -> CoreResult<()> {
        match self.phase {
            Phase::Active => self.store.check_open(),
            Phase::Committed => Err(CoreError::invalid_operation("context already committed")),
            Phase::RolledBack => Err(CoreError::invalid_operation("context already rolled back")),
        }
    }

    /// Working copies over the latest committed state.
    ///
    /// Once another commit lands, the staged mutations are replayed over
    /// the new store state so that fields and edges this context never
    /// touched show their current values.
    fn working(&self) -> MutexGuard<'_, Working> {
        let mut working = self.working.lock();
        let current = self.store.committed_seq();
        if working.base != current {
            working.overlay = self.replay();
            working.base = current;
        }
        working
    }

    /// Rebuilds the overlay from the store and the staged mutations. A
    /// mutation that no longer applies is left out; `commit` reports it.
    fn replay(&self) -> Overlay {
        let mut overlay = Overlay::new();
        let mut view = OverlayView {
            store: &self.store,
            overlay: &mut overlay,
        };
        for mutation in &self.staged {
            let mut journal = Journal::new(&mut view);
            if let Err(err) = graph::apply(self.store.schema(), &mut journal, mutation) {
                journal.undo();
                debug!(
                    context = self.id,
                    subject = %mutation.subject(),
                    error = %err,
                    "staged mutation no longer applies"
                );
            }
        }
        overlay
    }

    fn lookup(&self, id: RecordId) -> Option<Record> {
        let working = self.working();
        match working.overlay.get(&id) {
            Some(copy) => copy.clone(),
            None => self.store.load(id),
        }
    }

    /// Validates `mutation` against this context's view and queues it.
    ///
    /// # Errors
    ///
    /// `SchemaViolation` or `NotFound` when the mutation does not apply to
    /// what this context currently sees. A rejected mutation is not queued
    /// and leaves the working copies untouched.
    pub fn stage(&mut self, mutation: Mutation) -> CoreResult<()> {
        self.ensure_active()?;
        drop(self.working());
        let working = self.working.get_mut();
        let backup = working.overlay.clone();
        let mut view = OverlayView {
            store: &self.store,
            overlay: &mut working.overlay,
        };
        if let Err(err) = graph::apply(self.store.schema(), &mut view, &mutation) {
            working.overlay = backup;
            return Err(err);
        }
        self.staged.push(mutation);
        Ok(())
    }

    /// Stages a new record and returns its identity.
    pub fn insert<K, V>(
        &mut self,
        entity: &str,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> CoreResult<RecordId>
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.insert_with(entity, collect_fields(fields), Links::new())
    }

    /// Stages a new record with initial relationships.
    pub fn insert_with(&mut self, entity: &str, fields: Fields, links: Links) -> CoreResult<RecordId> {
        let id = RecordId::new();
        self.stage(Mutation::Insert {
            id,
            entity: entity.to_string(),
            fields,
            links,
        })?;
        Ok(id)
    }

    /// Stages field changes on an existing record.
    pub fn update<K, V>(
        &mut self,
        id: RecordId,
        changes: impl IntoIterator<Item = (K, V)>,
    ) -> CoreResult<()>
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.stage(Mutation::Update {
            id,
            changes: collect_fields(changes),
        })
    }

    /// Stages a new edge; the inverse side is updated too.
    pub fn link(&mut self, id: RecordId, relation: &str, target: RecordId) -> CoreResult<()> {
        self.stage(Mutation::Link {
            id,
            relation: relation.to_string(),
            target,
        })
    }

    /// Stages removal of an edge and its inverse.
    pub fn unlink(&mut self, id: RecordId, relation: &str, target: RecordId) -> CoreResult<()> {
        self.stage(Mutation::Unlink {
            id,
            relation: relation.to_string(),
            target,
        })
    }

    /// Stages a delete. Deleting a record this context cannot see is a
    /// no-op and stages nothing.
    pub fn delete(&mut self, id: RecordId) -> CoreResult<()> {
        self.ensure_active()?;
        if self.lookup(id).is_none() {
            return Ok(());
        }
        self.stage(Mutation::Delete { id })
    }

    /// Record `id` of `entity` as this context sees it.
    pub fn get(&self, entity: &str, id: RecordId) -> CoreResult<Option<Record>> {
        self.ensure_active()?;
        self.store.schema().entity(entity)?;
        Ok(self.lookup(id).filter(|r| r.entity() == entity))
    }

    /// Typed view of record `id`.
    pub fn get_as<T: EntityRecord>(&self, id: RecordId) -> CoreResult<Option<T>> {
        self.get(T::ENTITY, id)?
            .map(|record| T::from_record(&record))
            .transpose()
    }

    /// Every record of `entity` this context sees, in identity order.
    pub fn scan(&self, entity: &str) -> CoreResult<Scan> {
        self.visible(entity).map(Scan::new)
    }

    /// Same as [`Context::scan`], collected.
    pub fn fetch_all(&self, entity: &str) -> CoreResult<Vec<Record>> {
        self.visible(entity)
    }

    /// Records matching `query`, including this context's staged changes.
    ///
    /// # Errors
    ///
    /// `InvalidPredicate` when the query does not fit the schema.
    pub fn filter(&self, query: &Query) -> CoreResult<Vec<Record>> {
        self.ensure_active()?;
        let candidates = self.visible(query.entity())?;
        let resolve = |id: RecordId| self.lookup(id);
        query.execute(self.store.schema(), &candidates, &resolve)
    }

    /// Number of records matching `query`.
    pub fn count(&self, query: &Query) -> CoreResult<usize> {
        self.filter(query).map(|records| records.len())
    }

    /// Every `T` this context sees.
    pub fn fetch<T: EntityRecord>(&self) -> CoreResult<Vec<T>> {
        self.fetch_where(Predicate::True)
    }

    /// Every `T` matching `predicate`.
    pub fn fetch_where<T: EntityRecord>(&self, predicate: Predicate) -> CoreResult<Vec<T>> {
        self.filter(&Query::new(T::ENTITY).filter(predicate))?
            .iter()
            .map(T::from_record)
            .collect()
    }

    fn visible(&self, entity: &str) -> CoreResult<Vec<Record>> {
        self.ensure_active()?;
        let mut merged: BTreeMap<RecordId, Record> = self
            .store
            .records_of(entity)?
            .into_iter()
            .map(|r| (r.id(), r))
            .collect();
        let working = self.working();
        for (id, copy) in &working.overlay {
            match copy {
                Some(record) if record.entity() == entity => {
                    merged.insert(*id, record.clone());
                }
                Some(_) => {}
                None => {
                    merged.remove(id);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Applies every staged mutation to the store atomically.
    ///
    /// Returns the sequence number of the commit. Committing with nothing
    /// staged is a no-op that returns the store's current sequence.
    ///
    /// # Errors
    ///
    /// `Conflict` when the staged changes no longer apply to the latest
    /// store state; I/O errors when the commit could not be logged. In both
    /// cases the store is unchanged and the context keeps its staged
    /// changes, so the caller may roll back or inspect them.
    pub fn commit(&mut self) -> CoreResult<SequenceNumber> {
        self.ensure_active()?;
        if self.staged.is_empty() {
            self.phase = Phase::Committed;
            return Ok(self.store.committed_seq());
        }

        match self.store.apply(&self.staged) {
            Ok(sequence) => {
                debug!(
                    context = self.id,
                    kind = %self.kind,
                    %sequence,
                    mutations = self.staged.len(),
                    "context committed"
                );
                self.phase = Phase::Committed;
                self.staged.clear();
                self.working.get_mut().overlay.clear();
                Ok(sequence)
            }
            Err(err) if err.is_integrity() => {
                warn!(context = self.id, kind = %self.kind, error = %err, "commit conflict");
                Err(CoreError::conflict(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Discards every staged mutation.
    ///
    /// Rolling back twice is harmless.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` after a successful commit.
    pub fn rollback(&mut self) -> CoreResult<()> {
        match self.phase {
            Phase::Committed => Err(CoreError::invalid_operation(
                "cannot roll back a committed context",
            )),
            Phase::RolledBack => Ok(()),
            Phase::Active => {
                debug!(
                    context = self.id,
                    kind = %self.kind,
                    discarded = self.staged.len(),
                    "context rolled back"
                );
                self.staged.clear();
                self.working.get_mut().overlay.clear();
                self.phase = Phase::RolledBack;
                Ok(())
            }
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.phase == Phase::Active && !self.staged.is_empty() {
            debug!(
                context = self.id,
                kind = %self.kind,
                discarded = self.staged.len(),
                "context dropped with staged changes"
            );
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn collect_fields<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Fields
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StoreMode};
    use crate::schema::{EntitySchema, FieldType, RelationshipDef, Schema};

    fn store() -> Arc<EntityStore> {
        let schema = Schema::builder()
            .entity(
                EntitySchema::new("Library")
                    .optional("name", FieldType::Text)
                    .optional("pinned", FieldType::Bool)
                    .relationship(RelationshipDef::to_many("musics", "Music", "library")),
            )
            .entity(
                EntitySchema::new("Music")
                    .required("name", FieldType::Text)
                    .relationship(RelationshipDef::to_one("library", "Library", "musics")),
            )
            .build()
            .unwrap();
        Arc::new(EntityStore::open(Arc::new(schema), Config::default(), &StoreMode::Ephemeral).unwrap())
    }

    fn open(store: &Arc<EntityStore>) -> Context {
        Context::new(Arc::clone(store), ContextKind::Background)
    }

    #[test]
    fn reads_see_own_staged_changes_only() {
        let store = store();
        let mut writer = open(&store);
        let reader = open(&store);

        let id = writer.insert("Library", [("name", "Favorites")]).unwrap();

        assert!(writer.get("Library", id).unwrap().is_some());
        assert_eq!(writer.fetch_all("Library").unwrap().len(), 1);
        assert!(reader.get("Library", id).unwrap().is_none());
        assert!(store.get("Library", id).unwrap().is_none());

        writer.commit().unwrap();
        assert!(reader.get("Library", id).unwrap().is_some());
    }

    #[test]
    fn staging_validates_immediately() {
        let store = store();
        let mut ctx = open(&store);

        let err = ctx.insert("Music", [("name", FieldValue::Null)]).unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation { .. }));
        let err = ctx.update(RecordId::new(), [("name", "x")]).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert_eq!(ctx.state(), ContextState::Open);
    }

    #[test]
    fn rejected_stage_keeps_working_copies() {
        let store = store();
        let mut ctx = open(&store);
        ctx.insert("Library", [("name", "L")]).unwrap();

        let links = Links::from([("library".to_string(), [RecordId::new()].into())]);
        let err = ctx
            .insert_with("Music", Fields::from([("name".into(), "M".into())]), links)
            .unwrap_err();

        assert!(matches!(err, CoreError::SchemaViolation { .. }));
        assert!(ctx.fetch_all("Music").unwrap().is_empty());
        assert_eq!(ctx.state(), ContextState::Staged(1));
    }

    #[test]
    fn rollback_discards_and_is_idempotent() {
        let store = store();
        let mut ctx = open(&store);
        ctx.insert("Library", [("name", "L")]).unwrap();
        ctx.rollback().unwrap();
        ctx.rollback().unwrap();

        assert_eq!(ctx.state(), ContextState::RolledBack);
        assert!(store.is_empty());
        assert!(matches!(
            ctx.insert("Library", [("name", "L")]),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn committed_context_is_terminal() {
        let store = store();
        let mut ctx = open(&store);
        ctx.insert("Library", [("name", "L")]).unwrap();
        let seq = ctx.commit().unwrap();

        assert_eq!(seq, SequenceNumber::new(1));
        assert_eq!(ctx.state(), ContextState::Committed);
        assert!(matches!(ctx.commit(), Err(CoreError::InvalidOperation { .. })));
        assert!(matches!(ctx.rollback(), Err(CoreError::InvalidOperation { .. })));
        assert!(matches!(ctx.fetch_all("Library"), Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn empty_commit_is_a_noop() {
        let store = store();
        let mut ctx = open(&store);
        assert_eq!(ctx.commit().unwrap(), SequenceNumber::new(0));
        assert_eq!(store.committed_seq(), SequenceNumber::new(0));
    }

    #[test]
    fn commit_merges_by_property() {
        let store = store();
        let id = store
            .insert(
                "Library",
                Fields::from([("name".into(), "Old".into()), ("pinned".into(), false.into())]),
                Links::new(),
            )
            .unwrap();

        let mut renamer = open(&store);
        let mut pinner = open(&store);
        renamer.update(id, [("name", "New")]).unwrap();
        pinner.update(id, [("pinned", true)]).unwrap();
        pinner.commit().unwrap();
        renamer.commit().unwrap();

        let record = store.get("Library", id).unwrap().unwrap();
        assert_eq!(record.text("name").unwrap(), Some("New"));
        assert_eq!(record.bool("pinned").unwrap(), Some(true));
    }

    #[test]
    fn stale_commit_is_a_conflict() {
        let store = store();
        let library = store.insert("Library", Fields::new(), Links::new()).unwrap();

        let mut ctx = open(&store);
        ctx.update(library, [("name", "renamed")]).unwrap();
        store.delete(library).unwrap();

        let err = ctx.commit().unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
        assert_eq!(ctx.state(), ContextState::Staged(1));
        assert!(store.is_empty());
        ctx.rollback().unwrap();
    }

    #[test]
    fn staged_delete_hides_record() {
        let store = store();
        let library = store
            .insert("Library", Fields::from([("name".into(), "L".into())]), Links::new())
            .unwrap();

        let mut ctx = open(&store);
        ctx.delete(library).unwrap();
        ctx.delete(library).unwrap();
        assert_eq!(ctx.state(), ContextState::Staged(1));
        assert!(ctx.fetch_all("Library").unwrap().is_empty());
        assert_eq!(store.len(), 1);

        ctx.commit().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn filter_traverses_staged_links() {
        let store = store();
        let mut ctx = open(&store);
        let library = ctx.insert("Library", [("name", "Favorites")]).unwrap();
        let music = ctx.insert("Music", [("name", "Anthem")]).unwrap();
        ctx.link(music, "library", library).unwrap();

        let query = Query::new("Library").filter(Predicate::any("musics", Predicate::eq("name", "Anthem")));
        let found = ctx.filter(&query).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), library);
        assert_eq!(ctx.count(&Query::new("Music")).unwrap(), 1);
    }

    #[test]
    fn staged_link_sees_later_commits() {
        let store = store();
        let library = store
            .insert("Library", Fields::from([("name".into(), "Old".into())]), Links::new())
            .unwrap();

        let mut ctx = open(&store);
        let music = ctx.insert("Music", [("name", "Anthem")]).unwrap();
        ctx.link(music, "library", library).unwrap();

        let mut renamer = open(&store);
        renamer.update(library, [("name", "New")]).unwrap();
        renamer.commit().unwrap();

        let seen = ctx.get("Library", library).unwrap().unwrap();
        assert_eq!(seen.text("name").unwrap(), Some("New"));
        assert!(seen.is_related("musics", music));

        let by_new_name = Query::new("Library").filter(Predicate::eq("name", "New"));
        assert_eq!(ctx.filter(&by_new_name).unwrap().len(), 1);
        let by_old_name = Query::new("Library").filter(Predicate::eq("name", "Old"));
        assert!(ctx.filter(&by_old_name).unwrap().is_empty());

        ctx.commit().unwrap();
        let stored = store.get("Library", library).unwrap().unwrap();
        assert_eq!(stored.text("name").unwrap(), Some("New"));
        assert!(stored.is_related("musics", music));
    }

    #[test]
    fn staged_changes_over_a_deleted_target_drop_out_of_view() {
        let store = store();
        let library = store.insert("Library", Fields::new(), Links::new()).unwrap();

        let mut ctx = open(&store);
        let music = ctx.insert("Music", [("name", "Anthem")]).unwrap();
        ctx.link(music, "library", library).unwrap();
        assert_eq!(ctx.fetch_all("Music").unwrap().len(), 1);

        store.delete(library).unwrap();
        assert!(ctx.get("Library", library).unwrap().is_none());
        let kept = ctx.get("Music", music).unwrap().unwrap();
        assert_eq!(kept.related_one("library"), None);

        let err = ctx.commit().unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
    }

    #[test]
    fn filter_rejects_unknown_fields() {
        let store = store();
        let ctx = open(&store);
        let err = ctx
            .filter(&Query::new("Library").filter(Predicate::eq("title", "x")))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPredicate { .. }));
    }
}
