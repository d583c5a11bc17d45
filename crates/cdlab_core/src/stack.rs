//! Store lifecycle.
//!
//! A [`Stack`] goes through two explicit phases: [`Stack::configure`] binds
//! a schema without touching any medium, then [`Stack::setup`] opens the
//! store in the requested mode. Nothing is opened lazily; every accessor
//! on a stack that was not set up fails with `InvalidOperation`.

use crate::config::{Config, StoreMode};
use crate::context::{Context, ContextKind};
use crate::error::{CoreError, CoreResult};
use crate::query::Query;
use crate::record::Record;
use crate::schema::Schema;
use crate::store::EntityStore;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

#[derive(Default)]
struct StackState {
    mode: Option<StoreMode>,
    store: Option<Arc<EntityStore>>,
}

struct StackInner {
    schema: Arc<Schema>,
    config: Config,
    state: RwLock<StackState>,
}

/// Owner of the store lifecycle and factory for contexts.
///
/// Cloning a stack is cheap and every clone refers to the same store.
///
/// ```rust
/// use cdlab_core::{EntitySchema, FieldType, Schema, Stack, StoreMode};
///
/// let schema = Schema::builder()
///     .entity(EntitySchema::new("Note").optional("title", FieldType::Text))
///     .build()
///     .unwrap();
/// let stack = Stack::configure(schema);
/// assert!(!stack.is_ready());
///
/// stack.setup(StoreMode::Ephemeral).unwrap();
/// assert!(stack.is_ready());
///
/// stack.destroy().unwrap();
/// assert!(stack.store().is_err());
/// ```
#[derive(Clone)]
pub struct Stack {
    inner: Arc<StackInner>,
}

impl Stack {
    /// Binds `schema` with the default configuration.
    #[must_use]
    pub fn configure(schema: Schema) -> Self {
        Self::with_config(schema, Config::default())
    }

    /// Binds `schema` with an explicit configuration.
    #[must_use]
    pub fn with_config(schema: Schema, config: Config) -> Self {
        Self {
            inner: Arc::new(StackInner {
                schema: Arc::new(schema),
                config,
                state: RwLock::new(StackState::default()),
            }),
        }
    }

    /// Bound schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Configuration applied at setup.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Opens the store. Durable mode recovers whatever the directory holds.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` when the stack is already set up; `Io`,
    /// `StoreLocked`, `WalCorruption` or `ChecksumMismatch` when the durable
    /// medium cannot be opened.
    pub fn setup(&self, mode: StoreMode) -> CoreResult<()> {
        let mut state = self.inner.state.write();
        if state.store.is_some() {
            return Err(CoreError::invalid_operation(
                "stack is already set up; destroy or close it first",
            ));
        }
        let store = EntityStore::open(Arc::clone(&self.inner.schema), self.inner.config.clone(), &mode)?;
        info!(?mode, records = store.len(), "stack set up");
        state.store = Some(Arc::new(store));
        state.mode = Some(mode);
        Ok(())
    }

    /// Closes the store and removes everything it persisted. The stack may
    /// be set up again afterwards. Destroying a stack that is not set up is
    /// a no-op.
    pub fn destroy(&self) -> CoreResult<()> {
        let mut state = self.inner.state.write();
        let Some(store) = state.store.take() else {
            return Ok(());
        };
        let mode = state.mode.take();
        store.destroy()?;
        info!(?mode, "stack destroyed");
        Ok(())
    }

    /// Closes the store, keeping durable files for the next setup.
    pub fn close(&self) -> CoreResult<()> {
        let mut state = self.inner.state.write();
        let Some(store) = state.store.take() else {
            return Ok(());
        };
        let mode = state.mode.take();
        store.close()?;
        info!(?mode, "stack closed");
        Ok(())
    }

    /// Mode the store was set up in.
    #[must_use]
    pub fn mode(&self) -> Option<StoreMode> {
        self.inner.state.read().mode.clone()
    }

    /// Whether [`Stack::setup`] succeeded and the store is open.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.state.read().store.is_some()
    }

    /// The open store.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` before setup or after destroy.
    pub fn store(&self) -> CoreResult<Arc<EntityStore>> {
        self.inner
            .state
            .read()
            .store
            .clone()
            .ok_or_else(|| CoreError::invalid_operation("stack is not set up"))
    }

    /// Opens a context of the given kind.
    pub fn context(&self, kind: ContextKind) -> CoreResult<Context> {
        Ok(Context::new(self.store()?, kind))
    }

    /// Opens a worker context.
    pub fn background_context(&self) -> CoreResult<Context> {
        self.context(ContextKind::Background)
    }

    /// Opens an interactive context.
    pub fn main_context(&self) -> CoreResult<Context> {
        self.context(ContextKind::Main)
    }

    /// Every committed record of `entity`.
    pub fn fetch_all(&self, entity: &str) -> CoreResult<Vec<Record>> {
        Ok(self.store()?.scan(entity)?.collect())
    }

    /// Committed records matching `query`.
    pub fn filter(&self, query: &Query) -> CoreResult<Vec<Record>> {
        self.store()?.filter(query)
    }

    /// Folds the WAL into the snapshot. A no-op for ephemeral stores.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.store()?.checkpoint()
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("mode", &self.mode())
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Predicate;
    use crate::schema::{EntitySchema, FieldType};
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::builder()
            .entity(EntitySchema::new("Note").required("title", FieldType::Text))
            .build()
            .unwrap()
    }

    #[test]
    fn accessors_fail_before_setup() {
        let stack = Stack::configure(schema());
        assert!(!stack.is_ready());
        assert_eq!(stack.mode(), None);
        assert!(matches!(stack.store(), Err(CoreError::InvalidOperation { .. })));
        assert!(matches!(
            stack.background_context(),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn second_setup_is_rejected() {
        let stack = Stack::configure(schema());
        stack.setup(StoreMode::Ephemeral).unwrap();
        assert!(matches!(
            stack.setup(StoreMode::Ephemeral),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert_eq!(stack.mode(), Some(StoreMode::Ephemeral));
    }

    #[test]
    fn ephemeral_state_does_not_survive_destroy() {
        let stack = Stack::configure(schema());
        stack.setup(StoreMode::Ephemeral).unwrap();
        let mut ctx = stack.main_context().unwrap();
        ctx.insert("Note", [("title", "gone")]).unwrap();
        ctx.commit().unwrap();

        stack.destroy().unwrap();
        stack.setup(StoreMode::Ephemeral).unwrap();
        assert!(stack.fetch_all("Note").unwrap().is_empty());
    }

    #[test]
    fn contexts_outliving_destroy_fail() {
        let stack = Stack::configure(schema());
        stack.setup(StoreMode::Ephemeral).unwrap();
        let mut ctx = stack.background_context().unwrap();
        stack.destroy().unwrap();
        assert!(matches!(
            ctx.insert("Note", [("title", "late")]),
            Err(CoreError::StoreClosed)
        ));
    }

    #[test]
    fn durable_state_survives_close() {
        let temp = tempdir().unwrap();
        let mode = StoreMode::durable(temp.path().join("db"));
        let stack = Stack::configure(schema());

        stack.setup(mode.clone()).unwrap();
        let mut ctx = stack.background_context().unwrap();
        ctx.insert("Note", [("title", "kept")]).unwrap();
        ctx.commit().unwrap();
        stack.close().unwrap();

        stack.setup(mode).unwrap();
        let found = stack
            .filter(&Query::new("Note").filter(Predicate::eq("title", "kept")))
            .unwrap();
        assert_eq!(found.len(), 1);
        stack.checkpoint().unwrap();
    }

    #[test]
    fn destroy_removes_durable_state() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");
        let stack = Stack::configure(schema());

        stack.setup(StoreMode::durable(&path)).unwrap();
        let mut ctx = stack.background_context().unwrap();
        ctx.insert("Note", [("title", "erased")]).unwrap();
        ctx.commit().unwrap();
        stack.destroy().unwrap();
        assert!(!path.exists());

        stack.setup(StoreMode::durable(&path)).unwrap();
        assert!(stack.fetch_all("Note").unwrap().is_empty());
    }
}
