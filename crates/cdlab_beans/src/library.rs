//! Library facade.

use crate::bean::Bean;
use crate::model::{names, Library, Music, LIBRARY, MUSIC};
use cdlab_core::{
    Context, CoreError, CoreResult, Direction, EntityRecord, FieldValue, Links, Predicate, Query,
    RecordId, Stack,
};
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Create, query and relate [`Library`] records.
#[derive(Debug, Clone)]
pub struct LibraryBean {
    stack: Stack,
}

impl Bean for LibraryBean {
    fn stack(&self) -> &Stack {
        &self.stack
    }
}

impl LibraryBean {
    /// Binds the facade to `stack`.
    #[must_use]
    pub fn new(stack: Stack) -> Self {
        Self { stack }
    }

    /// Creates a library stamped with the current time. `musics` are moved
    /// into it in the same commit, leaving any library they belonged to.
    ///
    /// # Errors
    ///
    /// `SchemaViolation` when one of `musics` is not a stored music.
    pub fn create_library(
        &self,
        name: &str,
        background_image: Option<Vec<u8>>,
        musics: &[RecordId],
    ) -> CoreResult<Library> {
        let library = self.perform(|ctx| {
            let fields = Library {
                id: RecordId::new(),
                name: Some(name.to_string()),
                background_image,
                created_at: Utc::now(),
                musics: BTreeSet::new(),
            }
            .to_fields();
            let mut links = Links::new();
            if !musics.is_empty() {
                links.insert(names::MUSICS.to_string(), musics.iter().copied().collect());
            }
            let id = ctx.insert_with(LIBRARY, fields, links)?;
            load(ctx, id)
        })?;
        info!(id = %library.id, musics = library.musics.len(), "created library");
        Ok(library)
    }

    /// Every stored library.
    pub fn fetch_libraries(&self) -> CoreResult<Vec<Library>> {
        self.read(|ctx| ctx.fetch::<Library>())
    }

    /// Library `id`, if stored.
    pub fn library(&self, id: RecordId) -> CoreResult<Option<Library>> {
        self.read(|ctx| ctx.get_as::<Library>(id))
    }

    /// Libraries whose name is exactly `name`.
    pub fn filter_libraries(&self, name: &str) -> CoreResult<Vec<Library>> {
        self.read(|ctx| ctx.fetch_where::<Library>(Predicate::eq(names::NAME, name)))
    }

    /// Libraries whose name contains `text`, ignoring case.
    pub fn search_libraries(&self, text: &str) -> CoreResult<Vec<Library>> {
        self.read(|ctx| ctx.fetch_where::<Library>(Predicate::contains_ignore_case(names::NAME, text)))
    }

    /// Copies every field of `to` onto library `from`, keeping `from`'s
    /// identity and musics. When `to` is a different stored library it is
    /// deleted in the same commit.
    ///
    /// # Errors
    ///
    /// `NotFound` when `from` is not stored.
    pub fn update_library(&self, from: RecordId, to: &Library) -> CoreResult<Library> {
        let library = self.perform(|ctx| {
            ctx.update(from, to.to_fields())?;
            if to.id != from && ctx.get(LIBRARY, to.id)?.is_some() {
                ctx.delete(to.id)?;
            }
            load(ctx, from)
        })?;
        debug!(id = %from, replaced = %to.id, "updated library");
        Ok(library)
    }

    /// Deletes library `id`; its musics stay, unlinked. Deleting a library
    /// that is not stored is a no-op.
    pub fn delete_library(&self, id: RecordId) -> CoreResult<()> {
        self.perform(|ctx| ctx.delete(id))?;
        debug!(%id, "deleted library");
        Ok(())
    }

    /// Moves `music` into library `to`. Both sides of the relationship
    /// change in one commit.
    ///
    /// # Errors
    ///
    /// `NotFound` when either record is not stored; `SchemaViolation` when
    /// the identities belong to the wrong entities.
    pub fn add_music(&self, music: RecordId, to: RecordId) -> CoreResult<()> {
        self.perform(|ctx| self.add_music_in(ctx, music, to))?;
        debug!(%music, library = %to, "added music to library");
        Ok(())
    }

    /// Stages [`LibraryBean::add_music`] in a context the caller owns.
    pub(crate) fn add_music_in(&self, ctx: &mut Context, music: RecordId, to: RecordId) -> CoreResult<()> {
        if ctx.get(LIBRARY, to)?.is_none() {
            return Err(CoreError::not_found(to));
        }
        if ctx.get(MUSIC, music)?.is_none() {
            return Err(CoreError::not_found(music));
        }
        ctx.link(to, names::MUSICS, music)
    }

    /// Musics of library `id`, ordered by name.
    ///
    /// # Errors
    ///
    /// `NotFound` when the library is not stored.
    pub fn musics_of(&self, id: RecordId) -> CoreResult<Vec<Music>> {
        self.read(|ctx| {
            if ctx.get(LIBRARY, id)?.is_none() {
                return Err(CoreError::not_found(id));
            }
            let query = Query::new(MUSIC)
                .filter(Predicate::related_to(names::LIBRARY, id))
                .order_by(names::NAME, Direction::Ascending);
            ctx.filter(&query)?.iter().map(Music::from_record).collect()
        })
    }

    /// Renames library `id`.
    pub fn rename_library(&self, id: RecordId, name: &str) -> CoreResult<()> {
        self.perform(|ctx| ctx.update(id, [(names::NAME, FieldValue::from(name))]))
    }
}

fn load(ctx: &Context, id: RecordId) -> CoreResult<Library> {
    ctx.get_as::<Library>(id)?.ok_or_else(|| CoreError::not_found(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::domain_schema;
    use cdlab_core::StoreMode;

    fn bean() -> LibraryBean {
        let stack = Stack::configure(domain_schema().unwrap());
        stack.setup(StoreMode::Ephemeral).unwrap();
        LibraryBean::new(stack)
    }

    #[test]
    fn failed_operation_leaves_store_untouched() {
        let bean = bean();
        let result = bean.perform(|ctx| {
            ctx.insert(LIBRARY, [(names::CREATED_AT, FieldValue::from(Utc::now()))])?;
            Err::<(), _>(CoreError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        assert!(bean.fetch_libraries().unwrap().is_empty());
    }

    #[test]
    fn add_music_rejects_missing_records() {
        let bean = bean();
        let library = bean.create_library("Empty", None, &[]).unwrap();
        let ghost = RecordId::new();
        assert!(matches!(
            bean.add_music(ghost, library.id),
            Err(CoreError::NotFound { id }) if id == ghost
        ));
        assert!(matches!(
            bean.musics_of(ghost),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn rename_keeps_created_at() {
        let bean = bean();
        let library = bean.create_library("Before", None, &[]).unwrap();
        bean.rename_library(library.id, "After").unwrap();
        let renamed = bean.library(library.id).unwrap().unwrap();
        assert_eq!(renamed.name.as_deref(), Some("After"));
        assert_eq!(renamed.created_at, library.created_at);
    }
}
