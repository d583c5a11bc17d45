//! Music facade.

use crate::bean::Bean;
use crate::library::LibraryBean;
use crate::model::{names, Music, MUSIC};
use cdlab_core::{Context, CoreError, CoreResult, EntityRecord, Predicate, RecordId, Stack};
use tracing::{debug, info};

/// Create, query and update [`Music`] records.
#[derive(Debug, Clone)]
pub struct MusicBean {
    stack: Stack,
    libraries: LibraryBean,
}

impl Bean for MusicBean {
    fn stack(&self) -> &Stack {
        &self.stack
    }
}

impl MusicBean {
    /// Binds the facade to `stack`.
    #[must_use]
    pub fn new(stack: Stack) -> Self {
        Self {
            libraries: LibraryBean::new(stack.clone()),
            stack,
        }
    }

    /// Creates a music and, when `library` is given, adds it to that library
    /// in the same commit.
    ///
    /// # Errors
    ///
    /// `NotFound` when `library` is not stored.
    pub fn create_music(
        &self,
        name: &str,
        file: Option<Vec<u8>>,
        library: Option<RecordId>,
    ) -> CoreResult<Music> {
        let music = self.perform(|ctx| {
            let fields = Music {
                id: RecordId::new(),
                name: Some(name.to_string()),
                file,
                library: None,
            }
            .to_fields();
            let id = ctx.insert(MUSIC, fields)?;
            if let Some(library) = library {
                self.libraries.add_music_in(ctx, id, library)?;
            }
            load(ctx, id)
        })?;
        info!(id = %music.id, library = ?music.library, "created music");
        Ok(music)
    }

    /// Every stored music.
    pub fn fetch_musics(&self) -> CoreResult<Vec<Music>> {
        self.read(|ctx| ctx.fetch::<Music>())
    }

    /// Music `id`, if stored.
    pub fn music(&self, id: RecordId) -> CoreResult<Option<Music>> {
        self.read(|ctx| ctx.get_as::<Music>(id))
    }

    /// Musics whose name is exactly `name`.
    pub fn filter_musics(&self, name: &str) -> CoreResult<Vec<Music>> {
        self.read(|ctx| ctx.fetch_where::<Music>(Predicate::eq(names::NAME, name)))
    }

    /// Musics whose name contains `text`, ignoring case.
    pub fn search_musics(&self, text: &str) -> CoreResult<Vec<Music>> {
        self.read(|ctx| ctx.fetch_where::<Music>(Predicate::contains_ignore_case(names::NAME, text)))
    }

    /// Copies every field of `to` onto music `from`, keeping `from`'s
    /// identity and library. When `to` is a different stored music it is
    /// deleted in the same commit.
    ///
    /// # Errors
    ///
    /// `NotFound` when `from` is not stored.
    pub fn update_music(&self, from: RecordId, to: &Music) -> CoreResult<Music> {
        let music = self.perform(|ctx| {
            ctx.update(from, to.to_fields())?;
            if to.id != from && ctx.get(MUSIC, to.id)?.is_some() {
                ctx.delete(to.id)?;
            }
            load(ctx, from)
        })?;
        debug!(id = %from, replaced = %to.id, "updated music");
        Ok(music)
    }

    /// Deletes music `id`, removing it from its library. Deleting a music
    /// that is not stored is a no-op.
    pub fn delete_music(&self, id: RecordId) -> CoreResult<()> {
        self.perform(|ctx| ctx.delete(id))?;
        debug!(%id, "deleted music");
        Ok(())
    }
}

fn load(ctx: &Context, id: RecordId) -> CoreResult<Music> {
    ctx.get_as::<Music>(id)?.ok_or_else(|| CoreError::not_found(id))
}
