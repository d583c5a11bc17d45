//! Music library walkthrough
//!
//! Sets up a store, fills it through the facades and logs what the queries
//! return. With `--path` (or `CDLAB_DIR`) the store is durable and a second
//! run picks up where the first left off.

use cdlab_beans::{domain_schema, Access, AccessBean, Library, LibraryBean, Music, MusicBean};
use cdlab_core::{FileSettings, InMemorySettings, SettingsBackend, Stack, StoreMode};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// CDLab music library demo.
#[derive(Parser)]
#[command(name = "music_library")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store directory; the store is ephemeral when omitted
    #[arg(short, long, env = "CDLAB_DIR")]
    path: Option<PathBuf>,

    /// Remove the store once the walkthrough is done
    #[arg(long)]
    destroy: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let stack = Stack::configure(domain_schema()?);
    let (mode, settings): (StoreMode, Arc<dyn SettingsBackend>) = match &cli.path {
        Some(path) => (
            StoreMode::durable(path.join("store")),
            Arc::new(FileSettings::open(path.join("settings.json"))?),
        ),
        None => (StoreMode::Ephemeral, Arc::new(InMemorySettings::new())),
    };
    stack.setup(mode)?;

    let libraries = LibraryBean::new(stack.clone());
    let musics = MusicBean::new(stack.clone());
    let access = AccessBean::with_backend(settings);

    if access.is_exist() {
        info!(server_url = ?access.server_url(), "found stored access");
    } else {
        access.create_or_update_access(&Access::new("https://music.example.com", "demo-key"))?;
    }

    let favorites = match libraries.filter_libraries("Favorites")?.into_iter().next() {
        Some(existing) => existing,
        None => libraries.create_library("Favorites", None, &[])?,
    };
    let run = musics.search_musics("Track")?.len() + 1;
    let track = musics.create_music(&format!("Track {run}"), None, Some(favorites.id))?;
    info!(id = %track.id, name = ?track.name, "added track");

    let olds = libraries.create_library("Olds", None, &[])?;
    libraries.add_music(track.id, olds.id)?;
    libraries.update_library(olds.id, &Library::draft("Archive"))?;
    musics.update_music(track.id, &Music::draft(format!("Track {run} (archived)")))?;

    for library in libraries.fetch_libraries()? {
        let tracks: Vec<_> = libraries
            .musics_of(library.id)?
            .into_iter()
            .filter_map(|m| m.name)
            .collect();
        info!(name = ?library.name, created_at = %library.created_at, ?tracks, "library");
    }

    libraries.delete_library(olds.id)?;
    info!(
        libraries = libraries.fetch_libraries()?.len(),
        musics = musics.fetch_musics()?.len(),
        "after cleanup"
    );

    if cli.destroy {
        stack.destroy()?;
        access.clear()?;
    } else {
        stack.close()?;
    }
    Ok(())
}
