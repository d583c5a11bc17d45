//! # CDLab Beans
//!
//! Typed facades over the CDLab object store for a small music catalogue:
//! libraries, the musics they hold, and the credentials of the remote
//! server.
//!
//! ```rust
//! use cdlab_beans::{domain_schema, LibraryBean, MusicBean};
//! use cdlab_core::{Stack, StoreMode};
//!
//! let stack = Stack::configure(domain_schema().unwrap());
//! stack.setup(StoreMode::Ephemeral).unwrap();
//!
//! let libraries = LibraryBean::new(stack.clone());
//! let musics = MusicBean::new(stack);
//!
//! let favorites = libraries.create_library("Favorites", None, &[]).unwrap();
//! let song = musics.create_music("Hello", None, Some(favorites.id)).unwrap();
//!
//! assert_eq!(song.library, Some(favorites.id));
//! assert_eq!(libraries.musics_of(favorites.id).unwrap(), vec![song]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod access;
mod bean;
mod library;
mod model;
mod music;

pub use access::{AccessBean, ACCESS_KEY};
pub use bean::Bean;
pub use library::LibraryBean;
pub use model::{domain_schema, names, Access, Library, Music, LIBRARY, MUSIC};
pub use music::MusicBean;
