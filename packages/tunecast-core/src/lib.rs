//! Tunecast core - a DAAP music sharing server.
//!
//! This crate implements the server side of the Digital Audio Access
//! Protocol: the HTTP-like protocol iTunes-era clients use to browse and
//! stream a music library discovered over mDNS (`_daap._tcp`).
//!
//! # Architecture
//!
//! - [`dmap`]: the tagged binary wire codec and content-code registry
//! - [`listing`]: canonical DMAP response trees for every endpoint
//! - [`library`]: the adapter trait the core consumes the music library
//!   through
//! - [`playlist`]: per-playlist membership diffing and container ids
//! - [`revision`]: the monotonic revision counter and `/update` long-poll
//! - [`session`]: session issuance, touch, and idle expiry
//! - [`server`]: the hand-rolled HTTP subset, router, and lifecycle
//! - [`advertise`]: mDNS registration and collision handling
//! - [`events`]: observer trait for logins, streams, and name collisions
//!
//! The embedder supplies a [`MediaLibrary`] implementation and a
//! [`ServerConfig`]; [`DaapServer`] does the rest:
//!
//! ```ignore
//! let server = DaapServer::new(config, library, Arc::new(LoggingEvents))?;
//! let port = server.start().await?;
//! // hand server.change_sender() to the library so edits bump the revision
//! ```

pub mod advertise;
pub mod config;
pub mod dmap;
pub mod error;
pub mod events;
pub mod library;
pub mod listing;
pub mod playlist;
pub mod revision;
pub mod server;
pub mod session;

pub use config::{AuthMethod, Credential, ServerConfig};
pub use error::{DaapError, DaapResult};
pub use events::{LoggingEvents, NoopEvents, ServerEvents};
pub use library::{Artwork, AudioSource, MediaLibrary, Playlist, Track, BASE_PLAYLIST_ID};
pub use server::{DaapServer, ServerError};
