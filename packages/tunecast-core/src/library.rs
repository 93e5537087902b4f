//! The library adapter interface.
//!
//! The core treats the music library as an opaque provider behind
//! [`MediaLibrary`]: a set of tracks with stable numeric ids, a set of
//! ordered playlists, openers for audio and artwork, and a change signal.
//! Everything else — scanning, tag reading, decoding — lives with the
//! adapter.

use std::io;
use std::pin::Pin;

use serde::Serialize;
use tokio::io::AsyncRead;

/// The reserved id of the base container that enumerates every track.
pub const BASE_PLAYLIST_ID: u32 = 1;

/// One track as the adapter reports it.
///
/// `id` must be stable for the lifetime of the library: a track keeps its id
/// across revisions, and ids are only reused after a library restart.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Track {
    pub id: u32,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub track_number: u16,
    pub track_count: u16,
    pub disc_number: u16,
    pub disc_count: u16,
    pub year: u16,
    /// Duration in milliseconds.
    pub duration_ms: u32,
    /// File size in bytes.
    pub size_bytes: u32,
    /// Format hint, the file extension without a dot (e.g. `mp3`).
    pub format: String,
    /// Bitrate in kbit/s.
    pub bitrate: u16,
    pub sample_rate: u32,
    /// Unix seconds.
    pub date_added: u32,
    /// Unix seconds.
    pub date_modified: u32,
}

impl Track {
    /// The audio MIME type for this track's format hint.
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self.format.as_str() {
            "mp3" => "audio/mpeg",
            "m4a" | "aac" => "audio/aac",
            "flac" => "audio/flac",
            "ogg" => "audio/ogg",
            "wav" => "audio/wav",
            _ => "application/octet-stream",
        }
    }
}

/// One playlist as the adapter reports it: an ordered sequence of track
/// ids. The base playlist (id 1) is synthesized by the core; adapter
/// playlists must use ids ≥ 2.
#[derive(Debug, Clone, Serialize)]
pub struct Playlist {
    pub id: u32,
    pub name: String,
    pub track_ids: Vec<u32>,
}

/// An opened audio file: a byte stream plus its total length.
pub struct AudioSource {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    pub len: u64,
}

impl AudioSource {
    pub fn new(reader: impl AsyncRead + Send + 'static, len: u64) -> Self {
        Self { reader: Box::pin(reader), len }
    }
}

/// Decoded cover art for a track.
pub struct Artwork {
    pub bytes: Vec<u8>,
    /// MIME subtype under `image/`, e.g. `jpeg`.
    pub mime_subtype: String,
}

/// The capability set the core consumes. Implementations must be cheap to
/// call: `tracks()` and `playlists()` are snapshots taken on every listing
/// request.
pub trait MediaLibrary: Send + Sync {
    /// Stable id of the one database this library backs.
    fn database_id(&self) -> u32;

    /// Human-readable database name.
    fn database_name(&self) -> String;

    /// All tracks, in library order.
    fn tracks(&self) -> Vec<Track>;

    /// Looks up a single track.
    fn track(&self, id: u32) -> Option<Track>;

    /// All playlists, in library order, ids ≥ 2.
    fn playlists(&self) -> Vec<Playlist>;

    /// Looks up a single playlist.
    fn playlist(&self, id: u32) -> Option<Playlist>;

    /// Opens the audio file behind a track.
    fn open_audio(&self, track: &Track) -> io::Result<AudioSource>;

    /// Cover art for a track, if it has any.
    fn artwork(&self, track: &Track) -> Option<Artwork>;
}
