//! Filesystem-backed media library.
//!
//! Walks a music directory into the core's [`Track`] records, reading tags
//! and audio properties with lofty where possible and falling back to file
//! names where not. `.m3u` files in the tree become playlists. Track ids
//! are assigned per path and survive rescans, which is what keeps DAAP
//! revision deltas meaningful.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use lofty::prelude::*;
use lofty::read_from_path;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::UnboundedSender;
use tunecast_core::{Artwork, AudioSource, MediaLibrary, Playlist, Track};
use walkdir::WalkDir;

/// File extensions served as audio.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "flac", "ogg", "wav"];

/// Cover art file names probed next to a track.
const COVER_NAMES: &[&str] = &["cover.jpg", "cover.png", "folder.jpg", "folder.png"];

#[derive(Default)]
struct Catalog {
    tracks: Vec<Track>,
    paths: HashMap<u32, PathBuf>,
    playlists: Vec<Playlist>,
}

/// Shares the audio files under one directory root.
pub struct FsLibrary {
    root: PathBuf,
    catalog: RwLock<Catalog>,
    /// path -> id, kept across rescans so ids stay stable.
    id_by_path: Mutex<HashMap<PathBuf, u32>>,
    next_id: Mutex<u32>,
    change_tx: Mutex<Option<UnboundedSender<()>>>,
}

impl FsLibrary {
    /// Scans `root` and builds the initial catalog.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("music directory {} does not exist", root.display()),
            ));
        }
        let library = Self {
            root,
            catalog: RwLock::new(Catalog::default()),
            id_by_path: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
            change_tx: Mutex::new(None),
        };
        library.rescan();
        Ok(library)
    }

    /// Wires the server's change signal; every rescan that found a
    /// difference sends one message.
    pub fn set_change_sender(&self, sender: UnboundedSender<()>) {
        *self.change_tx.lock() = Some(sender);
    }

    /// Number of tracks currently shared.
    pub fn track_count(&self) -> usize {
        self.catalog.read().tracks.len()
    }

    /// Re-walks the tree. Returns whether anything changed; a change also
    /// fires the change signal.
    pub fn rescan(&self) -> bool {
        let mut audio_paths: Vec<PathBuf> = Vec::new();
        let mut playlist_paths: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let ext = ext.to_ascii_lowercase();
            if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
                audio_paths.push(path.to_path_buf());
            } else if ext == "m3u" {
                playlist_paths.push(path.to_path_buf());
            }
        }
        audio_paths.sort();
        playlist_paths.sort();

        let mut tracks = Vec::with_capacity(audio_paths.len());
        let mut paths = HashMap::with_capacity(audio_paths.len());
        {
            let mut id_by_path = self.id_by_path.lock();
            let mut next_id = self.next_id.lock();
            for path in audio_paths {
                let id = *id_by_path.entry(path.clone()).or_insert_with(|| {
                    let id = *next_id;
                    *next_id += 1;
                    id
                });
                tracks.push(read_track(id, &path));
                paths.insert(id, path);
            }
        }

        let track_id_for = |path: &Path| -> Option<u32> {
            let id_by_path = self.id_by_path.lock();
            id_by_path.get(path).copied()
        };
        let mut playlists = Vec::new();
        for (index, path) in playlist_paths.iter().enumerate() {
            if let Some(playlist) = read_m3u(path, 2 + index as u32, &track_id_for) {
                playlists.push(playlist);
            }
        }

        let changed = {
            let mut catalog = self.catalog.write();
            let changed = catalog.tracks.iter().map(|t| t.id).ne(tracks.iter().map(|t| t.id))
                || catalog.playlists.len() != playlists.len()
                || catalog
                    .playlists
                    .iter()
                    .zip(&playlists)
                    .any(|(a, b)| a.track_ids != b.track_ids || a.name != b.name);
            *catalog = Catalog { tracks, paths, playlists };
            changed
        };

        if changed {
            log::info!(
                "[Library] scan of {} found {} track(s)",
                self.root.display(),
                self.track_count()
            );
            if let Some(sender) = self.change_tx.lock().as_ref() {
                let _ = sender.send(());
            }
        }
        changed
    }
}

impl MediaLibrary for FsLibrary {
    fn database_id(&self) -> u32 {
        1
    }

    fn database_name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "Music".to_string())
    }

    fn tracks(&self) -> Vec<Track> {
        self.catalog.read().tracks.clone()
    }

    fn track(&self, id: u32) -> Option<Track> {
        self.catalog.read().tracks.iter().find(|t| t.id == id).cloned()
    }

    fn playlists(&self) -> Vec<Playlist> {
        self.catalog.read().playlists.clone()
    }

    fn playlist(&self, id: u32) -> Option<Playlist> {
        self.catalog
            .read()
            .playlists
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    fn open_audio(&self, track: &Track) -> io::Result<AudioSource> {
        let path = self
            .catalog
            .read()
            .paths
            .get(&track.id)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "track has no file"))?;
        let file = std::fs::File::open(path)?;
        let len = file.metadata()?.len();
        Ok(AudioSource::new(tokio::fs::File::from_std(file), len))
    }

    fn artwork(&self, track: &Track) -> Option<Artwork> {
        let path = self.catalog.read().paths.get(&track.id).cloned()?;
        let dir = path.parent()?;
        for name in COVER_NAMES {
            let candidate = dir.join(name);
            if let Ok(bytes) = std::fs::read(&candidate) {
                let subtype = match candidate.extension().and_then(|e| e.to_str()) {
                    Some("png") => "png",
                    _ => "jpeg",
                };
                return Some(Artwork { bytes, mime_subtype: subtype.to_string() });
            }
        }
        None
    }
}

fn unix_secs(time: io::Result<SystemTime>) -> u32 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Builds a [`Track`] from a file, preferring tags and degrading to the
/// file name when the tags are missing or unreadable.
fn read_track(id: u32, path: &Path) -> Track {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let format = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let metadata = std::fs::metadata(path);
    let (size_bytes, date_modified) = match &metadata {
        Ok(meta) => (meta.len() as u32, unix_secs(meta.modified())),
        Err(_) => (0, 0),
    };
    let date_added = metadata
        .as_ref()
        .map(|meta| unix_secs(meta.created()))
        .unwrap_or(0);

    let mut track = Track {
        id,
        title: stem,
        format,
        size_bytes,
        date_added,
        date_modified,
        ..Default::default()
    };

    match read_from_path(path) {
        Ok(tagged) => {
            let props = tagged.properties();
            track.duration_ms = props.duration().as_millis() as u32;
            track.bitrate = props.audio_bitrate().unwrap_or(0) as u16;
            track.sample_rate = props.sample_rate().unwrap_or(0);

            if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
                if let Some(title) = tag.title() {
                    track.title = title.to_string();
                }
                if let Some(artist) = tag.artist() {
                    track.artist = artist.to_string();
                }
                if let Some(album) = tag.album() {
                    track.album = album.to_string();
                }
                if let Some(genre) = tag.genre() {
                    track.genre = genre.to_string();
                }
                track.track_number = tag.track().unwrap_or(0) as u16;
                track.track_count = tag.track_total().unwrap_or(0) as u16;
                track.disc_number = tag.disk().unwrap_or(0) as u16;
                track.disc_count = tag.disk_total().unwrap_or(0) as u16;
                track.year = tag.year().unwrap_or(0) as u16;
            }
        }
        Err(e) => {
            log::debug!("[Library] no readable tags in {}: {}", path.display(), e);
        }
    }
    track
}

/// Parses an `.m3u` file into a playlist of known track ids. Lines that
/// point outside the scanned set are skipped.
fn read_m3u(
    path: &Path,
    id: u32,
    track_id_for: &dyn Fn(&Path) -> Option<u32>,
) -> Option<Playlist> {
    let content = std::fs::read_to_string(path).ok()?;
    let dir = path.parent()?;
    let name = path.file_stem()?.to_string_lossy().to_string();

    let track_ids: Vec<u32> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let entry = Path::new(line);
            let resolved = if entry.is_absolute() {
                entry.to_path_buf()
            } else {
                dir.join(entry)
            };
            track_id_for(&resolved)
        })
        .collect();

    Some(Playlist { id, name, track_ids })
}
