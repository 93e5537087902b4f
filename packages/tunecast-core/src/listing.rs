//! Canonical DMAP response trees.
//!
//! Pure builders over the library adapter and revision state; the router
//! picks the inputs, these functions fix the shapes. Clients are strict
//! about the field sets, so changes here are protocol changes.

use crate::config::{AuthMethod, ServerConfig};
use crate::dmap::codes::*;
use crate::dmap::{ContentCodeBag, ContentType, Node};
use crate::library::{Playlist, Track, BASE_PLAYLIST_ID};
use crate::playlist::ContainerEntry;

/// DMAP (`mpro`) protocol version advertised in `/server-info`.
const DMAP_VERSION: (u16, u8, u8) = (2, 0, 0);
/// DAAP (`apro`) protocol version advertised in `/server-info`.
const DAAP_VERSION: (u16, u8, u8) = (3, 0, 0);

/// Which per-track fields a listing emits, parsed from the `meta` query
/// parameter.
#[derive(Debug, Clone)]
pub struct MetaFields {
    names: Vec<String>,
}

impl MetaFields {
    /// Field set used when the client sends no `meta` parameter.
    const DEFAULT: &'static [&'static str] = &[
        "dmap.itemid",
        "dmap.itemname",
        "dmap.itemkind",
        "dmap.persistentid",
        "daap.songalbum",
        "daap.songartist",
        "daap.songbitrate",
        "daap.songgenre",
        "daap.songformat",
        "daap.songsamplerate",
        "daap.songsize",
        "daap.songtime",
        "daap.songtracknumber",
        "daap.songtrackcount",
        "daap.songdiscnumber",
        "daap.songdisccount",
        "daap.songyear",
        "daap.songdateadded",
        "daap.songdatemodified",
        "daap.songdatakind",
    ];

    /// Parses a comma-separated `meta` value; `None` selects the default
    /// set. Unknown names are kept and silently skipped at emission time.
    #[must_use]
    pub fn parse(meta: Option<&str>) -> Self {
        let names = match meta {
            Some(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
            _ => Self::DEFAULT.iter().map(|s| s.to_string()).collect(),
        };
        Self { names }
    }

    fn nodes_for(&self, track: &Track) -> Vec<Node> {
        self.names
            .iter()
            .filter_map(|name| track_field(name, track))
            .collect()
    }
}

/// Maps one `meta` name to its node for a track. Unknown names yield
/// nothing.
fn track_field(name: &str, track: &Track) -> Option<Node> {
    let node = match name {
        "dmap.itemid" => Node::u32(MIID, track.id),
        "dmap.itemname" => Node::string(MINM, track.title.clone()),
        // 2 = audio item
        "dmap.itemkind" => Node::u8(MIKD, 2),
        "dmap.persistentid" => Node::u64(MPER, u64::from(track.id)),
        "daap.songalbum" => Node::string(ASAL, track.album.clone()),
        "daap.songartist" => Node::string(ASAR, track.artist.clone()),
        "daap.songbitrate" => Node::u16(ASBR, track.bitrate),
        "daap.songgenre" => Node::string(ASGN, track.genre.clone()),
        "daap.songformat" => Node::string(ASFM, track.format.clone()),
        "daap.songsamplerate" => Node::u32(ASSR, track.sample_rate),
        "daap.songsize" => Node::u32(ASSZ, track.size_bytes),
        "daap.songtime" => Node::u32(ASTM, track.duration_ms),
        "daap.songtracknumber" => Node::u16(ASTN, track.track_number),
        "daap.songtrackcount" => Node::u16(ASTC, track.track_count),
        "daap.songdiscnumber" => Node::u16(ASDN, track.disc_number),
        "daap.songdisccount" => Node::u16(ASDC, track.disc_count),
        "daap.songyear" => Node::u16(ASYR, track.year),
        "daap.songdateadded" => Node::date(ASDA, track.date_added),
        "daap.songdatemodified" => Node::date(ASDM, track.date_modified),
        "daap.songdatakind" => Node::u8(ASDK, 0),
        "daap.songdisabled" => Node::u8(ASDB, 0),
        "daap.songcompilation" => Node::u8(ASCO, 0),
        _ => return None,
    };
    Some(node)
}

/// `/server-info` → `msrv`.
#[must_use]
pub fn server_info(config: &ServerConfig) -> Node {
    let auth_method = match config.auth_method {
        AuthMethod::None => 0u8,
        AuthMethod::UserAndPassword => 1,
        AuthMethod::Password => 2,
    };
    Node::container(
        MSRV,
        vec![
            Node::u32(MSTT, 200),
            Node::version(MPRO, DMAP_VERSION.0, DMAP_VERSION.1, DMAP_VERSION.2),
            Node::version(APRO, DAAP_VERSION.0, DAAP_VERSION.1, DAAP_VERSION.2),
            Node::string(MINM, config.name.clone()),
            Node::u8(MSLR, u8::from(config.password_protected())),
            Node::u8(MSAU, auth_method),
            Node::u32(MSTM, config.session_timeout_secs as u32),
            Node::u8(MSAL, 1),
            Node::u8(MSUP, 1),
            Node::u8(MSPI, 1),
            Node::u8(MSEX, 1),
            Node::u8(MSBR, 1),
            Node::u8(MSQY, 1),
            Node::u8(MSIX, 1),
            Node::u8(MSRS, 1),
            Node::u32(MSDC, 1),
        ],
    )
}

/// `/content-codes` → `mccr` enumerating the registry.
#[must_use]
pub fn content_codes(bag: &ContentCodeBag) -> Node {
    let mut children = vec![Node::u32(MSTT, 200)];
    for (code, name, ty) in bag.iter() {
        children.push(Node::container(
            MDCL,
            vec![
                Node::u32(MCNM, code.as_u32()),
                Node::string(MCNA, name),
                Node::u16(MCTY, ty as u16),
            ],
        ));
    }
    Node::container(MCCR, children)
}

/// `/login` → `mlog`.
#[must_use]
pub fn login_response(session_id: u32) -> Node {
    Node::container(
        MLOG,
        vec![Node::u32(MSTT, 200), Node::u32(MLID, session_id)],
    )
}

/// `/update` → `mupd`.
#[must_use]
pub fn update_response(revision: u32) -> Node {
    Node::container(
        MUPD,
        vec![Node::u32(MSTT, 200), Node::u32(MUSR, revision)],
    )
}

/// `/databases` → `avdb` listing the single database.
#[must_use]
pub fn database_listing(
    db_id: u32,
    db_name: &str,
    track_count: u32,
    playlist_count: u32,
) -> Node {
    let entry = Node::container(
        MLIT,
        vec![
            Node::u32(MIID, db_id),
            Node::u64(MPER, u64::from(db_id)),
            Node::string(MINM, db_name),
            Node::u32(MIMC, track_count),
            Node::u32(MCTC, playlist_count),
        ],
    );
    Node::container(
        AVDB,
        vec![
            Node::u32(MSTT, 200),
            Node::u8(MUTY, 0),
            Node::u32(MTCO, 1),
            Node::u32(MRCO, 1),
            Node::container(MLCL, vec![entry]),
        ],
    )
}

/// `mudl` deletion listing of `miid` children.
fn deleted_listing(deleted_ids: &[u32]) -> Node {
    Node::container(
        MUDL,
        deleted_ids.iter().map(|&id| Node::u32(MIID, id)).collect(),
    )
}

/// `/databases/{db}/items` → `adbs`. A delta listing (`is_delta`) sets
/// `muty=1` and appends the deletion listing when anything was deleted.
#[must_use]
pub fn track_listing(
    tracks: &[Track],
    meta: &MetaFields,
    is_delta: bool,
    deleted_ids: &[u32],
) -> Node {
    let items: Vec<Node> = tracks
        .iter()
        .map(|track| Node::container(MLIT, meta.nodes_for(track)))
        .collect();
    let count = items.len() as u32;
    let mut children = vec![
        Node::u32(MSTT, 200),
        Node::u8(MUTY, u8::from(is_delta)),
        Node::u32(MTCO, count),
        Node::u32(MRCO, count),
        Node::container(MLCL, items),
    ];
    if is_delta && !deleted_ids.is_empty() {
        children.push(deleted_listing(deleted_ids));
    }
    Node::container(ADBS, children)
}

/// `/databases/{db}/containers` → `aply`. The base playlist rides first
/// with `abpl=1`.
#[must_use]
pub fn playlist_listing(base_name: &str, base_track_count: u32, playlists: &[Playlist]) -> Node {
    let mut items = Vec::with_capacity(playlists.len() + 1);
    items.push(Node::container(
        MLIT,
        vec![
            Node::u32(MIID, BASE_PLAYLIST_ID),
            Node::u64(MPER, u64::from(BASE_PLAYLIST_ID)),
            Node::string(MINM, base_name),
            Node::u32(MIMC, base_track_count),
            Node::u8(ABPL, 1),
        ],
    ));
    for playlist in playlists {
        items.push(Node::container(
            MLIT,
            vec![
                Node::u32(MIID, playlist.id),
                Node::u64(MPER, u64::from(playlist.id)),
                Node::string(MINM, playlist.name.clone()),
                Node::u32(MIMC, playlist.track_ids.len() as u32),
            ],
        ));
    }
    let count = items.len() as u32;
    Node::container(
        APLY,
        vec![
            Node::u32(MSTT, 200),
            Node::u8(MUTY, 0),
            Node::u32(MTCO, count),
            Node::u32(MRCO, count),
            Node::container(MLCL, items),
        ],
    )
}

/// `/databases/{db}/containers/{pl}/items` → `apso`: item id plus
/// container id per entry, with the optional deletion listing on deltas.
#[must_use]
pub fn container_items(
    entries: &[ContainerEntry],
    is_delta: bool,
    deleted_ids: &[u32],
) -> Node {
    let items: Vec<Node> = entries
        .iter()
        .map(|entry| {
            Node::container(
                MLIT,
                vec![
                    Node::u8(MIKD, 2),
                    Node::u32(MIID, entry.item_id),
                    Node::u32(MCTI, entry.container_id),
                ],
            )
        })
        .collect();
    let count = items.len() as u32;
    let mut children = vec![
        Node::u32(MSTT, 200),
        Node::u8(MUTY, u8::from(is_delta)),
        Node::u32(MTCO, count),
        Node::u32(MRCO, count),
        Node::container(MLCL, items),
    ];
    if is_delta && !deleted_ids.is_empty() {
        children.push(deleted_listing(deleted_ids));
    }
    Node::container(APSO, children)
}
