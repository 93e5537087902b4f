//! Request routing.
//!
//! Maps DAAP URL patterns onto handlers, enforcing the protocol's
//! preconditions: everything except `/server-info`, `/content-codes`, and
//! `/login` needs a live session in the `session-id` query parameter, and
//! only `/login` ever checks credentials.
//!
//! Handlers assemble a [`Reply`] synchronously (no lock is held across a
//! suspension point); the single write step at the bottom turns it into
//! bytes.

use std::io;
use std::net::IpAddr;
use std::time::Instant;

use tokio::io::AsyncWrite;

use super::request::Request;
use super::response::ResponseWriter;
use super::Core;
use crate::dmap::{default_bag, Node};
use crate::error::DaapError;
use crate::library::{AudioSource, BASE_PLAYLIST_ID};
use crate::listing::{self, MetaFields};

/// What a handler decided to send.
enum Reply {
    /// A DMAP body; `close` ends the connection after writing.
    Dmap { node: Node, close: bool },
    /// Stream an audio file, honoring the request's range. Always closes.
    Audio { source: AudioSource, offset: u64, mime: &'static str },
    /// Raw image bytes. Always closes.
    Artwork { bytes: Vec<u8>, subtype: String },
    /// Bare 200 with no body, then close (`/logout`).
    OkClose,
    /// 401 with a Basic challenge for the configured realm.
    AuthChallenge,
}

impl Reply {
    fn dmap(node: Node) -> Self {
        Self::Dmap { node, close: false }
    }
}

/// Routes one request and writes the response. Returns whether the
/// connection should close afterwards; transport errors bubble up and
/// abort the connection.
pub(crate) async fn dispatch<W: AsyncWrite + Unpin>(
    core: &Core,
    req: &Request,
    remote: IpAddr,
    out: &mut ResponseWriter<W>,
) -> io::Result<bool> {
    match route(core, req, remote).await {
        Ok(Reply::Dmap { node, close }) => {
            out.write_dmap(&node).await?;
            Ok(close)
        }
        Ok(Reply::Audio { source, offset, mime }) => {
            out.write_file(source, offset, mime, &core.shutdown).await?;
            Ok(true)
        }
        Ok(Reply::Artwork { bytes, subtype }) => {
            out.write_artwork(&bytes, &subtype).await?;
            Ok(true)
        }
        Ok(Reply::OkClose) => {
            out.write_error(200, "").await?;
            Ok(true)
        }
        Ok(Reply::AuthChallenge) => {
            out.write_auth_challenge(&core.config.name).await?;
            Ok(false)
        }
        Err(error) => {
            out.write_error(error.status(), &error.body()).await?;
            Ok(false)
        }
    }
}

async fn route(core: &Core, req: &Request, remote: IpAddr) -> Result<Reply, DaapError> {
    if req.method != "GET" {
        return Err(DaapError::MalformedRequest("only GET is supported".into()));
    }

    let segments: Vec<&str> = req.path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["server-info"] => Ok(Reply::dmap(listing::server_info(&core.config))),
        ["content-codes"] => Ok(Reply::dmap(listing::content_codes(default_bag()))),
        ["login"] => login(core, req, remote),
        rest => {
            let session_id = req.query_u32("session-id");
            if !core.sessions.exists(session_id) {
                return Err(DaapError::Forbidden);
            }
            core.sessions.touch(session_id);

            match rest {
                ["logout"] => {
                    if let Some(session) = core.sessions.logout(session_id) {
                        core.events
                            .user_logout(session.id, session.username.as_deref());
                    }
                    Ok(Reply::OkClose)
                }
                ["update"] => update(core, req).await,
                ["databases"] => {
                    core.events.database_requested(remote);
                    Ok(Reply::dmap(databases(core)))
                }
                ["databases", db, "items"] => track_items(core, req, db),
                ["databases", db, "items", item] => audio(core, req, db, item, remote),
                ["databases", db, "items", item, "extra_data", "artwork"] => {
                    artwork(core, db, item)
                }
                ["databases", db, "containers"] => playlists(core, db),
                ["databases", db, "containers", pl, "items"] => {
                    container_items(core, req, db, pl)
                }
                _ => Err(DaapError::Forbidden),
            }
        }
    }
}

fn login(core: &Core, req: &Request, remote: IpAddr) -> Result<Reply, DaapError> {
    if core.config.password_protected()
        && !core
            .config
            .accepts(req.username.as_deref(), req.password.as_deref())
    {
        return Ok(Reply::AuthChallenge);
    }

    for expired in core.sessions.expire_idle(Instant::now()) {
        core.events
            .user_logout(expired.id, expired.username.as_deref());
    }

    let session_id = core.sessions.login(remote, req.username.clone())?;
    core.events
        .user_login(session_id, req.username.as_deref(), remote);
    Ok(Reply::dmap(listing::login_response(session_id)))
}

async fn update(core: &Core, req: &Request) -> Result<Reply, DaapError> {
    let client_rev = req.query_u32("revision-number");
    let revision = core.revisions.wait_for_update(client_rev).await;
    if core.shutdown.is_cancelled() {
        return Err(DaapError::NotFound);
    }
    Ok(Reply::dmap(listing::update_response(revision)))
}

fn databases(core: &Core) -> Node {
    let track_count = core.library.tracks().len() as u32;
    // adapter playlists plus the base container
    let playlist_count = core.library.playlists().len() as u32 + 1;
    listing::database_listing(
        core.library.database_id(),
        &core.library.database_name(),
        track_count,
        playlist_count,
    )
}

fn track_items(core: &Core, req: &Request, db: &str) -> Result<Reply, DaapError> {
    check_database(core, db)?;
    let delta = req.query_u32("delta");
    let is_delta = delta > 0;
    let deleted = if is_delta {
        core.revisions.deleted_since(delta)
    } else {
        Vec::new()
    };
    let tracks = core.library.tracks();
    let meta = MetaFields::parse(req.query_str("meta"));
    Ok(Reply::dmap(listing::track_listing(
        &tracks, &meta, is_delta, &deleted,
    )))
}

fn audio(
    core: &Core,
    req: &Request,
    db: &str,
    item: &str,
    remote: IpAddr,
) -> Result<Reply, DaapError> {
    check_database(core, db)?;
    let track_id = parse_item_id(item)?;
    let track = core
        .library
        .track(track_id)
        .ok_or_else(|| DaapError::MalformedRequest("unknown track".into()))?;

    core.events.track_requested(track_id, remote);

    let source = core
        .library
        .open_audio(&track)
        .map_err(|_| DaapError::Internal("no file".into()))?;
    Ok(Reply::Audio {
        source,
        offset: req.range_start.unwrap_or(0),
        mime: track.mime_type(),
    })
}

fn artwork(core: &Core, db: &str, item: &str) -> Result<Reply, DaapError> {
    check_database(core, db)?;
    let track_id = parse_item_id(item)?;
    let track = core
        .library
        .track(track_id)
        .ok_or_else(|| DaapError::MalformedRequest("unknown track".into()))?;
    let artwork = core.library.artwork(&track).ok_or(DaapError::NotFound)?;
    Ok(Reply::Artwork {
        bytes: artwork.bytes,
        subtype: artwork.mime_subtype,
    })
}

fn playlists(core: &Core, db: &str) -> Result<Reply, DaapError> {
    check_database(core, db)?;
    let base_count = core.library.tracks().len() as u32;
    let playlists = core.library.playlists();
    Ok(Reply::dmap(listing::playlist_listing(
        &core.library.database_name(),
        base_count,
        &playlists,
    )))
}

fn container_items(core: &Core, req: &Request, db: &str, pl: &str) -> Result<Reply, DaapError> {
    check_database(core, db)?;
    let playlist_id: u32 = pl
        .parse()
        .map_err(|_| DaapError::MalformedRequest("bad playlist id".into()))?;

    let ids: Vec<u32> = if playlist_id == BASE_PLAYLIST_ID {
        core.library.tracks().iter().map(|t| t.id).collect()
    } else {
        core.library
            .playlist(playlist_id)
            .ok_or_else(|| DaapError::MalformedRequest("unknown playlist".into()))?
            .track_ids
    };

    let delta = req.query_u32("delta");
    let is_delta = delta > 0;
    let state = core.containers.get(playlist_id);
    let node = {
        let mut state = state.lock();
        let removed = state.refresh(&ids);
        state.record_deletions(core.revisions.current(), removed);
        let deleted = if is_delta {
            state.deleted_since(delta)
        } else {
            Vec::new()
        };
        listing::container_items(state.entries(), is_delta, &deleted)
    };
    Ok(Reply::dmap(node))
}

fn check_database(core: &Core, db: &str) -> Result<(), DaapError> {
    let id: u32 = db
        .parse()
        .map_err(|_| DaapError::MalformedRequest("bad database id".into()))?;
    if id != core.library.database_id() {
        return Err(DaapError::MalformedRequest("unknown database".into()));
    }
    Ok(())
}

/// Item path segments look like `7.mp3`; the id is the leading digit run.
fn parse_item_id(item: &str) -> Result<u32, DaapError> {
    let digits: &str = {
        let end = item
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(item.len());
        &item[..end]
    };
    digits
        .parse()
        .map_err(|_| DaapError::MalformedRequest("bad track id".into()))
}
