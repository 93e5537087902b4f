//! Server event notifications.
//!
//! Embedders observe session and request activity through the
//! [`ServerEvents`] trait rather than by hooking the router. Handlers run
//! inline on the serving task and must not block; they cannot fail a
//! response.

use std::net::IpAddr;

/// Trait for observing server activity without knowledge of the transport.
pub trait ServerEvents: Send + Sync {
    /// A session was issued at `/login`.
    fn user_login(&self, session_id: u32, username: Option<&str>, remote: IpAddr);

    /// A session ended, either via `/logout` or idle expiry.
    fn user_logout(&self, session_id: u32, username: Option<&str>);

    /// A client started streaming a track.
    fn track_requested(&self, track_id: u32, remote: IpAddr);

    /// A client fetched the database listing.
    fn database_requested(&self, remote: IpAddr);

    /// The advertised share name collided with another host on the
    /// network. The server re-registers under a derived name; observers
    /// may want to persist a better one.
    fn name_collision(&self, name: &str);
}

/// Discards all events.
pub struct NoopEvents;

impl ServerEvents for NoopEvents {
    fn user_login(&self, _session_id: u32, _username: Option<&str>, _remote: IpAddr) {}
    fn user_logout(&self, _session_id: u32, _username: Option<&str>) {}
    fn track_requested(&self, _track_id: u32, _remote: IpAddr) {}
    fn database_requested(&self, _remote: IpAddr) {}
    fn name_collision(&self, _name: &str) {}
}

/// Logs all events; the default for the standalone server.
pub struct LoggingEvents;

impl ServerEvents for LoggingEvents {
    fn user_login(&self, session_id: u32, username: Option<&str>, remote: IpAddr) {
        log::info!(
            "[Events] login: session={} user={} remote={}",
            session_id,
            username.unwrap_or("-"),
            remote
        );
    }

    fn user_logout(&self, session_id: u32, username: Option<&str>) {
        log::info!(
            "[Events] logout: session={} user={}",
            session_id,
            username.unwrap_or("-")
        );
    }

    fn track_requested(&self, track_id: u32, remote: IpAddr) {
        log::info!("[Events] track {} requested by {}", track_id, remote);
    }

    fn database_requested(&self, remote: IpAddr) {
        log::debug!("[Events] database listing requested by {}", remote);
    }

    fn name_collision(&self, name: &str) {
        log::warn!("[Events] share name '{}' is already taken on this network", name);
    }
}
