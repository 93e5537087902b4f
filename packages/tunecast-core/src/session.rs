//! Session issuance and expiry.
//!
//! A session is created at `/login`, touched by every authenticated
//! request, and dies at `/logout` or after sitting idle past the timeout.
//! Ids are random positive 31-bit integers, which is what DAAP clients
//! echo back in the `session-id` query parameter.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use crate::error::DaapError;

/// One live session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: u32,
    pub remote: IpAddr,
    pub username: Option<String>,
    last_action: Instant,
}

/// Tracks live sessions under a single lock; reads included, so a login on
/// one connection and a lookup on another always agree.
pub struct SessionManager {
    sessions: Mutex<HashMap<u32, Session>>,
    timeout: Duration,
    max_users: usize,
}

impl SessionManager {
    /// Creates a manager. `max_users` of 0 means unlimited.
    #[must_use]
    pub fn new(timeout: Duration, max_users: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout,
            max_users,
        }
    }

    /// Issues a new session, or `TooManyUsers` past the cap.
    pub fn login(
        &self,
        remote: IpAddr,
        username: Option<String>,
    ) -> Result<u32, DaapError> {
        let mut sessions = self.sessions.lock();
        if self.max_users > 0 && sessions.len() >= self.max_users {
            return Err(DaapError::TooManyUsers);
        }
        let mut rng = rand::rng();
        let id = loop {
            let candidate: u32 = rng.random_range(1..=i32::MAX as u32);
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        sessions.insert(
            id,
            Session {
                id,
                remote,
                username,
                last_action: Instant::now(),
            },
        );
        Ok(id)
    }

    /// Refreshes a session's idle clock. No-op for unknown ids.
    pub fn touch(&self, id: u32) {
        if let Some(session) = self.sessions.lock().get_mut(&id) {
            session.last_action = Instant::now();
        }
    }

    /// Removes a session, returning it if it existed.
    pub fn logout(&self, id: u32) -> Option<Session> {
        self.sessions.lock().remove(&id)
    }

    /// Removes every session idle longer than the timeout as of `now` and
    /// returns them so the caller can emit logout events.
    pub fn expire_idle(&self, now: Instant) -> Vec<Session> {
        let mut sessions = self.sessions.lock();
        let expired: Vec<u32> = sessions
            .values()
            .filter(|s| now.duration_since(s.last_action) > self.timeout)
            .map(|s| s.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| sessions.remove(&id))
            .collect()
    }

    /// Whether a session id is live.
    #[must_use]
    pub fn exists(&self, id: u32) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn remote() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50))
    }

    fn manager(max_users: usize) -> SessionManager {
        SessionManager::new(Duration::from_secs(1800), max_users)
    }

    #[test]
    fn login_issues_positive_31_bit_ids() {
        let sessions = manager(0);
        for _ in 0..32 {
            let id = sessions.login(remote(), None).unwrap();
            assert!(id >= 1);
            assert!(id <= i32::MAX as u32);
        }
        assert_eq!(sessions.count(), 32);
    }

    #[test]
    fn login_then_logout_restores_count() {
        let sessions = manager(0);
        let before = sessions.count();
        let id = sessions.login(remote(), Some("anna".into())).unwrap();
        assert!(sessions.exists(id));
        let removed = sessions.logout(id).unwrap();
        assert_eq!(removed.username.as_deref(), Some("anna"));
        assert_eq!(sessions.count(), before);
        assert!(!sessions.exists(id));
    }

    #[test]
    fn cap_rejects_past_max_users() {
        let sessions = manager(1);
        sessions.login(remote(), None).unwrap();
        assert!(matches!(
            sessions.login(remote(), None),
            Err(DaapError::TooManyUsers)
        ));
    }

    #[test]
    fn cap_of_three_rejects_the_fourth_login() {
        let sessions = manager(3);
        for _ in 0..3 {
            sessions.login(remote(), None).unwrap();
        }
        assert!(matches!(
            sessions.login(remote(), None),
            Err(DaapError::TooManyUsers)
        ));
        assert_eq!(sessions.count(), 3);
    }

    #[test]
    fn zero_cap_is_unlimited() {
        let sessions = manager(0);
        for _ in 0..8 {
            sessions.login(remote(), None).unwrap();
        }
        assert_eq!(sessions.count(), 8);
    }

    #[test]
    fn idle_sessions_expire_after_timeout() {
        let sessions = manager(0);
        let id = sessions.login(remote(), Some("anna".into())).unwrap();

        // not idle yet
        assert!(sessions.expire_idle(Instant::now()).is_empty());
        assert!(sessions.exists(id));

        let expired = sessions.expire_idle(Instant::now() + Duration::from_secs(3600));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, id);
        assert_eq!(expired[0].username.as_deref(), Some("anna"));
        assert!(!sessions.exists(id));
    }

    #[test]
    fn touch_unknown_session_is_a_noop() {
        let sessions = manager(0);
        sessions.touch(12345);
        assert_eq!(sessions.count(), 0);
    }
}
