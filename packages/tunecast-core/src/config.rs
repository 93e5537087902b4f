//! Server configuration.
//!
//! [`ServerConfig`] is the single knob set the core recognizes. The binary
//! layers YAML and environment overrides on top; embedders fill it directly.

use serde::{Deserialize, Serialize};

/// Default DAAP port registered with IANA.
pub const DEFAULT_PORT: u16 = 3689;

/// Default idle session expiry, seconds.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30 * 60;

/// How clients must authenticate at `/login`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Open share; credentials are accepted unconditionally.
    #[default]
    None,
    /// Any configured credential with a matching password passes,
    /// regardless of the username offered.
    Password,
    /// Username and password must both match one credential.
    UserAndPassword,
}

/// One accepted login. A `username` of `None` matches any user when the
/// auth method is [`AuthMethod::Password`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub username: Option<String>,
    pub password: String,
}

/// Configuration for a DAAP share.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Display name; doubles as the Basic-auth realm and the mDNS
    /// instance name.
    pub name: String,

    /// Preferred TCP port. 0 asks the OS for an ephemeral port; whatever
    /// actually binds is what gets advertised.
    pub port: u16,

    /// How `/login` validates credentials.
    pub auth_method: AuthMethod,

    /// Accepted credentials; unused when `auth_method` is `none`.
    pub credentials: Vec<Credential>,

    /// Maximum concurrent sessions. 0 means unlimited; past the cap,
    /// `/login` answers 503.
    pub max_users: usize,

    /// Advertise the share over mDNS.
    pub publish: bool,

    /// Optional `Machine ID` TXT field on the mDNS record.
    pub machine_id: Option<String>,

    /// Idle session expiry, seconds.
    pub session_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "Tunecast".to_string(),
            port: DEFAULT_PORT,
            auth_method: AuthMethod::None,
            credentials: Vec::new(),
            max_users: 0,
            publish: true,
            machine_id: None,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.auth_method != AuthMethod::None && self.credentials.is_empty() {
            return Err(format!(
                "auth_method {:?} requires at least one credential",
                self.auth_method
            ));
        }
        if self.session_timeout_secs == 0 {
            return Err("session_timeout_secs must be >= 1".to_string());
        }
        Ok(())
    }

    /// Whether the share requires a password, as advertised in the TXT
    /// record and in `/server-info`.
    #[must_use]
    pub fn password_protected(&self) -> bool {
        self.auth_method != AuthMethod::None
    }

    /// Checks an offered credential pair against the configuration.
    #[must_use]
    pub fn accepts(&self, username: Option<&str>, password: Option<&str>) -> bool {
        match self.auth_method {
            AuthMethod::None => true,
            AuthMethod::Password => {
                let Some(password) = password else { return false };
                self.credentials.iter().any(|c| c.password == password)
            }
            AuthMethod::UserAndPassword => {
                let (Some(username), Some(password)) = (username, password) else {
                    return false;
                };
                self.credentials
                    .iter()
                    .any(|c| c.username.as_deref() == Some(username) && c.password == password)
            }
        }
    }
}
