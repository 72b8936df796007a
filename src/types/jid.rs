use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const SERVER_JID: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const LEGACY_USER_SERVER: &str = "c.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const HIDDEN_USER_SERVER: &str = "lid";
pub const STATUS_BROADCAST_USER: &str = "status";

pub type MessageId = String;

#[derive(Debug, Error)]
pub enum JidError {
    #[error("Invalid JID format: {0}")]
    InvalidFormat(String),
    #[error("Failed to parse component: {0}")]
    Parse(#[from] std::num::ParseIntError),
}

/// Jabber-style identifier `user[.agent][:device]@server`.
///
/// `c.us` is a legacy alias of `s.whatsapp.net`; [`Jid::normalized`]
/// collapses it so cache keys and fanout sets agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    pub user: String,
    pub server: String,
    pub agent: u8,
    pub device: u16,
}

/// A user/device pair, the unit of Signal session addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JidWithDevice {
    pub user: String,
    pub device: u16,
}

impl Jid {
    pub fn new(user: &str, server: &str) -> Self {
        Self {
            user: user.to_string(),
            server: server.to_string(),
            ..Default::default()
        }
    }

    pub fn server_jid() -> Self {
        Jid::new("", SERVER_JID)
    }

    /// Strips agent/device, keeping the bare user@server form.
    pub fn to_non_ad(&self) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server.clone(),
            ..Default::default()
        }
    }

    /// Maps legacy servers onto their canonical names.
    pub fn normalized(mut self) -> Self {
        if self.server == LEGACY_USER_SERVER {
            self.server = DEFAULT_USER_SERVER.to_string();
        }
        self
    }

    pub fn with_device(&self, device: u16) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server.clone(),
            agent: self.agent,
            device,
        }
    }

    pub fn to_device_pair(&self) -> JidWithDevice {
        JidWithDevice {
            user: self.user.clone(),
            device: self.device,
        }
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_broadcast_list(&self) -> bool {
        self.server == BROADCAST_SERVER && self.user != STATUS_BROADCAST_USER
    }

    pub fn is_ad(&self) -> bool {
        self.device > 0
            && (self.server == DEFAULT_USER_SERVER || self.server == HIDDEN_USER_SERVER)
    }

    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
    }

    pub fn is_same_user_as(&self, other: &Jid) -> bool {
        self.user == other.user
    }

    /// Signal protocol address string, `user.device`.
    pub fn signal_address(&self) -> String {
        format!("{}.{}", self.user, self.device)
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user_part, server) = match s.split_once('@') {
            Some((u, s)) => (u, s.to_string()),
            None => ("", s.to_string()),
        };

        if user_part.is_empty() {
            return Ok(Jid::new("", &server));
        }

        let (user_base, device_str) = match user_part.rsplit_once(':') {
            Some((u, d)) => (u, Some(d)),
            None => (user_part, None),
        };

        let (user, agent_str) = match user_base.rsplit_once('.') {
            Some((u, a)) => (u, Some(a)),
            None => (user_base, None),
        };

        let agent = match agent_str {
            Some(a) => a.parse()?,
            None => 0,
        };
        let device = match device_str {
            Some(d) => d.parse()?,
            None => 0,
        };

        Ok(Jid {
            user: user.to_string(),
            server,
            agent,
            device,
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}", self.server)
        } else {
            write!(f, "{}", self.user)?;
            if self.agent > 0 {
                write!(f, ".{}", self.agent)?;
            }
            if self.device > 0 {
                write!(f, ":{}", self.device)?;
            }
            write!(f, "@{}", self.server)
        }
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Jid::from_str(&value)
    }
}
