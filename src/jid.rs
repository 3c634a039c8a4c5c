use std::fmt;
use std::str::FromStr;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const LEGACY_USER_SERVER: &str = "c.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const HIDDEN_USER_SERVER: &str = "lid";
pub const NEWSLETTER_SERVER: &str = "newsletter";
pub const STATUS_BROADCAST_USER: &str = "status";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JidError {
    InvalidFormat(String),
    Parse(std::num::ParseIntError),
}

impl fmt::Display for JidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JidError::InvalidFormat(s) => write!(f, "Invalid JID format: {s}"),
            JidError::Parse(e) => write!(f, "Failed to parse component: {e}"),
        }
    }
}

impl std::error::Error for JidError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JidError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::num::ParseIntError> for JidError {
    fn from(err: std::num::ParseIntError) -> Self {
        JidError::Parse(err)
    }
}

/// A WhatsApp address: `user[.agent][:device]@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Jid {
    pub user: String,
    pub server: String,
    pub agent: u8,
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

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    /// Any broadcast address, including the status broadcast.
    pub fn is_broadcast(&self) -> bool {
        self.server == BROADCAST_SERVER
    }

    pub fn is_status_broadcast(&self) -> bool {
        self.is_broadcast() && self.user == STATUS_BROADCAST_USER
    }

    pub fn is_newsletter(&self) -> bool {
        self.server == NEWSLETTER_SERVER
    }

    /// A one-to-one chat with a person, addressed by phone number or LID.
    pub fn is_individual(&self) -> bool {
        !self.user.is_empty()
            && matches!(
                self.server.as_str(),
                DEFAULT_USER_SERVER | LEGACY_USER_SERVER | HIDDEN_USER_SERVER
            )
    }

    pub fn to_non_ad(&self) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server.clone(),
            ..Default::default()
        }
    }
}

impl FromStr for Jid {
    type Err = JidError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(JidError::InvalidFormat(s.to_string()));
        }

        let (user_part, server) = match s.split_once('@') {
            Some((u, srv)) => (u, srv.to_string()),
            None => ("", s.to_string()),
        };

        if server.is_empty() {
            return Err(JidError::InvalidFormat(s.to_string()));
        }

        if user_part.is_empty() {
            return Ok(Jid::new("", &server));
        }

        // LID users may contain dots that are part of the identity.
        if server == HIDDEN_USER_SERVER {
            let (user, device) = match user_part.rsplit_once(':') {
                Some((u, d)) => (u, d.parse()?),
                None => (user_part, 0),
            };
            return Ok(Jid {
                user: user.to_string(),
                server,
                device,
                agent: 0,
            });
        }

        let mut user = user_part;
        let mut device = 0;
        let mut agent = 0;

        if let Some((u, d)) = user_part.rsplit_once(':') {
            user = u;
            device = d.parse()?;
        }
        if let Some((u, last)) = user.rsplit_once('.')
            && let Ok(num) = last.parse::<u8>()
        {
            user = u;
            agent = num;
        }

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

/// Builds the user JID for a phone number. Formatting characters are dropped
/// and values that already carry a server are returned unchanged.
pub fn phone_number_to_jid(phone: &str) -> String {
    if phone.contains('@') {
        return phone.to_string();
    }
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    format!("{digits}@{DEFAULT_USER_SERVER}")
}

/// Unparseable addresses are treated as non-individual.
pub fn is_individual_jid(jid: &str) -> bool {
    jid.parse::<Jid>().is_ok_and(|j| j.is_individual())
}

pub fn is_group_jid(jid: &str) -> bool {
    jid.parse::<Jid>().is_ok_and(|j| j.is_group())
}

pub fn is_jid_broadcast(jid: &str) -> bool {
    jid.parse::<Jid>().is_ok_and(|j| j.is_broadcast())
}
