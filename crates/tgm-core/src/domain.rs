/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Configured forwarding target, before it has been resolved against the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DestinationId {
    Id(ChatId),
    Username(String),
}

impl DestinationId {
    /// Parse `-1001234` style ids or `@name` / `name` usernames.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let digits = raw.strip_prefix('-').unwrap_or(raw);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return raw.parse::<i64>().ok().map(|id| Self::Id(ChatId(id)));
        }
        let name = raw.strip_prefix('@').unwrap_or(raw);
        if name.is_empty() {
            return None;
        }
        Some(Self::Username(name.to_string()))
    }
}

impl std::fmt::Display for DestinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id.0),
            Self::Username(name) => write!(f, "@{name}"),
        }
    }
}

/// A chat or account as seen by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entity {
    Channel {
        id: ChatId,
        title: Option<String>,
        username: Option<String>,
    },
    Group {
        id: ChatId,
        title: Option<String>,
        username: Option<String>,
    },
    User {
        id: ChatId,
        first_name: Option<String>,
        last_name: Option<String>,
        username: Option<String>,
    },
}

impl Entity {
    pub fn id(&self) -> ChatId {
        match self {
            Self::Channel { id, .. } | Self::Group { id, .. } | Self::User { id, .. } => *id,
        }
    }

    /// Human-readable name for logs: title, then full name, then `@username`, then the id.
    pub fn display_name(&self) -> String {
        let named = match self {
            Self::Channel { title, .. } | Self::Group { title, .. } => {
                title.as_deref().map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
            }
            Self::User {
                first_name,
                last_name,
                ..
            } => {
                let full = format!(
                    "{} {}",
                    first_name.as_deref().unwrap_or(""),
                    last_name.as_deref().unwrap_or("")
                );
                let full = full.trim();
                (!full.is_empty()).then(|| full.to_string())
            }
        };
        if let Some(name) = named {
            return sanitize_name(&name);
        }
        let username = match self {
            Self::Channel { username, .. }
            | Self::Group { username, .. }
            | Self::User { username, .. } => username.as_deref(),
        };
        match username.filter(|u| !u.is_empty()) {
            Some(u) => format!("@{}", sanitize_name(u)),
            None => self.id().0.to_string(),
        }
    }
}

fn sanitize_name(s: &str) -> String {
    s.chars().filter(|c| !c.is_control()).collect()
}
