use std::fmt;

use serde::Deserialize;

const BRANCH_PREFIX: &str = "refs/heads/";
const TAG_PREFIX: &str = "refs/tags/";

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub owner: User,
}

/// A Git reference as sent by GitHub, either fully qualified
/// (`refs/heads/main`) or short (`main`, in create/delete events).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Reference(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Branch,
    Tag,
    Other,
}

impl Reference {
    pub fn is_branch(&self) -> bool {
        self.0.starts_with(BRANCH_PREFIX)
    }

    pub fn is_tag(&self) -> bool {
        self.0.starts_with(TAG_PREFIX)
    }

    pub fn kind(&self) -> RefKind {
        if self.is_branch() {
            RefKind::Branch
        } else if self.is_tag() {
            RefKind::Tag
        } else {
            RefKind::Other
        }
    }

    /// Branch or tag name without the `refs/<kind>/` prefix.
    pub fn name(&self) -> &str {
        self.0
            .strip_prefix(BRANCH_PREFIX)
            .or_else(|| self.0.strip_prefix(TAG_PREFIX))
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Repository,
    Branch,
    Tag,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    pub id: String,
    #[serde(default)]
    pub message: String,
}

/// Git identity of whoever pushed; not necessarily a GitHub account.
#[derive(Debug, Clone, Deserialize)]
pub struct Pusher {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub reference: Reference,
    #[serde(default)]
    pub before: String,
    #[serde(default)]
    pub after: String,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub head_commit: Option<Commit>,
    pub repository: Repository,
    pub sender: User,
    #[serde(default)]
    pub pusher: Option<Pusher>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEvent {
    #[serde(rename = "ref")]
    pub reference: Reference,
    pub ref_type: RefType,
    #[serde(default)]
    pub master_branch: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub repository: Repository,
    pub sender: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteEvent {
    #[serde(rename = "ref")]
    pub reference: Reference,
    pub ref_type: RefType,
    pub repository: Repository,
    pub sender: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    #[serde(default)]
    pub zen: Option<String>,
    #[serde(default)]
    pub hook_id: Option<u64>,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    pub sender: Option<User>,
}

#[derive(Debug, Clone)]
pub enum Event {
    Push(PushEvent),
    Create(CreateEvent),
    Delete(DeleteEvent),
    Ping(PingEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Push(_) => EventKind::Push,
            Event::Create(_) => EventKind::Create,
            Event::Delete(_) => EventKind::Delete,
            Event::Ping(_) => EventKind::Ping,
        }
    }

    pub fn repository(&self) -> Option<&Repository> {
        match self {
            Event::Push(ev) => Some(&ev.repository),
            Event::Create(ev) => Some(&ev.repository),
            Event::Delete(ev) => Some(&ev.repository),
            Event::Ping(ev) => ev.repository.as_ref(),
        }
    }

    pub fn sender(&self) -> Option<&User> {
        match self {
            Event::Push(ev) => Some(&ev.sender),
            Event::Create(ev) => Some(&ev.sender),
            Event::Delete(ev) => Some(&ev.sender),
            Event::Ping(ev) => ev.sender.as_ref(),
        }
    }
}

/// Value of the `X-GitHub-Event` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Push,
    Create,
    Delete,
    Ping,
}

impl EventKind {
    pub fn from_header(value: &str) -> Option<Self> {
        match value {
            "push" => Some(Self::Push),
            "create" => Some(Self::Create),
            "delete" => Some(Self::Delete),
            "ping" => Some(Self::Ping),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Ping => "ping",
        }
    }

    pub fn parse(self, body: &[u8]) -> Result<Event, serde_json::Error> {
        Ok(match self {
            Self::Push => Event::Push(serde_json::from_slice(body)?),
            Self::Create => Event::Create(serde_json::from_slice(body)?),
            Self::Delete => Event::Delete(serde_json::from_slice(body)?),
            Self::Ping => Event::Ping(serde_json::from_slice(body)?),
        })
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::json;

    pub fn push(reference: &str) -> Vec<u8> {
        json!({
            "ref": reference,
            "before": "0000000000000000000000000000000000000000",
            "after": "6113728f27ae82c7b1a177c8d03f9e96e0adf246",
            "created": true,
            "deleted": false,
            "forced": false,
            "head_commit": {
                "id": "6113728f27ae82c7b1a177c8d03f9e96e0adf246",
                "message": "Initial commit",
                "timestamp": "2024-01-01T00:00:00Z"
            },
            "repository": {
                "id": 1296269,
                "name": "widgets",
                "full_name": "acme/widgets",
                "owner": { "login": "acme", "id": 1 },
                "private": false
            },
            "pusher": { "name": "octocat", "email": "octocat@example.com" },
            "sender": { "login": "octocat", "id": 2 }
        })
        .to_string()
        .into_bytes()
    }

    pub fn create(reference: &str, ref_type: &str) -> Vec<u8> {
        json!({
            "ref": reference,
            "ref_type": ref_type,
            "master_branch": "main",
            "description": null,
            "repository": {
                "name": "widgets",
                "full_name": "acme/widgets",
                "owner": { "login": "acme" }
            },
            "sender": { "login": "octocat" }
        })
        .to_string()
        .into_bytes()
    }

    pub fn delete(reference: &str, ref_type: &str) -> Vec<u8> {
        json!({
            "ref": reference,
            "ref_type": ref_type,
            "repository": {
                "name": "widgets",
                "full_name": "acme/widgets",
                "owner": { "login": "acme" }
            },
            "sender": { "login": "octocat" }
        })
        .to_string()
        .into_bytes()
    }

    pub fn ping() -> Vec<u8> {
        json!({
            "zen": "Keep it logically awesome.",
            "hook_id": 42,
            "hook": { "type": "Repository", "id": 42, "active": true },
            "repository": {
                "name": "widgets",
                "full_name": "acme/widgets",
                "owner": { "login": "acme" }
            },
            "sender": { "login": "octocat" }
        })
        .to_string()
        .into_bytes()
    }
}
