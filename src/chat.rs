use crate::entity::{Sender, UserProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    Closed,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Waiting => 0,
            SessionStatus::Active => 1,
            SessionStatus::Closed => 2,
        }
    }

    /// Status only moves forward; `closed` is terminal.
    pub fn can_become(self, next: SessionStatus) -> bool {
        next.rank() >= self.rank()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

/// Status selector used by listing endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Waiting,
    Active,
    Closed,
}

impl StatusFilter {
    pub fn matches(self, status: SessionStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Waiting => status == SessionStatus::Waiting,
            StatusFilter::Active => status == SessionStatus::Active,
            StatusFilter::Closed => status == SessionStatus::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
}

/// A message as submitted, before the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub text: String,
    pub sender: Sender,
    pub status: MessageStatus,
}

impl NewMessage {
    pub fn new(text: impl Into<String>, sender: Sender) -> Self {
        Self {
            text: text.into(),
            sender,
            status: MessageStatus::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub profile: UserProfile,
    pub messages: Vec<Message>,
    pub status: SessionStatus,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, profile: UserProfile) -> Self {
        let now = Utc::now();
        Self {
            id: format!("ses_{}", Uuid::new_v4().simple()),
            user_id: user_id.into(),
            profile,
            messages: Vec::new(),
            status: SessionStatus::Waiting,
            last_activity: now,
            created_at: now,
        }
    }

    /// Appends a message. A user message wakes a waiting session.
    pub(crate) fn append(&mut self, new: NewMessage) -> Message {
        let message = Message {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            text: new.text,
            sender: new.sender,
            timestamp: Utc::now(),
            status: new.status,
        };
        self.messages.push(message.clone());
        if new.sender == Sender::User && self.status == SessionStatus::Waiting {
            self.status = SessionStatus::Active;
        }
        self.touch();
        message
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total: usize,
    pub waiting: usize,
    pub active: usize,
    pub closed: usize,
}

impl SessionStats {
    pub fn count<'a>(sessions: impl IntoIterator<Item = &'a Session>) -> Self {
        sessions
            .into_iter()
            .fold(Self::default(), |mut stats, session| {
                stats.total += 1;
                match session.status {
                    SessionStatus::Waiting => stats.waiting += 1,
                    SessionStatus::Active => stats.active += 1,
                    SessionStatus::Closed => stats.closed += 1,
                }
                stats
            })
    }
}

/// Body of `GET /chat/sessions`, shared by the server and the polling client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub sessions: Vec<Session>,
    pub stats: SessionStats,
}
