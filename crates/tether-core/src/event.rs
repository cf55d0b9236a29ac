// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain events and the closed set of event categories webhooks subscribe to.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::error::TetherError;
use crate::types::{SessionId, SessionStatus};

/// Category of a domain event, as seen on the wire in `X-Event`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
pub enum EventCategory {
    #[strum(serialize = "session.initializing")]
    #[serde(rename = "session.initializing")]
    SessionInitializing,
    #[strum(serialize = "session.qr")]
    #[serde(rename = "session.qr")]
    SessionQr,
    #[strum(serialize = "session.authenticated")]
    #[serde(rename = "session.authenticated")]
    SessionAuthenticated,
    #[strum(serialize = "session.connected")]
    #[serde(rename = "session.connected")]
    SessionConnected,
    #[strum(serialize = "session.disconnected")]
    #[serde(rename = "session.disconnected")]
    SessionDisconnected,
    #[strum(serialize = "session.failed")]
    #[serde(rename = "session.failed")]
    SessionFailed,
    #[strum(serialize = "session.logged_out")]
    #[serde(rename = "session.logged_out")]
    SessionLoggedOut,
    #[strum(serialize = "message.received")]
    #[serde(rename = "message.received")]
    MessageReceived,
    #[strum(serialize = "message.sent")]
    #[serde(rename = "message.sent")]
    MessageSent,
    #[strum(serialize = "message.ack")]
    #[serde(rename = "message.ack")]
    MessageAck,
    #[strum(serialize = "webhook.test")]
    #[serde(rename = "webhook.test")]
    WebhookTest,
}

impl EventCategory {
    /// The category published when a session enters `status`.
    pub fn for_status(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Initializing => EventCategory::SessionInitializing,
            SessionStatus::QrReady => EventCategory::SessionQr,
            SessionStatus::Authenticating => EventCategory::SessionAuthenticated,
            SessionStatus::Connected => EventCategory::SessionConnected,
            SessionStatus::Disconnected => EventCategory::SessionDisconnected,
            SessionStatus::Failed => EventCategory::SessionFailed,
            SessionStatus::LoggedOut => EventCategory::SessionLoggedOut,
        }
    }
}

/// Token accepted in place of a category list to subscribe to everything.
pub const WILDCARD: &str = "*";

/// Normalized set of categories a webhook subscribes to. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub enum CategorySet {
    All,
    Only(BTreeSet<EventCategory>),
}

impl CategorySet {
    /// Normalizes raw category names.
    ///
    /// `*` or `all` anywhere in the list yields [`CategorySet::All`]. Unknown
    /// names and empty lists are rejected.
    pub fn parse<I, S>(names: I) -> Result<Self, TetherError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        let mut wildcard = false;
        for name in names {
            let name = name.as_ref().trim();
            if name == WILDCARD || name.eq_ignore_ascii_case("all") {
                wildcard = true;
                continue;
            }
            let category = EventCategory::from_str(name).map_err(|_| {
                TetherError::InvalidArgument(format!("unknown event category `{name}`"))
            })?;
            set.insert(category);
        }

        if wildcard {
            return Ok(CategorySet::All);
        }
        if set.is_empty() {
            return Err(TetherError::InvalidArgument(
                "webhook must subscribe to at least one event category".to_string(),
            ));
        }
        Ok(CategorySet::Only(set))
    }

    pub fn contains(&self, category: EventCategory) -> bool {
        match self {
            CategorySet::All => true,
            CategorySet::Only(set) => set.contains(&category),
        }
    }

    /// Expands the set into concrete categories (the wildcard expands to every category).
    pub fn categories(&self) -> Vec<EventCategory> {
        match self {
            CategorySet::All => EventCategory::iter().collect(),
            CategorySet::Only(set) => set.iter().copied().collect(),
        }
    }
}

impl TryFrom<Vec<String>> for CategorySet {
    type Error = TetherError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        CategorySet::parse(value)
    }
}

impl From<CategorySet> for Vec<String> {
    fn from(value: CategorySet) -> Self {
        match value {
            CategorySet::All => vec![WILDCARD.to_string()],
            CategorySet::Only(set) => set.into_iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// An immutable fact produced once per occurrence by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: String,
    pub session_id: SessionId,
    pub category: EventCategory,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl DomainEvent {
    pub fn new(session_id: SessionId, category: EventCategory, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            category,
            occurred_at: Utc::now(),
            payload,
        }
    }
}
