//! Session key namespacing (§4.11, C12).
//!
//! A [`SessionKey`] identifies one `(agent, channel, scope, identifier)`
//! tuple; its canonical string form is what other subsystems use to
//! derive blob keys (e.g. [`get_rag_store_key`]).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Blob key the session registry itself persists under (§6).
pub const SESSION_KEYS_BLOB_KEY: &str = "session_keys";

/// Default inactivity window before a session is eligible for archival
/// (§4.11): one hour.
pub const DEFAULT_MAX_AGE_MS: i64 = 3_600_000;

/// Delivery channel a session originated from (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    /// Local, same-process caller.
    Local,
    /// Telegram bot channel.
    Telegram,
    /// A backend service-to-service call.
    Service,
    /// An interactive guidance/coaching surface.
    Guidance,
    /// An inbound webhook delivery.
    Webhook,
    /// A subagent spawned by the host.
    Subagent,
}

impl Channel {
    fn as_str(self) -> &'static str {
        match self {
            Channel::Local => "LOCAL",
            Channel::Telegram => "TELEGRAM",
            Channel::Service => "SERVICE",
            Channel::Guidance => "GUIDANCE",
            Channel::Webhook => "WEBHOOK",
            Channel::Subagent => "SUBAGENT",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "LOCAL" => Some(Channel::Local),
            "TELEGRAM" => Some(Channel::Telegram),
            "SERVICE" => Some(Channel::Service),
            "GUIDANCE" => Some(Channel::Guidance),
            "WEBHOOK" => Some(Channel::Webhook),
            "SUBAGENT" => Some(Channel::Subagent),
            _ => None,
        }
    }
}

/// Conversational scope a session belongs to (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Scope {
    /// One-on-one direct message.
    Dm,
    /// A multi-party group.
    Group,
    /// A plugin-hosted surface.
    Plugin,
    /// The scheduler's own heartbeat.
    Heartbeat,
    /// A sleep-cycle consolidation run.
    Consolidation,
    /// A cloud-synced session.
    Cloud,
    /// A system/internal session.
    System,
}

impl Scope {
    fn as_str(self) -> &'static str {
        match self {
            Scope::Dm => "DM",
            Scope::Group => "GROUP",
            Scope::Plugin => "PLUGIN",
            Scope::Heartbeat => "HEARTBEAT",
            Scope::Consolidation => "CONSOLIDATION",
            Scope::Cloud => "CLOUD",
            Scope::System => "SYSTEM",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "DM" => Some(Scope::Dm),
            "GROUP" => Some(Scope::Group),
            "PLUGIN" => Some(Scope::Plugin),
            "HEARTBEAT" => Some(Scope::Heartbeat),
            "CONSOLIDATION" => Some(Scope::Consolidation),
            "CLOUD" => Some(Scope::Cloud),
            "SYSTEM" => Some(Scope::System),
            _ => None,
        }
    }
}

/// `(aiId, channel, scope, identifier)` tuple with canonical string form
/// `"{aiId}:{channel}:{scope}:{identifier}"` (§4.11).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Owning agent id.
    pub ai_id: String,
    /// Delivery channel.
    pub channel: Channel,
    /// Conversational scope.
    pub scope: Scope,
    /// Free-form identifier, unique within `(ai_id, channel, scope)`.
    pub identifier: String,
}

impl SessionKey {
    /// Construct a new session key.
    #[must_use]
    pub fn new(ai_id: impl Into<String>, channel: Channel, scope: Scope, identifier: impl Into<String>) -> Self {
        Self {
            ai_id: ai_id.into(),
            channel,
            scope,
            identifier: identifier.into(),
        }
    }

    /// Parse the canonical `"{aiId}:{channel}:{scope}:{identifier}"` form.
    /// Returns `None` if the string has fewer than four colon-separated
    /// fields or an unrecognised channel/scope.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.splitn(4, ':');
        let ai_id = parts.next()?;
        let channel = Channel::parse(parts.next()?)?;
        let scope = Scope::parse(parts.next()?)?;
        let identifier = parts.next()?;
        Some(Self::new(ai_id, channel, scope, identifier))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.ai_id, self.channel.as_str(), self.scope.as_str(), self.identifier)
    }
}

/// Derive the `BlobStore` key a caller should use to namespace a
/// distinct `RagStore` by session (§4.11): `"rag_" + key.replace(':',
/// '_')`.
#[must_use]
pub fn get_rag_store_key(key: &SessionKey) -> String {
    format!("rag_{}", key.to_string().replace(':', "_"))
}

/// Bookkeeping tracked per session (§4.11).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Epoch-millisecond time the session was first seen.
    pub created_at: i64,
    /// Epoch-millisecond time of the most recent activity.
    pub last_active_at: i64,
    /// Number of chunks attributed to this session.
    pub chunk_count: u64,
    /// Total tokens attributed to this session.
    pub total_tokens: u64,
    /// Number of times this session has been accessed.
    pub access_count: u64,
    /// Whether this session has been archived.
    pub archived: bool,
}

/// Tracks every known session by its canonical key string (§4.11).
#[derive(Debug, Clone, Default)]
pub struct SessionManager {
    sessions: HashMap<String, SessionRecord>,
}

impl SessionManager {
    /// Construct an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity on `key` at `now_ms`, creating the record if this
    /// is the first time it has been seen.
    pub fn touch(&mut self, key: &SessionKey, now_ms: i64) -> &SessionRecord {
        let record = self.sessions.entry(key.to_string()).or_insert_with(|| SessionRecord {
            created_at: now_ms,
            last_active_at: now_ms,
            ..Default::default()
        });
        record.last_active_at = now_ms;
        record.access_count += 1;
        record
    }

    /// Current record for `key`, if known.
    #[must_use]
    pub fn get(&self, key: &SessionKey) -> Option<&SessionRecord> {
        self.sessions.get(&key.to_string())
    }

    /// Flag every session inactive for longer than `max_age_ms` as
    /// archived; returns the number newly archived.
    pub fn archive_expired_sessions(&mut self, now_ms: i64, max_age_ms: i64) -> usize {
        let mut archived = 0usize;
        for record in self.sessions.values_mut() {
            if !record.archived && now_ms - record.last_active_at > max_age_ms {
                record.archived = true;
                archived += 1;
            }
        }
        archived
    }

    /// Delete every session already flagged as archived; returns the
    /// number deleted.
    pub fn cleanup_archived_sessions(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, record| !record.archived);
        before - self.sessions.len()
    }

    /// Number of sessions currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Serialise for persistence under [`SESSION_KEYS_BLOB_KEY`].
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError::Serialization`] on encoding
    /// failure.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.sessions)?)
    }

    /// Restore from persisted bytes, replacing any in-memory sessions
    /// (§9: loaders replace rather than append).
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError::CorruptStore`] if `bytes` does
    /// not parse.
    pub fn from_bytes(bytes: &[u8]) -> crate::error::Result<Self> {
        let sessions: HashMap<String, SessionRecord> =
            serde_json::from_slice(bytes).map_err(|e| crate::error::StoreError::CorruptStore {
                key: SESSION_KEYS_BLOB_KEY.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { sessions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_roundtrips_through_parse() {
        let key = SessionKey::new("agent-1", Channel::Telegram, Scope::Dm, "user-42");
        let s = key.to_string();
        assert_eq!(s, "agent-1:TELEGRAM:DM:user-42");
        assert_eq!(SessionKey::parse(&s), Some(key));
    }

    #[test]
    fn rag_store_key_replaces_colons_with_underscores() {
        let key = SessionKey::new("agent-1", Channel::Local, Scope::System, "main");
        assert_eq!(get_rag_store_key(&key), "rag_agent-1_LOCAL_SYSTEM_main");
    }

    #[test]
    fn archive_then_cleanup_removes_inactive_sessions() {
        let mut manager = SessionManager::new();
        let key = SessionKey::new("agent-1", Channel::Local, Scope::Dm, "u1");
        manager.touch(&key, 0);

        let archived = manager.archive_expired_sessions(DEFAULT_MAX_AGE_MS + 1, DEFAULT_MAX_AGE_MS);
        assert_eq!(archived, 1);
        assert!(manager.get(&key).unwrap().archived);

        let deleted = manager.cleanup_archived_sessions();
        assert_eq!(deleted, 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn touch_increments_access_count() {
        let mut manager = SessionManager::new();
        let key = SessionKey::new("agent-1", Channel::Service, Scope::System, "svc");
        manager.touch(&key, 0);
        manager.touch(&key, 10);
        assert_eq!(manager.get(&key).unwrap().access_count, 2);
    }

    #[test]
    fn parse_rejects_unrecognised_channel() {
        assert!(SessionKey::parse("agent-1:BOGUS:DM:u1").is_none());
    }
}
