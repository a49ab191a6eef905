//! Queued creation events and job envelopes.
//!
//! The producer enqueues Sidekiq-compatible JSON envelopes:
//!
//! ```text
//! {"class":"ChatsCreatorJob","args":[{...payload...}],"retry":true,
//!  "queue":"chats_creation_queue","jid":"<24 hex>",
//!  "created_at":"...","enqueued_at":"..."}
//! ```
//!
//! The payload in `args[0]` is a [`ChatCreated`] or [`MessageCreated`].

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::{CoreError, Result};
use crate::token::ApplicationToken;

/// Job class for chat creation.
pub const CHATS_CREATOR_CLASS: &str = "ChatsCreatorJob";
/// Job class for message creation.
pub const MESSAGE_CREATOR_CLASS: &str = "MessageCreatorJob";
/// Queue carrying chat-creation jobs.
pub const CHATS_CREATION_QUEUE: &str = "chats_creation_queue";
/// Queue carrying message-creation jobs.
pub const MESSAGES_CREATION_QUEUE: &str = "messages_creation_queue";

const JID_BYTES: usize = 12;

/// A chat was accepted by the producer and must be persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCreated {
    /// Owning application.
    pub application_token: ApplicationToken,
    /// Chat number assigned by the producer.
    pub number: i64,
    /// Producer-defined free text; unparseable values fall back to processing time.
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: String,
}

/// A message was accepted by the producer and must be persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCreated {
    /// Owning application.
    pub application_token: ApplicationToken,
    /// Chat the message belongs to.
    pub chat_number: i64,
    /// Message number within the chat.
    pub number: i64,
    /// Message text; must not be blank.
    pub body: String,
    /// Producer-defined free text, as for chats.
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: String,
}

/// A decoded job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobKind {
    /// `ChatsCreatorJob` on `chats_creation_queue`.
    CreateChat(ChatCreated),
    /// `MessageCreatorJob` on `messages_creation_queue`.
    CreateMessage(MessageCreated),
}

impl JobKind {
    /// Job class name on the wire.
    pub fn class(&self) -> &'static str {
        match self {
            Self::CreateChat(_) => CHATS_CREATOR_CLASS,
            Self::CreateMessage(_) => MESSAGE_CREATOR_CLASS,
        }
    }

    /// Queue the job is routed to.
    pub fn queue(&self) -> &'static str {
        match self {
            Self::CreateChat(_) => CHATS_CREATION_QUEUE,
            Self::CreateMessage(_) => MESSAGES_CREATION_QUEUE,
        }
    }
}

/// Wire envelope around a job payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Job class used for routing.
    pub class: String,
    /// Positional job arguments; the payload is the first.
    pub args: Vec<Value>,
    /// Whether failed attempts are retried.
    #[serde(default = "default_retry")]
    pub retry: bool,
    /// Queue name the producer targeted.
    pub queue: String,
    /// 24 lowercase hex characters, unique per job.
    pub jid: String,
    /// Producer-side creation time, kept as sent.
    #[serde(default)]
    pub created_at: Option<Value>,
    /// Producer-side enqueue time, kept as sent.
    #[serde(default)]
    pub enqueued_at: Option<Value>,
}

fn default_retry() -> bool {
    true
}

impl JobEnvelope {
    /// Wrap a job in a fresh envelope.
    pub fn new(job: &JobKind) -> Result<Self> {
        let payload = match job {
            JobKind::CreateChat(p) => serde_json::to_value(p)?,
            JobKind::CreateMessage(p) => serde_json::to_value(p)?,
        };
        let now = Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true));
        Ok(Self {
            class: job.class().to_string(),
            args: vec![payload],
            retry: true,
            queue: job.queue().to_string(),
            jid: generate_jid(),
            created_at: Some(now.clone()),
            enqueued_at: Some(now),
        })
    }

    /// Parse an envelope from its JSON text.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Serialize as a single JSON line.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Map the envelope to a known job.
    pub fn decode(&self) -> Result<JobKind> {
        let payload = self
            .args
            .first()
            .cloned()
            .ok_or_else(|| CoreError::Envelope(format!("{} has no args", self.jid)))?;
        match self.class.as_str() {
            CHATS_CREATOR_CLASS => Ok(JobKind::CreateChat(serde_json::from_value(payload)?)),
            MESSAGE_CREATOR_CLASS => Ok(JobKind::CreateMessage(serde_json::from_value(payload)?)),
            other => Err(CoreError::Envelope(format!("unknown class {other}"))),
        }
    }
}

/// Random job id: 24 lowercase hex characters.
pub fn generate_jid() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; JID_BYTES] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}
