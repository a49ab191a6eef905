//! Creation workers.
//!
//! A worker receives one decoded job, looks up the parent entity, and
//! persists the row with the event's timestamp. A missing parent is a
//! terminal discard, not an error: retrying can never make it appear.

pub mod chat;
pub mod message;

use chrono::Utc;
use tally_core::{DuplicatePolicy, JobKind};
use tally_store::Database;

pub use chat::ChatCreator;
pub use message::MessageCreator;

use crate::errors::Result;
use crate::outcome::JobOutcome;

/// Something that can run a decoded job once.
///
/// Handlers are synchronous; the queue runs them on the blocking pool.
pub trait JobHandler: Send + Sync + 'static {
    /// Run one attempt.
    fn handle(&self, job: &JobKind) -> Result<JobOutcome>;
}

/// Dispatches each job kind to its creator.
#[derive(Clone, Debug)]
pub struct CreationHandler {
    chats: ChatCreator,
    messages: MessageCreator,
}

impl CreationHandler {
    /// Build both creators over one store and one duplicate policy.
    pub fn new(db: Database, policy: DuplicatePolicy) -> Self {
        Self {
            chats: ChatCreator::new(db.clone(), policy),
            messages: MessageCreator::new(db, policy),
        }
    }
}

impl JobHandler for CreationHandler {
    fn handle(&self, job: &JobKind) -> Result<JobOutcome> {
        let now = Utc::now();
        match job {
            JobKind::CreateChat(event) => self.chats.perform(event, now),
            JobKind::CreateMessage(event) => self.messages.perform(event, now),
        }
    }
}
