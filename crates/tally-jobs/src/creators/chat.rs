//! Chat creation worker.

use chrono::{DateTime, Utc};
use tally_core::timestamp::resolve_or;
use tally_core::{ChatCreated, DuplicatePolicy};
use tally_store::row_types::db_timestamp;
use tally_store::{ApplicationRepo, ChatRepo, Database, InsertOutcome};
use tracing::{debug, info, instrument, warn};

use crate::errors::Result;
use crate::outcome::{DiscardReason, JobOutcome};

/// Persists chats announced by the producer.
#[derive(Clone, Debug)]
pub struct ChatCreator {
    db: Database,
    policy: DuplicatePolicy,
}

impl ChatCreator {
    /// Create a worker writing to `db`.
    pub fn new(db: Database, policy: DuplicatePolicy) -> Self {
        Self { db, policy }
    }

    /// Process one chat-creation event at processing time `now`.
    #[instrument(skip_all, fields(token = %event.application_token, number = event.number))]
    pub fn perform(&self, event: &ChatCreated, now: DateTime<Utc>) -> Result<JobOutcome> {
        let token = &event.application_token;
        let conn = self.db.conn()?;

        let Some(app) = ApplicationRepo::find_by_token(&conn, token)? else {
            warn!("Application token {token} not found");
            return Ok(JobOutcome::Discarded(DiscardReason::ApplicationNotFound));
        };

        let ts = resolve_or(&event.timestamp, now);
        if ts.fallback {
            debug!(raw = %event.timestamp, "unparseable timestamp, using processing time");
        }
        let at = db_timestamp(ts.at);

        match self.policy {
            DuplicatePolicy::Reject => {
                let _ = ChatRepo::insert(&conn, app.id, event.number, &at)?;
            }
            DuplicatePolicy::SkipIdentical => {
                if let InsertOutcome::Existing(_) =
                    ChatRepo::insert_or_get(&conn, app.id, event.number, &at)?
                {
                    info!("Chat {} already exists for application {token}", event.number);
                    return Ok(JobOutcome::AlreadyExists);
                }
            }
        }

        info!("Created chat {} for application {token}", event.number);
        Ok(JobOutcome::Created)
    }
}
