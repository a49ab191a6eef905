//! Message creation worker.

use chrono::{DateTime, Utc};
use tally_core::timestamp::resolve_or;
use tally_core::{DuplicatePolicy, MessageCreated};
use tally_store::row_types::db_timestamp;
use tally_store::{ApplicationRepo, ChatRepo, Database, InsertOutcome, MessageRepo};
use tracing::{debug, info, instrument, warn};

use crate::errors::{JobError, Result};
use crate::outcome::{DiscardReason, JobOutcome};

/// Persists messages announced by the producer.
#[derive(Clone, Debug)]
pub struct MessageCreator {
    db: Database,
    policy: DuplicatePolicy,
}

impl MessageCreator {
    /// Create a worker writing to `db`.
    pub fn new(db: Database, policy: DuplicatePolicy) -> Self {
        Self { db, policy }
    }

    /// Process one message-creation event at processing time `now`.
    #[instrument(
        skip_all,
        fields(
            token = %event.application_token,
            chat_number = event.chat_number,
            number = event.number
        )
    )]
    pub fn perform(&self, event: &MessageCreated, now: DateTime<Utc>) -> Result<JobOutcome> {
        let token = &event.application_token;
        let conn = self.db.conn()?;

        let Some(app) = ApplicationRepo::find_by_token(&conn, token)? else {
            warn!("Application token {token} not found");
            return Ok(JobOutcome::Discarded(DiscardReason::ApplicationNotFound));
        };
        let Some(chat) = ChatRepo::find(&conn, app.id, event.chat_number)? else {
            warn!("Chat {} not found for application {token}", event.chat_number);
            return Ok(JobOutcome::Discarded(DiscardReason::ChatNotFound));
        };

        let ts = resolve_or(&event.timestamp, now);
        if ts.fallback {
            debug!(raw = %event.timestamp, "unparseable timestamp, using processing time");
        }
        let at = db_timestamp(ts.at);

        match self.policy {
            DuplicatePolicy::Reject => {
                let _ = MessageRepo::insert(&conn, chat.id, event.number, &event.body, &at)?;
            }
            DuplicatePolicy::SkipIdentical => {
                if let InsertOutcome::Existing(stored) =
                    MessageRepo::insert_or_get(&conn, chat.id, event.number, &event.body, &at)?
                {
                    if stored.body != event.body {
                        return Err(JobError::Conflict {
                            entity: "message",
                            detail: format!(
                                "message {} in chat {} has a different body",
                                event.number, event.chat_number
                            ),
                        });
                    }
                    info!(
                        "Message {} already exists for chat {} in app {token}",
                        event.number, event.chat_number
                    );
                    return Ok(JobOutcome::AlreadyExists);
                }
            }
        }

        info!(
            "Created message {} for chat {} in app {token}",
            event.number, event.chat_number
        );
        Ok(JobOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tally_core::ApplicationToken;
    use tally_store::StoreError;

    use super::*;

    struct Fixture {
        creator: MessageCreator,
        db: Database,
        token: ApplicationToken,
        chat_id: i64,
    }

    fn setup(policy: DuplicatePolicy) -> Fixture {
        let db = Database::in_memory().unwrap();
        let (token, chat_id) = {
            let conn = db.conn().unwrap();
            let app = ApplicationRepo::create(&conn, "a").unwrap();
            let chat = ChatRepo::insert(&conn, app.id, 1, "2025-11-08T00:00:00.000000Z").unwrap();
            (app.token, chat.id)
        };
        Fixture {
            creator: MessageCreator::new(db.clone(), policy),
            db,
            token,
            chat_id,
        }
    }

    fn event(
        token: &ApplicationToken,
        chat_number: i64,
        number: i64,
        body: &str,
    ) -> MessageCreated {
        MessageCreated {
            application_token: token.clone(),
            chat_number,
            number,
            body: body.into(),
            timestamp: "2025-11-08T00:15:15.123456789Z".into(),
        }
    }

    fn count(f: &Fixture) -> i64 {
        MessageRepo::count_for_chat(&f.db.conn().unwrap(), f.chat_id).unwrap()
    }

    #[test]
    fn creates_message() {
        let f = setup(DuplicatePolicy::default());
        let outcome = f.creator.perform(&event(&f.token, 1, 1, "Hello world"), Utc::now()).unwrap();
        assert_eq!(outcome, JobOutcome::Created);
        let msg = MessageRepo::find(&f.db.conn().unwrap(), f.chat_id, 1).unwrap().unwrap();
        assert_eq!(msg.body, "Hello world");
        assert_eq!(msg.created_at, "2025-11-08T00:15:15.123456Z");
    }

    #[test]
    fn missing_chat_is_discarded() {
        let f = setup(DuplicatePolicy::default());
        let outcome = f.creator.perform(&event(&f.token, 99, 1, "hi"), Utc::now()).unwrap();
        assert_eq!(outcome, JobOutcome::Discarded(DiscardReason::ChatNotFound));
        assert_eq!(count(&f), 0);
    }

    #[test]
    fn missing_application_is_discarded() {
        let f = setup(DuplicatePolicy::default());
        let ghost = ApplicationToken::from_raw("nonexistent");
        let outcome = f.creator.perform(&event(&ghost, 1, 1, "hi"), Utc::now()).unwrap();
        assert_eq!(outcome, JobOutcome::Discarded(DiscardReason::ApplicationNotFound));
    }

    #[test]
    fn identical_redelivery_is_a_no_op() {
        let f = setup(DuplicatePolicy::SkipIdentical);
        let e = event(&f.token, 1, 3, "same");
        assert_eq!(f.creator.perform(&e, Utc::now()).unwrap(), JobOutcome::Created);
        assert_eq!(f.creator.perform(&e, Utc::now()).unwrap(), JobOutcome::AlreadyExists);
        assert_eq!(count(&f), 1);
    }

    #[test]
    fn conflicting_redelivery_is_an_error() {
        let f = setup(DuplicatePolicy::SkipIdentical);
        let _ = f.creator.perform(&event(&f.token, 1, 3, "first"), Utc::now()).unwrap();
        assert_matches!(
            f.creator.perform(&event(&f.token, 1, 3, "second"), Utc::now()),
            Err(JobError::Conflict { entity: "message", .. })
        );
        let stored = MessageRepo::find(&f.db.conn().unwrap(), f.chat_id, 3).unwrap().unwrap();
        assert_eq!(stored.body, "first");
    }

    #[test]
    fn reject_policy_surfaces_unique_violation() {
        let f = setup(DuplicatePolicy::Reject);
        let e = event(&f.token, 1, 3, "same");
        let _ = f.creator.perform(&e, Utc::now()).unwrap();
        assert_matches!(
            f.creator.perform(&e, Utc::now()),
            Err(JobError::Store(StoreError::UniqueViolation { entity: "message", .. }))
        );
        assert_eq!(count(&f), 1);
    }

    #[test]
    fn blank_body_is_a_validation_error() {
        let f = setup(DuplicatePolicy::default());
        assert_matches!(
            f.creator.perform(&event(&f.token, 1, 1, ""), Utc::now()),
            Err(JobError::Store(StoreError::Validation(_)))
        );
    }
}
