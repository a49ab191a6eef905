//! The ingress side of the counter contract.
//!
//! Creation workers never touch the counter cache. The increments that keep
//! `application:<token>` and `application:<token>:chat:<n>` in step with
//! created rows belong to whoever accepts the create request and enqueues
//! the event. [`Producer`] is that actor: it assigns numbers from
//! per-parent sequence keys, bumps the parent counters, and returns the
//! envelope to enqueue.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tally_core::{
    keys, ApplicationToken, ChatCreated, CounterStore, JobEnvelope, JobKind, MessageCreated,
};
use tracing::{debug, instrument};

use crate::errors::ProducerError;

type Result<T> = std::result::Result<T, ProducerError>;

/// Assigns numbers and emits creation envelopes.
#[derive(Clone)]
pub struct Producer {
    counters: Arc<dyn CounterStore>,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}

impl Producer {
    /// Create a producer over the shared counter store.
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self { counters }
    }

    /// Accept a new chat for `token`.
    #[instrument(skip_all, fields(token = %token))]
    pub fn produce_chat(&self, token: &ApplicationToken) -> Result<JobEnvelope> {
        let app_key = keys::application_key(token);
        if self.counters.get(&app_key)?.is_none() {
            return Err(ProducerError::ApplicationNotFound(token.clone()));
        }

        let number = self.counters.incr(&keys::last_chat_number_key(token))?;
        let _ = self.counters.incr(&app_key)?;
        self.counters.set(&keys::chat_key(token, number), 0)?;

        let envelope = JobEnvelope::new(&JobKind::CreateChat(ChatCreated {
            application_token: token.clone(),
            number,
            timestamp: now(),
        }))?;
        debug!(number, jid = %envelope.jid, "chat accepted");
        Ok(envelope)
    }

    /// Accept a new message in chat `chat_number` of `token`.
    #[instrument(skip_all, fields(token = %token, chat_number = chat_number))]
    pub fn produce_message(
        &self,
        token: &ApplicationToken,
        chat_number: i64,
        body: &str,
    ) -> Result<JobEnvelope> {
        if body.trim().is_empty() {
            return Err(ProducerError::MissingBody);
        }
        if self.counters.get(&keys::application_key(token))?.is_none() {
            return Err(ProducerError::ApplicationNotFound(token.clone()));
        }
        let chat_key = keys::chat_key(token, chat_number);
        if self.counters.get(&chat_key)?.is_none() {
            return Err(ProducerError::ChatNotFound {
                token: token.clone(),
                chat_number,
            });
        }

        let number = self
            .counters
            .incr(&keys::last_message_number_key(token, chat_number))?;
        let _ = self.counters.incr(&chat_key)?;

        let envelope = JobEnvelope::new(&JobKind::CreateMessage(MessageCreated {
            application_token: token.clone(),
            chat_number,
            number,
            body: body.to_string(),
            timestamp: now(),
        }))?;
        debug!(number, jid = %envelope.jid, "message accepted");
        Ok(envelope)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}
