//! Routes envelopes to the queue serving their job class.

use std::sync::Arc;

use tally_core::events::{
    CHATS_CREATION_QUEUE, CHATS_CREATOR_CLASS, MESSAGES_CREATION_QUEUE, MESSAGE_CREATOR_CLASS,
};
use tally_core::JobEnvelope;

use crate::creators::JobHandler;
use crate::errors::{JobError, Result};
use crate::queue::{DeadSet, QueueConfig, WorkerPool};

/// The chat and message queues behind one entry point.
#[derive(Debug)]
pub struct JobRouter {
    chats: WorkerPool,
    messages: WorkerPool,
    dead: DeadSet,
}

impl JobRouter {
    /// Start both pools sharing one handler and one dead set.
    pub fn start(
        handler: Arc<dyn JobHandler>,
        chats: &QueueConfig,
        messages: &QueueConfig,
    ) -> Self {
        let dead = DeadSet::new();
        Self {
            chats: WorkerPool::start(
                CHATS_CREATION_QUEUE,
                Arc::clone(&handler),
                chats,
                dead.clone(),
            ),
            messages: WorkerPool::start(MESSAGES_CREATION_QUEUE, handler, messages, dead.clone()),
            dead,
        }
    }

    /// Enqueue on the pool serving `envelope.class`.
    pub async fn submit(&self, envelope: JobEnvelope) -> Result<()> {
        match envelope.class.as_str() {
            CHATS_CREATOR_CLASS => self.chats.enqueue(envelope).await,
            MESSAGE_CREATOR_CLASS => self.messages.enqueue(envelope).await,
            other => Err(JobError::UnroutableJob(other.to_string())),
        }
    }

    /// Parse one JSON envelope and submit it.
    pub async fn submit_json(&self, line: &str) -> Result<()> {
        self.submit(JobEnvelope::from_json(line)?).await
    }

    /// Jobs that exhausted their attempts on either queue.
    pub fn dead(&self) -> &DeadSet {
        &self.dead
    }

    /// Drain both queues.
    pub async fn shutdown(self) {
        let _ = tokio::join!(self.chats.shutdown(), self.messages.shutdown());
    }

    /// Stop both queues without draining.
    pub async fn abort(self) {
        let _ = tokio::join!(self.chats.abort(), self.messages.abort());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use tally_core::{ApplicationToken, ChatCreated, JobKind};

    use super::*;
    use crate::outcome::JobOutcome;

    #[derive(Default)]
    struct Recorder {
        classes: Mutex<Vec<&'static str>>,
        calls: AtomicUsize,
    }

    impl JobHandler for Recorder {
        fn handle(&self, job: &JobKind) -> Result<JobOutcome> {
            self.classes.lock().push(job.class());
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(JobOutcome::Created)
        }
    }

    fn chat_envelope() -> JobEnvelope {
        JobEnvelope::new(&JobKind::CreateChat(ChatCreated {
            application_token: ApplicationToken::from_raw("T"),
            number: 1,
            timestamp: String::new(),
        }))
        .unwrap()
    }

    fn start(handler: &Arc<Recorder>) -> JobRouter {
        JobRouter::start(handler.clone(), &QueueConfig::default(), &QueueConfig::default())
    }

    #[tokio::test]
    async fn routes_json_lines_by_class() {
        let handler = Arc::new(Recorder::default());
        let router = start(&handler);
        router.submit(chat_envelope()).await.unwrap();
        let line = serde_json::json!({
            "class": "MessageCreatorJob",
            "args": [{
                "application_token": "T",
                "chat_number": 1,
                "number": 1,
                "body": "hi",
                "timestamp": ""
            }],
            "queue": "messages_creation_queue",
            "jid": "abc"
        })
        .to_string();
        router.submit_json(&line).await.unwrap();
        router.shutdown().await;

        let mut classes = handler.classes.lock().clone();
        classes.sort_unstable();
        assert_eq!(classes, vec![CHATS_CREATOR_CLASS, MESSAGE_CREATOR_CLASS]);
    }

    #[tokio::test]
    async fn unknown_class_is_unroutable() {
        let handler = Arc::new(Recorder::default());
        let router = start(&handler);
        let mut env = chat_envelope();
        env.class = "PurgeJob".into();
        assert_matches!(
            router.submit(env).await,
            Err(JobError::UnroutableJob(c)) if c == "PurgeJob"
        );
        assert_matches!(router.submit_json("not json").await, Err(JobError::Decode(_)));
        router.shutdown().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
}
