use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc::{channel, Receiver, Sender};

use crate::pipeline::{PassOutcome, Stage};

/// Receiving end of a project's notification stream.
pub type Subscription = Receiver<Notification>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeKind {
    Passing,
    FailBuild,
    FailTest,
    FailLint,
    /// A check tool could not be run at all.
    Error,
}

impl Display for OutcomeKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OutcomeKind::Passing => write!(f, "Passing"),
            OutcomeKind::FailBuild => write!(f, "Build"),
            OutcomeKind::FailTest => write!(f, "Test"),
            OutcomeKind::FailLint => write!(f, "Lint"),
            OutcomeKind::Error => write!(f, "Error"),
        }
    }
}

/// One message per check pass: the package the pass stopped at, or the all-clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: OutcomeKind,
    pub import_path: Option<String>,
    pub output: Option<String>,
}

impl Notification {
    pub fn all_clear() -> Self {
        Notification {
            kind: OutcomeKind::Passing,
            import_path: None,
            output: None,
        }
    }

    pub fn is_all_clear(&self) -> bool {
        self.kind == OutcomeKind::Passing
    }
}

impl From<&PassOutcome> for Notification {
    fn from(outcome: &PassOutcome) -> Self {
        match outcome {
            PassOutcome::Passing => Notification::all_clear(),
            PassOutcome::Failed {
                import_path,
                stage,
                output,
            } => Notification {
                kind: match stage {
                    Stage::Build => OutcomeKind::FailBuild,
                    Stage::Test => OutcomeKind::FailTest,
                    Stage::Lint => OutcomeKind::FailLint,
                },
                import_path: Some(import_path.clone()),
                output: Some(output.clone()),
            },
            PassOutcome::ToolError {
                import_path,
                stage,
                error,
            } => Notification {
                kind: OutcomeKind::Error,
                import_path: Some(import_path.clone()),
                output: Some(format!("{stage} step could not run: {error}")),
            },
        }
    }
}

/// Fans notifications out to every subscriber.
///
/// Each subscriber gets its own bounded queue. [`Publisher::publish`] waits for room in every
/// live queue, so a consumer that stops reading holds up the publisher once its queue is full.
#[derive(Debug)]
pub struct Publisher {
    capacity: usize,
    subscribers: Mutex<Vec<Sender<Notification>>>,
}

impl Publisher {
    pub fn new(capacity: usize) -> Self {
        Publisher {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = channel(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Deliver `notification` to every live subscriber, returning how many received it.
    /// Subscribers whose receiver was dropped are forgotten.
    pub async fn publish(&self, notification: Notification) -> usize {
        let senders: Vec<Sender<Notification>> = self.subscribers.lock().clone();
        let mut delivered = 0;
        for tx in senders.iter() {
            match tx.send(notification.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!("[Publisher] Dropping closed subscriber: {}", e),
            }
        }
        self.subscribers.lock().retain(|tx| !tx.is_closed());
        delivered
    }
}
