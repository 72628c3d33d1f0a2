//! Bounded hand-off between the webhook handler and the deployment workers.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::{debug, info};

use crate::pipeline::DeploymentPipeline;
use crate::webhook::PushNotification;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("deployment queue is full")]
    Full,
    #[error("deployment queue is closed")]
    Closed,
}

/// Sending half of the deployment queue. Cheap to clone.
#[derive(Clone)]
pub struct DeploymentQueue {
    sender: Sender<PushNotification>,
}

impl DeploymentQueue {
    /// Start dispatching pushes to `pipeline`.
    ///
    /// At most `capacity` deliveries are in flight (waiting on their target or running)
    /// and at most `capacity` more wait in the queue. How many actually run at once is
    /// up to the pipeline's worker slots.
    pub fn start(pipeline: Arc<DeploymentPipeline>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let in_flight = Arc::new(Semaphore::new(capacity));

        tokio::spawn(dispatch_loop(receiver, in_flight, pipeline));
        info!(capacity, "Deployment queue started");

        Self { sender }
    }

    /// Queue a push without waiting. A full queue is reported, not awaited.
    pub fn enqueue(&self, push: PushNotification) -> Result<(), EnqueueError> {
        self.sender.try_send(push).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

async fn dispatch_loop(
    mut receiver: Receiver<PushNotification>,
    in_flight: Arc<Semaphore>,
    pipeline: Arc<DeploymentPipeline>,
) {
    loop {
        let Ok(permit) = in_flight.clone().acquire_owned().await else {
            break;
        };
        let Some(push) = receiver.recv().await else {
            debug!("Deployment queue closed, dispatcher exiting");
            break;
        };

        // Each delivery gets its own task so a panic only loses that delivery.
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let outcome = pipeline.process(&push).await;
            debug!(outcome = %outcome, "Deployment processed");
            drop(permit);
        });
    }
}
