use std::pin::Pin;
use futures_core::Stream;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{JobRecord, JobStatusEvent};

/// Boxed stream type for status events
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// In-process fan-out of job status events
///
/// Publishing never blocks; a subscriber that falls more than the channel
/// capacity behind skips the events it missed.
#[derive(Clone)]
pub struct StatusPublisher {
    sender: broadcast::Sender<JobStatusEvent>,
}

impl StatusPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish the current state of a job
    pub fn publish(&self, record: &JobRecord) {
        let event = JobStatusEvent::from_record(record);
        trace!(job_id = %event.job_id, state = %event.state, "Publishing status event");
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobStatusEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream, skipping lagged events
    pub fn stream(&self) -> BoxStream<JobStatusEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(self.sender.subscribe())
            .filter_map(|result| result.ok());

        Box::pin(stream)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}
