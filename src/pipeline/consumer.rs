use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::pipeline::services::{AnalysisHandle, EventHub};
use crate::pipeline::types::{GrabberEvent, PipelineCounters};

/// Delivers results strictly in submission order. A slow handle at the head of the queue
/// holds back everything behind it until it resolves or times out.
///
/// Returns once the producer has dropped its sender and every queued handle was delivered.
pub(crate) async fn run_consumer<R: Send + 'static>(
    mut queue: mpsc::Receiver<AnalysisHandle<R>>,
    events: Arc<EventHub<R>>,
    counters: Arc<PipelineCounters>,
) -> u64 {
    let mut delivered = 0;
    while let Some(handle) = queue.recv().await {
        debug!(
            "Consumer: waiting for result of frame {}",
            handle.frame_index()
        );
        let envelope = handle.resolve().await;
        counters.result_delivered(&envelope);
        debug!("Consumer: got result for frame {}", envelope.frame_index());
        events.publish(&GrabberEvent::ResultAvailable(envelope));
        delivered += 1;
    }
    debug!("Consumer: queue finalized after {} result(s)", delivered);
    delivered
}
