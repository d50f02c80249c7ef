//! Byte-stream observer that turns transfer progress into channel notifications
//!
//! [`ProgressCorrelator::attach`] wraps an upload body. The wrapper only counts
//! bytes as they pass through; a separate sampler task reads the counter on a
//! fixed cadence and talks to the registry, so a slow or missing notification
//! channel never holds up the transfer itself.

use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::protocol::CorrelationMessage;
use super::registry::ConnectionRegistry;
use crate::models::CorrelationId;

/// Cumulative progress of one transfer at a sampling instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSample {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl TransferSample {
    /// Whole percent complete, floored and clamped to `0..=100`.
    ///
    /// `None` when the total is zero and no percentage can be computed.
    #[must_use]
    pub fn percentage(&self) -> Option<u8> {
        if self.total_bytes == 0 {
            return None;
        }
        let percent = u128::from(self.bytes_transferred) * 100 / u128::from(self.total_bytes);
        Some(u8::try_from(percent.min(100)).unwrap_or(100))
    }
}

/// Routes progress of byte streams to the registry by correlation id
#[derive(Clone)]
pub struct ProgressCorrelator {
    registry: ConnectionRegistry,
    sampling_interval: Duration,
}

impl ProgressCorrelator {
    #[must_use]
    pub fn new(registry: ConnectionRegistry, sampling_interval: Duration) -> Self {
        Self {
            registry,
            sampling_interval,
        }
    }

    #[must_use]
    pub const fn sampling_interval(&self) -> Duration {
        self.sampling_interval
    }

    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Observe `stream`, reporting progress to the channel registered under `correlation_id`.
    ///
    /// The returned stream yields exactly what `stream` yields. With an unknown
    /// or zero `total_length` no percentage is reported; the channel is closed
    /// when the stream ends cleanly and otherwise left to the registry sweep.
    pub fn attach<S>(
        &self,
        correlation_id: impl Into<CorrelationId>,
        stream: S,
        total_length: Option<u64>,
    ) -> ProgressStream<S> {
        self.attach_with_interval(correlation_id, stream, total_length, self.sampling_interval)
    }

    /// Same as [`Self::attach`] with an explicit sampling cadence
    pub fn attach_with_interval<S>(
        &self,
        correlation_id: impl Into<CorrelationId>,
        stream: S,
        total_length: Option<u64>,
        sampling_interval: Duration,
    ) -> ProgressStream<S> {
        let correlation_id = correlation_id.into();
        let bytes = Arc::new(AtomicU64::new(0));
        let total_bytes = total_length.unwrap_or(0);

        let control = SamplerControl::default();
        if total_bytes == 0 {
            debug!(
                correlation_id = %correlation_id,
                "Transfer length unknown, progress reporting disabled"
            );
            tokio::spawn(close_on_completion(
                self.registry.clone(),
                correlation_id,
                control.clone(),
            ));
        } else {
            let sampler = Sampler {
                registry: self.registry.clone(),
                correlation_id,
                total_bytes,
                last_bytes: 0,
            };
            tokio::spawn(sampler.run(
                bytes.clone(),
                sampling_interval.max(Duration::from_millis(1)),
                control.clone(),
            ));
        }

        ProgressStream {
            inner: stream,
            bytes,
            total_bytes,
            control,
            done: false,
        }
    }
}

/// Closes the channel of a transfer without a known length once it completes
async fn close_on_completion(
    registry: ConnectionRegistry,
    correlation_id: CorrelationId,
    control: SamplerControl,
) {
    tokio::select! {
        biased;
        () = control.abandoned.cancelled() => {}
        () = control.finished.cancelled() => {
            registry.terminate(correlation_id.as_str());
        }
    }
}

#[derive(Clone, Default)]
struct SamplerControl {
    /// Stream reached its end; take a final sample
    finished: CancellationToken,
    /// Stream failed or was dropped early; stop without reporting
    abandoned: CancellationToken,
}

#[derive(Debug, PartialEq, Eq)]
enum SampleOutcome {
    Continue,
    Completed,
}

struct Sampler {
    registry: ConnectionRegistry,
    correlation_id: CorrelationId,
    total_bytes: u64,
    last_bytes: u64,
}

impl Sampler {
    async fn run(mut self, bytes: Arc<AtomicU64>, period: Duration, control: SamplerControl) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = control.abandoned.cancelled() => {
                    debug!(
                        correlation_id = %self.correlation_id,
                        bytes_transferred = bytes.load(Ordering::Acquire),
                        "Transfer ended early, progress sampling stopped"
                    );
                    return;
                }
                () = control.finished.cancelled() => {
                    // a completed transfer has delivered its whole length
                    let transferred = bytes.load(Ordering::Acquire).max(self.total_bytes);
                    self.sample(transferred);
                    self.registry.terminate(self.correlation_id.as_str());
                    return;
                }
                _ = ticker.tick() => {
                    if self.sample(bytes.load(Ordering::Acquire)) == SampleOutcome::Completed {
                        return;
                    }
                }
            }
        }
    }

    fn sample(&mut self, bytes_transferred: u64) -> SampleOutcome {
        if bytes_transferred <= self.last_bytes {
            return SampleOutcome::Continue;
        }
        self.last_bytes = bytes_transferred;

        let sample = TransferSample {
            bytes_transferred,
            total_bytes: self.total_bytes,
        };
        let Some(percent) = sample.percentage() else {
            return SampleOutcome::Continue;
        };

        let id = self.correlation_id.as_str();
        trace!(correlation_id = %id, percent, bytes_transferred, "Progress sample");
        self.registry
            .notify(id, CorrelationMessage::progress(percent).encode());
        self.registry.touch(id);

        if percent >= 100 {
            self.registry.terminate(id);
            return SampleOutcome::Completed;
        }
        SampleOutcome::Continue
    }
}

/// Pass-through stream counting the bytes it yields
pub struct ProgressStream<S> {
    inner: S,
    bytes: Arc<AtomicU64>,
    total_bytes: u64,
    control: SamplerControl,
    done: bool,
}

/// Declares a transfer complete from outside its stream.
///
/// Used when the consumer stops reading before the stream reports its end,
/// e.g. a form parser that returns once the closing boundary is seen.
#[derive(Clone)]
pub struct TransferCompletion {
    control: SamplerControl,
}

impl TransferCompletion {
    /// Report the final sample and close the channel. No effect once the
    /// stream has failed or been dropped early.
    pub fn complete(&self) {
        if !self.control.abandoned.is_cancelled() {
            self.control.finished.cancel();
        }
    }
}

impl<S> ProgressStream<S> {
    #[must_use]
    pub fn sample(&self) -> TransferSample {
        TransferSample {
            bytes_transferred: self.bytes.load(Ordering::Acquire),
            total_bytes: self.total_bytes,
        }
    }

    /// Whether percentages are reported for this stream
    #[must_use]
    pub const fn is_reporting(&self) -> bool {
        self.total_bytes > 0
    }

    #[must_use]
    pub fn completion(&self) -> TransferCompletion {
        TransferCompletion {
            control: self.control.clone(),
        }
    }

    fn end(&mut self, finished: bool) {
        if std::mem::replace(&mut self.done, true) {
            return;
        }
        if finished {
            self.control.finished.cancel();
        } else if !self.control.finished.is_cancelled() {
            self.control.abandoned.cancel();
        }
    }
}

impl<S, B, E> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = Result<B, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let len = chunk.as_ref().len() as u64;
                this.bytes.fetch_add(len, Ordering::AcqRel);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.end(false);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.end(true);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S> Drop for ProgressStream<S> {
    fn drop(&mut self) {
        self.end(false);
    }
}
