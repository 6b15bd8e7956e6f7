use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::StreamConfig;
use crate::consumer::{Consumer, FrameReport};
use crate::device::{DrawDevice, UploadDevice};
use crate::error::StreamError;
use crate::generation::SharedGrid;
use crate::handoff::handoff_channel;
use crate::producer::{Producer, ProducerExit};
use crate::stats::StreamStats;

const JOIN_POLL: Duration = Duration::from_millis(5);

/// Wire a producer and a consumer around a fresh grid without spawning
/// anything. [`TileStream::start`] is the threaded form; this one lets a
/// caller step both halves by hand.
pub fn connect<U: UploadDevice>(
    uploader: U,
    config: StreamConfig,
) -> Result<(Producer<U>, Consumer), StreamError> {
    config.validate()?;
    let grid = Arc::new(SharedGrid::new());
    let (ack_tx, ack_rx) = handoff_channel();
    let (fault_tx, fault_rx) = crossbeam_channel::unbounded();
    let vertex_count = config.vertex_count();
    let producer = Producer::new(Arc::clone(&grid), uploader, config, ack_rx, fault_tx);
    let consumer = Consumer::new(grid, ack_tx, fault_rx, vertex_count);
    Ok((producer, consumer))
}

/// What [`TileStream::shutdown`] tore down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    pub drawables_destroyed: usize,
    pub buffers_released: usize,
    /// `false` if the producer missed the join deadline; its buffers were
    /// then left alone.
    pub producer_joined: bool,
}

/// A running tile stream: the producer thread plus the render-side consumer.
///
/// Owned by the render thread. Dropping it without [`shutdown`](Self::shutdown)
/// still stops the producer, but leaves device resources to the devices.
pub struct TileStream<U: UploadDevice> {
    consumer: Consumer,
    cancel: Arc<AtomicBool>,
    producer: Option<JoinHandle<ProducerExit<U>>>,
    join_timeout: Duration,
}

impl<U: UploadDevice> TileStream<U> {
    pub fn start(uploader: U, config: StreamConfig) -> Result<Self, StreamError> {
        let join_timeout = config.join_timeout();
        let policy = config.policy;
        let (producer, consumer) = connect(uploader, config)?;

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("tile-producer".into())
            .spawn(move || producer.run(&flag))
            .map_err(|e| StreamError::Spawn(e.to_string()))?;

        tracing::info!(%policy, "tile stream started");
        Ok(Self {
            consumer,
            cancel,
            producer: Some(handle),
            join_timeout,
        })
    }

    /// Per-frame hook; see [`Consumer::advance_and_draw`].
    pub fn advance_and_draw<D: DrawDevice>(
        &mut self,
        device: &mut D,
        target: &mut D::Target,
    ) -> Result<FrameReport, StreamError> {
        self.consumer.advance_and_draw(device, target)
    }

    pub fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    pub fn grid(&self) -> &Arc<SharedGrid> {
        self.consumer.grid()
    }

    pub fn is_producer_running(&self) -> bool {
        self.producer.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> StreamStats {
        self.consumer.stream_stats()
    }

    /// Cancel the producer and join it, waiting at most the configured join
    /// timeout. Returns what the producer handed back, or `None` if it was
    /// already stopped, panicked, or missed the deadline (it is detached).
    pub fn stop(&mut self) -> Option<ProducerExit<U>> {
        let handle = self.producer.take()?;
        self.cancel.store(true, Ordering::Release);
        self.consumer.disconnect();

        let deadline = Instant::now() + self.join_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(timeout = ?self.join_timeout, "producer did not stop in time; detaching");
                return None;
            }
            thread::sleep(JOIN_POLL);
        }
        match handle.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                tracing::error!("producer thread panicked");
                None
            }
        }
    }

    /// Stop the producer, then free everything on the calling (render)
    /// thread: drawables first, buffers after.
    pub fn shutdown<D: DrawDevice>(mut self, device: &mut D) -> TeardownReport {
        let exit = self.stop();
        let drawables_destroyed = self.consumer.destroy_all(device);

        let (buffers_released, producer_joined) = match exit {
            Some(exit) => {
                let (_uploader, released) = exit.release_all();
                (released, true)
            }
            None => (0, false),
        };

        let report = TeardownReport {
            drawables_destroyed,
            buffers_released,
            producer_joined,
        };
        tracing::info!(?report, "tile stream shut down");
        report
    }
}

impl<U: UploadDevice> Drop for TileStream<U> {
    fn drop(&mut self) {
        if self.producer.is_some() {
            tracing::debug!("tile stream dropped without shutdown; stopping producer");
            self.stop();
        }
    }
}
