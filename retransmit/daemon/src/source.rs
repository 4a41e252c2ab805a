//! Ring buffer handles the consumer reads raw records from
//!
//! A [`RecordSource`] hands out one raw record per call and reports closure
//! as `Ok(None)`. Two kernel transports are supported: a BPF ring buffer
//! polled through tokio's `AsyncFd`, and a per-CPU perf event array whose
//! readers feed a single channel.

use crate::error::{LoaderError, RingBufferError};
use aya::{
    maps::{perf::AsyncPerfEventArray, MapData, RingBuf},
    util::online_cpus,
};
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use std::future::Future;
use tokio::{io::unix::AsyncFd, sync::mpsc, task::JoinHandle};

/// Buffers handed to each perf read call
const PERF_BATCH: usize = 16;

/// Largest record any known layout produces, perf padding included
const PERF_RECORD_CAPACITY: usize = 128;

/// A readable ring-buffer handle
///
/// `next_record` must be cancel-safe: the consumer drops the returned future
/// when shutdown wins the race, and no record may be lost by doing so.
pub trait RecordSource {
    /// Wait for the next record; `Ok(None)` once the handle is closed
    fn next_record(&mut self) -> impl Future<Output = Result<Option<Bytes>, RingBufferError>>;

    /// Release the handle. Called at most once, by the consumer, on shutdown.
    fn close(&mut self) {}
}

/// Producer half of a [`ChannelSource`]
pub type RecordSender = mpsc::Sender<Result<Bytes, RingBufferError>>;

/// Channel-backed source, fed by perf readers or by tests
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<Bytes, RingBufferError>>,
}

impl ChannelSource {
    /// Create a bounded source and the sender that feeds it
    pub fn new(capacity: usize) -> (RecordSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

impl RecordSource for ChannelSource {
    async fn next_record(&mut self) -> Result<Option<Bytes>, RingBufferError> {
        match self.rx.recv().await {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.rx.close();
    }
}

/// BPF ring buffer (BPF_MAP_TYPE_RINGBUF)
///
/// Keeps the default no-op `close`: there is no reader task to stop, a
/// blocked read ends when the consumer drops its future, and the map fd is
/// released when the source itself is dropped.
pub struct RingBufSource {
    inner: AsyncFd<RingBuf<MapData>>,
}

impl RingBufSource {
    /// Register the ring buffer's fd with the tokio reactor
    pub fn new(ring_buf: RingBuf<MapData>) -> Result<Self, LoaderError> {
        let inner = AsyncFd::new(ring_buf).map_err(LoaderError::Register)?;
        Ok(Self { inner })
    }
}

impl RecordSource for RingBufSource {
    async fn next_record(&mut self) -> Result<Option<Bytes>, RingBufferError> {
        loop {
            let mut guard = self.inner.readable_mut().await?;
            if let Some(item) = guard.get_inner_mut().next() {
                // Readiness is kept so the next call drains without polling.
                return Ok(Some(Bytes::copy_from_slice(&item)));
            }
            guard.clear_ready();
        }
    }
}

/// Per-CPU perf event array (BPF_MAP_TYPE_PERF_EVENT_ARRAY)
///
/// One reader task per online CPU copies samples into a shared channel, so
/// the consumer still sees a single FIFO handle.
pub struct PerfArraySource {
    records: ChannelSource,
    readers: Vec<JoinHandle<()>>,
}

impl PerfArraySource {
    /// Open every online CPU's buffer and spawn its reader
    ///
    /// # Arguments
    ///
    /// * `perf_array` - Perf event array taken from the probe object
    /// * `capacity` - Records buffered between the readers and the consumer
    pub fn spawn(
        mut perf_array: AsyncPerfEventArray<MapData>,
        capacity: usize,
    ) -> Result<Self, LoaderError> {
        let cpus = online_cpus().map_err(LoaderError::OnlineCpus)?;
        info!("Spawning perf readers for {} CPUs", cpus.len());

        let (tx, records) = ChannelSource::new(capacity);
        let mut readers = Vec::with_capacity(cpus.len());

        for cpu_id in cpus {
            let mut buf = perf_array
                .open(cpu_id, None)
                .map_err(|source| LoaderError::PerfOpen {
                    cpu: cpu_id,
                    source,
                })?;
            let tx = tx.clone();

            readers.push(tokio::spawn(async move {
                let mut buffers = (0..PERF_BATCH)
                    .map(|_| BytesMut::with_capacity(PERF_RECORD_CAPACITY))
                    .collect::<Vec<_>>();

                loop {
                    let events = match buf.read_events(&mut buffers).await {
                        Ok(events) => events,
                        Err(source) => {
                            let fault = RingBufferError::PerfBuffer {
                                cpu: cpu_id,
                                source,
                            };
                            // The consumer may already be gone; nothing else to do.
                            let _ = tx.send(Err(fault)).await;
                            return;
                        }
                    };

                    if events.lost > 0 {
                        warn!("CPU {}: kernel dropped {} samples", cpu_id, events.lost);
                    }

                    for sample in buffers.iter().take(events.read) {
                        if tx.send(Ok(Bytes::copy_from_slice(sample))).await.is_err() {
                            debug!("CPU {} reader stopping, consumer closed", cpu_id);
                            return;
                        }
                    }
                }
            }));
        }

        Ok(Self { records, readers })
    }

    fn abort_readers(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl RecordSource for PerfArraySource {
    async fn next_record(&mut self) -> Result<Option<Bytes>, RingBufferError> {
        self.records.next_record().await
    }

    fn close(&mut self) {
        self.abort_readers();
        self.records.close();
    }
}

impl Drop for PerfArraySource {
    fn drop(&mut self) {
        self.abort_readers();
    }
}

/// Whichever kernel transport the loader opened
pub enum ProbeSource {
    RingBuf(RingBufSource),
    Perf(PerfArraySource),
}

impl RecordSource for ProbeSource {
    async fn next_record(&mut self) -> Result<Option<Bytes>, RingBufferError> {
        match self {
            Self::RingBuf(source) => source.next_record().await,
            Self::Perf(source) => source.next_record().await,
        }
    }

    fn close(&mut self) {
        match self {
            Self::RingBuf(source) => source.close(),
            Self::Perf(source) => source.close(),
        }
    }
}
