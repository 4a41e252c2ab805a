//! Ring buffer read loop
//!
//! Pulls raw records off a [`RecordSource`], decodes them and hands the
//! results to an [`EventSink`]. A malformed record is counted and skipped;
//! a transport fault or a sink write failure ends the session.

use crate::{
    decoder::RecordDecoder,
    error::{RingBufferError, SessionError},
    shutdown::ShutdownSignal,
    sink::EventSink,
    source::RecordSource,
    types::SessionStats,
};
use log::{debug, info, warn};
use std::{future::pending, time::Duration};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// State owned by one consumer run
pub struct ConsumerSession<S: RecordSource> {
    source: S,
    shutdown: ShutdownSignal,
    decoder: RecordDecoder,
    stats: SessionStats,
    closed: bool,
}

impl<S: RecordSource> ConsumerSession<S> {
    pub fn new(source: S, shutdown: ShutdownSignal, decoder: RecordDecoder) -> Self {
        Self {
            source,
            shutdown,
            decoder,
            stats: SessionStats::default(),
            closed: false,
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        if !self.closed {
            self.source.close();
            self.closed = true;
        }
    }
}

/// Drives records from a ring buffer into a sink until shutdown
pub struct RingBufferConsumer<K: EventSink> {
    sink: K,
    diagnostics: bool,
    progress_interval: Option<Duration>,
}

impl<K: EventSink> RingBufferConsumer<K> {
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            diagnostics: false,
            progress_interval: None,
        }
    }

    /// Forward dropped-record diagnostics to the sink
    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Log session counters every `period`
    pub fn with_progress_interval(mut self, period: Option<Duration>) -> Self {
        self.progress_interval = period;
        self
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Run the read loop
    ///
    /// Returns the session counters once shutdown is requested. A shutdown
    /// request always wins over a ready record, and the source is closed
    /// exactly once before returning.
    ///
    /// # Errors
    ///
    /// * [`SessionError::RingBuffer`] - the handle failed or closed without a
    ///   shutdown request; the fault is reported to the sink first
    /// * [`SessionError::Sink`] - the sink could not be written
    pub async fn run<S: RecordSource>(
        &mut self,
        session: &mut ConsumerSession<S>,
    ) -> Result<SessionStats, SessionError> {
        let mut progress = self.progress_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        debug!("Consumer started, minimum record size {}", session.decoder.min_len());

        loop {
            tokio::select! {
                biased;

                _ = session.shutdown.cancelled() => {
                    session.close();
                    info!("Shutdown requested, ring buffer closed");
                    break;
                }

                _ = next_tick(&mut progress) => {
                    info!(
                        "Progress: {} events processed, {} dropped",
                        session.stats.processed, session.stats.dropped
                    );
                }

                received = session.source.next_record() => match received {
                    Ok(Some(raw)) => {
                        if let Err(e) = self.handle_record(session, &raw) {
                            session.close();
                            return Err(e);
                        }
                    }
                    Ok(None) if session.shutdown.is_triggered() => {
                        session.close();
                        break;
                    }
                    Ok(None) => return self.fail(session, RingBufferError::Closed),
                    Err(fault) => return self.fail(session, fault),
                },
            }
        }

        self.sink.flush().map_err(SessionError::Sink)?;
        Ok(session.stats)
    }

    fn handle_record<S: RecordSource>(
        &mut self,
        session: &mut ConsumerSession<S>,
        raw: &[u8],
    ) -> Result<(), SessionError> {
        match session.decoder.decode(raw) {
            Ok(event) => {
                self.sink.on_event(&event).map_err(SessionError::Sink)?;
                session.stats.processed += 1;
            }
            Err(e) => {
                session.stats.dropped += 1;
                debug!("Dropping record: {}", e);
                if self.diagnostics {
                    self.sink.on_dropped(&e).map_err(SessionError::Sink)?;
                }
            }
        }
        Ok(())
    }

    fn fail<S: RecordSource>(
        &mut self,
        session: &mut ConsumerSession<S>,
        fault: RingBufferError,
    ) -> Result<SessionStats, SessionError> {
        session.close();
        if let Err(e) = self.sink.on_fault(&fault).and_then(|()| self.sink.flush()) {
            warn!("Failed to report ring buffer fault to sink: {}", e);
        }
        Err(fault.into())
    }
}

async fn next_tick(progress: &mut Option<Interval>) {
    match progress {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}
