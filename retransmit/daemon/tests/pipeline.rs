//! End-to-end consumer runs over in-memory sources

use bytes::Bytes;
use proptest::prelude::*;
use retransmit_probe::{
    sink::TextSink, ChannelSource, ConsumerSession, DecodeError, EventSink, RecordDecoder,
    RecordSource, RetransmitEvent, RingBufferConsumer, RingBufferError, SessionError,
    SessionStats, ShutdownCoordinator, ShutdownState,
};
use std::{
    collections::VecDeque,
    future::pending,
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::timeout;

/// Hands out a fixed script of records, then requests shutdown and blocks
struct ScriptedSource {
    records: VecDeque<Bytes>,
    coordinator: Arc<ShutdownCoordinator>,
    closes: Arc<AtomicUsize>,
}

impl RecordSource for ScriptedSource {
    async fn next_record(&mut self) -> Result<Option<Bytes>, RingBufferError> {
        if let Some(record) = self.records.pop_front() {
            return Ok(Some(record));
        }
        self.coordinator.trigger();
        pending().await
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CaptureSink {
    events: Vec<RetransmitEvent>,
    dropped: Vec<DecodeError>,
}

impl EventSink for CaptureSink {
    fn on_event(&mut self, event: &RetransmitEvent) -> io::Result<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn on_dropped(&mut self, error: &DecodeError) -> io::Result<()> {
        self.dropped.push(*error);
        Ok(())
    }
}

/// 32-byte legacy IPv4 counter record
fn counter_record(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, retrans: u32) -> Bytes {
    let mut buf = Vec::with_capacity(32);
    buf.extend_from_slice(&sport.to_le_bytes());
    buf.extend_from_slice(&dport.to_le_bytes());
    buf.extend_from_slice(&src);
    buf.extend_from_slice(&dst);
    for value in [retrans, 200_000, 1_250, 10, 7] {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    Bytes::from(buf)
}

/// 64-byte connection state record for an IPv4 flow
fn conn_state_record(state: i32) -> Bytes {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&42_000u64.to_le_bytes());
    buf.extend_from_slice(&1234u32.to_le_bytes());
    buf.extend_from_slice(&5555u16.to_le_bytes());
    buf.extend_from_slice(&22u16.to_le_bytes());
    buf.extend_from_slice(&[192, 168, 1, 1]);
    buf.extend_from_slice(&[192, 168, 1, 2]);
    buf.extend_from_slice(&[0u8; 32]);
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&[0u8; 2]);
    buf.extend_from_slice(&state.to_le_bytes());
    Bytes::from(buf)
}

fn scripted(
    records: Vec<Bytes>,
) -> (
    Arc<ShutdownCoordinator>,
    Arc<AtomicUsize>,
    ConsumerSession<ScriptedSource>,
) {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let closes = Arc::new(AtomicUsize::new(0));
    let source = ScriptedSource {
        records: records.into(),
        coordinator: Arc::clone(&coordinator),
        closes: Arc::clone(&closes),
    };
    let session = ConsumerSession::new(source, coordinator.subscribe(), RecordDecoder::default());
    (coordinator, closes, session)
}

#[tokio::test]
async fn test_text_output_end_to_end() {
    let (coordinator, closes, mut session) = scripted(vec![
        counter_record([10, 0, 0, 1], 4000, [10, 0, 0, 2], 80, 3),
        conn_state_record(1),
    ]);
    let mut consumer = RingBufferConsumer::new(TextSink::new(Vec::new()));

    let stats = timeout(Duration::from_secs(1), consumer.run(&mut session))
        .await
        .expect("session should stop")
        .unwrap();

    assert_eq!(stats, SessionStats { processed: 2, dropped: 0 });
    assert_eq!(coordinator.state(), ShutdownState::Triggered);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let out = String::from_utf8(consumer.into_sink().into_inner()).unwrap();
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(
        lines[0],
        "Event: Schema=counter_v1, IPFamily=ipv4, Source=10.0.0.1:4000, \
         Destination=10.0.0.2:80, Retrans=3, RTO=200000, RTT=1250, SndCwnd=10, Ssthresh=7"
    );
    assert!(lines[1].starts_with("Event: Timestamp=42000, PID=1234,"));
    assert!(lines[1].contains("Source=192.168.1.1:5555, Destination=192.168.1.2:22"));
    assert!(lines[1].contains("State=1 (ESTABLISHED)"));
}

#[tokio::test]
async fn test_repeated_trigger_closes_once() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let (_tx, source) = ChannelSource::new(4);
    let mut session = ConsumerSession::new(source, coordinator.subscribe(), RecordDecoder::default());
    let mut consumer = RingBufferConsumer::new(CaptureSink::default());

    for _ in 0..3 {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            coordinator.trigger();
        });
    }

    let stats = timeout(Duration::from_secs(1), consumer.run(&mut session))
        .await
        .expect("session should stop")
        .unwrap();

    assert_eq!(stats.received(), 0);
    assert!(session.is_closed());
    assert!(!coordinator.trigger());
}

#[tokio::test]
async fn test_closed_handle_reports_fault() {
    let coordinator = ShutdownCoordinator::new();
    let (tx, source) = ChannelSource::new(4);
    tx.send(Ok(counter_record([1, 1, 1, 1], 1, [2, 2, 2, 2], 2, 1)))
        .await
        .unwrap();
    drop(tx);

    let mut session = ConsumerSession::new(source, coordinator.subscribe(), RecordDecoder::default());
    let mut consumer = RingBufferConsumer::new(TextSink::new(Vec::new()));

    let err = consumer.run(&mut session).await.unwrap_err();
    assert!(matches!(err, SessionError::RingBuffer(RingBufferError::Closed)));

    let out = String::from_utf8(consumer.into_sink().into_inner()).unwrap();
    assert!(out.lines().last().unwrap().starts_with("Fault:"));
    assert_eq!(out.lines().count(), 2);
}

fn run_script(records: Vec<Bytes>) -> (SessionStats, CaptureSink, usize) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let (_coordinator, closes, mut session) = scripted(records);
        let mut consumer = RingBufferConsumer::new(CaptureSink::default()).with_diagnostics(true);
        let stats = consumer.run(&mut session).await.unwrap();
        (stats, consumer.into_sink(), closes.load(Ordering::SeqCst))
    })
}

proptest! {
    #[test]
    fn prop_interleaved_good_and_bad_records(
        script in prop::collection::vec(
            prop_oneof![
                (1u32..1000).prop_map(Ok::<u32, usize>),
                // No layout is shorter than 32 or sits between 33 and 63 bytes.
                (0usize..64).prop_filter("valid length", |len| *len != 32).prop_map(Err::<u32, usize>),
            ],
            0..64,
        )
    ) {
        let records: Vec<Bytes> = script
            .iter()
            .map(|entry| match entry {
                Ok(retrans) => counter_record([10, 0, 0, 1], 4000, [10, 0, 0, 2], 80, *retrans),
                Err(len) => Bytes::from(vec![0xAB; *len]),
            })
            .collect();
        let good: Vec<u32> = script.iter().filter_map(|e| e.as_ref().ok().copied()).collect();
        let bad: Vec<usize> = script.iter().filter_map(|e| e.as_ref().err().copied()).collect();

        let (stats, sink, closes) = run_script(records);

        prop_assert_eq!(stats.processed, good.len() as u64);
        prop_assert_eq!(stats.dropped, bad.len() as u64);
        prop_assert_eq!(closes, 1);

        let delivered: Vec<u32> = sink
            .events
            .iter()
            .filter_map(|e| e.retransmit_count())
            .collect();
        prop_assert_eq!(delivered, good);

        let dropped_lens: Vec<usize> = sink.dropped.iter().map(|e| e.record_len()).collect();
        prop_assert_eq!(dropped_lens, bad);
    }
}
