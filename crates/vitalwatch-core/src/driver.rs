//! Command sequences and frame classification for the Vital Watch.
//!
//! The driver keeps no state of its own: it encodes commands, hands them to
//! the session, and routes decoded frames to the publisher and the store.
//! Writes are fire-and-forget; the watch never acknowledges them.

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::codec::{self, decode_notification, encode_command, opcode, DecodedFrame};
use crate::publisher::LinkStatePublisher;
use crate::session::{LinkError, LinkSession};
use crate::storage::SnapshotStore;
use crate::transport::Transport;
use crate::types::VitalsSnapshot;

/// Payload of `START_REALTIME_HEART`: enable, continuous.
const REALTIME_HEART_ON: [u8; 2] = [0x01, 0x01];
/// Payload of `START_REALTIME_SPO2_BP`: SpO2 + BP mode, enable.
const REALTIME_SPO2_BP_ON: [u8; 2] = [0x03, 0x01];
/// Payload of `START_MEASUREMENT` selecting the comprehensive snapshot.
const MEASURE_SNAPSHOT: [u8; 2] = [0x00, 0x00];
/// Payload of `START_MEASUREMENT` selecting the ECG stream.
const MEASURE_ECG: [u8; 2] = [0x01, 0x00];

/// How a notification was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Forwarded as a live update.
    Live,
    /// Forwarded as a completed snapshot and handed to the store.
    SnapshotComplete,
    /// Understood to be a report this gateway does not use.
    Ignored,
    /// Malformed; discarded.
    Dropped,
}

/// Issues command sequences and classifies decoded frames.
#[derive(Clone)]
pub struct ProtocolDriver {
    publisher: LinkStatePublisher,
    store: Arc<dyn SnapshotStore>,
}

impl ProtocolDriver {
    /// Create a driver that forwards to `publisher` and persists into `store`.
    pub fn new(publisher: LinkStatePublisher, store: Arc<dyn SnapshotStore>) -> Self {
        Self { publisher, store }
    }

    /// Start the continuous heart-rate/temperature and SpO2/BP streams.
    ///
    /// Both commands are always attempted; failures are only logged.
    pub async fn start_streaming<T: Transport>(&self, session: &LinkSession<T>) {
        for (op, payload) in [
            (opcode::START_REALTIME_HEART, REALTIME_HEART_ON),
            (opcode::START_REALTIME_SPO2_BP, REALTIME_SPO2_BP_ON),
        ] {
            if let Err(e) = Self::issue(session, op, &payload).await {
                error!(opcode = op, error = %e, "Failed to start real-time stream");
            }
        }
    }

    /// Ask the watch for a comprehensive measurement.
    ///
    /// The result arrives later as a snapshot frame; the caller owns any
    /// timeout.
    ///
    /// # Errors
    ///
    /// [`LinkError::NotReady`] if the watch is not connected, or a transport
    /// error if the write fails.
    pub async fn request_snapshot<T: Transport>(
        &self,
        session: &LinkSession<T>,
    ) -> Result<(), LinkError> {
        info!("Requesting vitals snapshot");
        Self::issue(session, opcode::START_MEASUREMENT, &MEASURE_SNAPSHOT).await
    }

    /// Start or stop the ECG stream.
    ///
    /// # Errors
    ///
    /// [`LinkError::NotReady`] if the watch is not connected, or a transport
    /// error if the write fails.
    pub async fn request_ecg_stream<T: Transport>(
        &self,
        session: &LinkSession<T>,
        start: bool,
    ) -> Result<(), LinkError> {
        if start {
            info!("Starting ECG stream");
            Self::issue(session, opcode::START_MEASUREMENT, &MEASURE_ECG).await
        } else {
            info!("Stopping ECG stream");
            Self::issue(session, opcode::STOP_MEASUREMENT, &[]).await
        }
    }

    /// Decode one notification and forward it.
    pub async fn handle_notification(&self, raw: &[u8]) -> FrameDisposition {
        match decode_notification(raw) {
            Ok(DecodedFrame::LiveReading(vitals)) => {
                trace!(heart_rate = vitals.heart_rate, "Live vitals");
                self.publisher.publish_live(vitals);
                FrameDisposition::Live
            }
            Ok(DecodedFrame::SnapshotReading(snapshot)) => {
                info!(heart_rate = snapshot.heart_rate, hrv = snapshot.hrv, "Vitals snapshot received");
                self.publisher.publish_snapshot(snapshot);
                self.persist(snapshot).await;
                FrameDisposition::SnapshotComplete
            }
            Ok(DecodedFrame::Unrecognized { identifier }) => {
                trace!(identifier, "Unhandled report");
                FrameDisposition::Ignored
            }
            Err(e) => {
                warn!(error = %e, frame = %codec::hex(raw), "Dropping malformed frame");
                FrameDisposition::Dropped
            }
        }
    }

    async fn issue<T: Transport>(
        session: &LinkSession<T>,
        op: u8,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        let frame = encode_command(op, payload)?;
        session.send(&frame).await
    }

    /// Store on a blocking thread. A failure is logged and otherwise ignored:
    /// the snapshot has already gone out to live viewers.
    async fn persist(&self, snapshot: VitalsSnapshot) {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(report)) => debug!(id = %report.id, "Snapshot report saved to storage"),
            Ok(Err(e)) => error!(error = %e, "Error saving snapshot report"),
            Err(e) => error!(error = %e, "Snapshot save task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::{broadcast, mpsc, watch};

    use super::*;
    use crate::config::DeviceConfig;
    use crate::device::DeviceCommand;
    use crate::publisher::{BroadcastPush, PushEvent};
    use crate::storage::{MemoryReportStore, StoreError, StoreResult};
    use crate::transport::{MockTransport, TransportEvent};
    use crate::types::{LinkStatus, PeerId, SnapshotReport};

    const WATCH: &str = "C4:7C:8D:6A:11:02";
    const SNAPSHOT_FRAME: [u8; 10] = [0x9C, 0x03, 45, 35, 70, 20, 120, 80, 50, 16];

    struct FailingStore;

    impl SnapshotStore for FailingStore {
        fn save(&self, _snapshot: &VitalsSnapshot) -> StoreResult<SnapshotReport> {
            Err(StoreError::WriteError {
                path: "/read-only/reports.json".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        fn recent(&self, _limit: usize) -> StoreResult<Vec<SnapshotReport>> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        driver: ProtocolDriver,
        session: LinkSession<MockTransport>,
        transport: Arc<MockTransport>,
        push: broadcast::Receiver<PushEvent>,
        _commands: mpsc::Receiver<DeviceCommand>,
    }

    fn fixture(store: Arc<dyn SnapshotStore>) -> Fixture {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let transport = Arc::new(MockTransport::new(events_tx));
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        let push = BroadcastPush::new(16);
        let push_rx = push.subscribe();
        let publisher = LinkStatePublisher::new(status_rx, Arc::new(push));
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let session = LinkSession::new(
            Arc::clone(&transport),
            DeviceConfig::default(),
            status_tx,
            publisher.clone(),
            commands_tx,
        );
        Fixture {
            driver: ProtocolDriver::new(publisher, store),
            session,
            transport,
            push: push_rx,
            _commands: commands_rx,
        }
    }

    async fn make_ready(f: &mut Fixture) {
        f.session
            .handle_event(TransportEvent::RadioStateChanged { powered: true })
            .await;
        f.session
            .handle_event(TransportEvent::PeerDiscovered {
                peer: PeerId::new(WATCH),
                services: vec![DeviceConfig::default().service_uuid],
                name: None,
            })
            .await;
    }

    fn frame(op: u8, payload: &[u8]) -> Vec<u8> {
        encode_command(op, payload).unwrap().as_bytes().to_vec()
    }

    #[tokio::test]
    async fn test_start_streaming_sends_both_commands_in_order() {
        let mut f = fixture(Arc::new(MemoryReportStore::new()));
        make_ready(&mut f).await;

        f.driver.start_streaming(&f.session).await;

        assert_eq!(
            f.transport.writes(),
            vec![frame(0x09, &[0x01, 0x01]), frame(0x28, &[0x03, 0x01])]
        );
    }

    #[tokio::test]
    async fn test_start_streaming_continues_after_failure() {
        let mut f = fixture(Arc::new(MemoryReportStore::new()));
        make_ready(&mut f).await;
        f.transport.fail_writes(true);

        f.driver.start_streaming(&f.session).await;

        assert_eq!(f.transport.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_and_ecg_commands() {
        let mut f = fixture(Arc::new(MemoryReportStore::new()));
        make_ready(&mut f).await;

        f.driver.request_snapshot(&f.session).await.unwrap();
        f.driver.request_ecg_stream(&f.session, true).await.unwrap();
        f.driver.request_ecg_stream(&f.session, false).await.unwrap();

        assert_eq!(
            f.transport.writes(),
            vec![
                frame(0x99, &[0x00, 0x00]),
                frame(0x99, &[0x01, 0x00]),
                frame(0x98, &[]),
            ]
        );
    }

    #[tokio::test]
    async fn test_snapshot_request_when_not_ready() {
        let f = fixture(Arc::new(MemoryReportStore::new()));

        let err = f.driver.request_snapshot(&f.session).await.unwrap_err();

        assert!(matches!(err, LinkError::NotReady { .. }));
        assert!(f.transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_live_frame_is_forwarded_not_stored() {
        let store = Arc::new(MemoryReportStore::new());
        let mut f = fixture(store.clone());

        let disposition = f
            .driver
            .handle_notification(&[0x28, 0x00, 72, 98, 0, 0, 118, 76])
            .await;

        assert_eq!(disposition, FrameDisposition::Live);
        assert!(matches!(
            f.push.recv().await.unwrap(),
            PushEvent::Live(v) if v.heart_rate == 72 && v.bp_systolic == 118
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_frame_is_forwarded_and_stored() {
        let store = Arc::new(MemoryReportStore::new());
        let mut f = fixture(store.clone());

        let disposition = f.driver.handle_notification(&SNAPSHOT_FRAME).await;

        assert_eq!(disposition, FrameDisposition::SnapshotComplete);
        assert!(matches!(
            f.push.recv().await.unwrap(),
            PushEvent::Snapshot(s) if s.hrv == 45 && s.respiration_rate == 16
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(store.recent(1).unwrap()[0].snapshot.mood, 50);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_forwarding() {
        let mut f = fixture(Arc::new(FailingStore));

        let disposition = f.driver.handle_notification(&SNAPSHOT_FRAME).await;

        assert_eq!(disposition, FrameDisposition::SnapshotComplete);
        assert!(matches!(f.push.recv().await.unwrap(), PushEvent::Snapshot(_)));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_frames() {
        let mut f = fixture(Arc::new(MemoryReportStore::new()));

        assert_eq!(
            f.driver.handle_notification(&[0xAA, 0x01, 0x02]).await,
            FrameDisposition::Ignored
        );
        assert_eq!(
            f.driver.handle_notification(&[0x28, 0x00]).await,
            FrameDisposition::Dropped
        );
        assert!(f.push.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_written_commands_never_reach_the_decoder() {
        let mut f = fixture(Arc::new(MemoryReportStore::new()));
        make_ready(&mut f).await;

        // 0x28 is both the SpO2/BP start opcode and the live report id.
        f.driver.start_streaming(&f.session).await;

        assert!(f.push.try_recv().is_err());
    }
}
