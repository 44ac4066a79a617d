//! In-process transport for tests and hardware-free development.
//!
//! Every call is recorded. Failures can be injected per operation. In
//! simulated mode the mock also behaves like a watch on the bench: it
//! advertises when a scan starts, streams live vitals once the SpO2/BP stream
//! is started and answers a snapshot request after a short measurement delay.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::{Transport, TransportError, TransportEvent, TransportResult};
use crate::codec::{opcode, report};
use crate::types::PeerId;

const SIMULATED_PEER: &str = "5E:4D:00:00:00:01";
const SIMULATED_LIVE_PERIOD: Duration = Duration::from_secs(1);
const SIMULATED_MEASUREMENT_TIME: Duration = Duration::from_secs(3);

/// A call made against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `start_scan` with the service filter.
    StartScan(Uuid),
    /// `stop_scan`.
    StopScan,
    /// `connect` to a peer.
    Connect(PeerId),
    /// `discover_characteristics` for a service.
    Discover(Uuid),
    /// `subscribe` to a characteristic.
    Subscribe(Uuid),
    /// `write` of raw bytes.
    Write(Vec<u8>),
    /// `disconnect` from a peer.
    Disconnect(PeerId),
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    fail_scan: bool,
    fail_connect: bool,
    fail_writes: bool,
    missing: Vec<Uuid>,
    connect_gate: Option<Arc<Notify>>,
    simulated_name: Option<String>,
    live_stream: Option<JoinHandle<()>>,
}

/// Scriptable [`Transport`] implementation.
pub struct MockTransport {
    events: mpsc::Sender<TransportEvent>,
    state: Mutex<MockState>,
}

impl MockTransport {
    /// A mock that only records calls.
    #[must_use]
    pub fn new(events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            events,
            state: Mutex::new(MockState::default()),
        }
    }

    /// A mock that behaves like a watch advertising as `name`.
    ///
    /// Reports the radio as powered on right away.
    #[must_use]
    pub fn simulated(events: mpsc::Sender<TransportEvent>, name: impl Into<String>) -> Self {
        let mock = Self::new(events);
        mock.lock().simulated_name = Some(name.into());
        mock.emit(TransportEvent::RadioStateChanged { powered: true }, Duration::ZERO);
        mock
    }

    /// Make `start_scan` fail.
    pub fn fail_scan(&self, fail: bool) {
        self.lock().fail_scan = fail;
    }

    /// Make `connect` fail.
    pub fn fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    /// Make every `write` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Park the next `connect` until the returned gate is notified.
    pub fn hold_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().connect_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Leave `uuid` out of characteristic discovery results.
    pub fn omit_characteristic(&self, uuid: Uuid) {
        self.lock().missing.push(uuid);
    }

    /// Every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Bytes of every write recorded so far.
    #[must_use]
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: MockCall) -> MutexGuard<'_, MockState> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }

    /// Deliver an event from a detached task so the caller never waits on
    /// the channel it is itself draining.
    fn emit(&self, event: TransportEvent, after: Duration) {
        let events = self.events.clone();
        tokio::spawn(async move {
            if !after.is_zero() {
                tokio::time::sleep(after).await;
            }
            let _ = events.send(event).await;
        });
    }

    fn start_live_stream(&self) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SIMULATED_LIVE_PERIOD);
            let mut beat: u8 = 0;
            loop {
                ticker.tick().await;
                beat = beat.wrapping_add(1);
                let data = vec![
                    report::LIVE_VITALS,
                    0x00,
                    68 + beat % 8,
                    97 + beat % 2,
                    0x00,
                    0x00,
                    116 + beat % 5,
                    76,
                ];
                let event = TransportEvent::Notification {
                    peer: PeerId::new(SIMULATED_PEER),
                    data,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        })
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if let Some(stream) = self.lock().live_stream.take() {
            stream.abort();
        }
    }
}

impl Transport for MockTransport {
    type Link = PeerId;
    type Characteristic = Uuid;

    async fn start_scan(&self, service: Uuid) -> TransportResult<()> {
        let state = self.record(MockCall::StartScan(service));
        if state.fail_scan {
            return Err(TransportError::ScanFailed {
                message: "injected scan failure".into(),
            });
        }
        if let Some(name) = state.simulated_name.clone() {
            drop(state);
            self.emit(
                TransportEvent::PeerDiscovered {
                    peer: PeerId::new(SIMULATED_PEER),
                    services: vec![service],
                    name: Some(name),
                },
                Duration::ZERO,
            );
        }
        Ok(())
    }

    async fn stop_scan(&self) -> TransportResult<()> {
        self.record(MockCall::StopScan);
        Ok(())
    }

    async fn connect(&self, peer: &PeerId) -> TransportResult<PeerId> {
        let gate = self.record(MockCall::Connect(peer.clone())).connect_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.lock().fail_connect {
            return Err(TransportError::ConnectFailed {
                peer: peer.to_string(),
                message: "injected connect failure".into(),
            });
        }
        Ok(peer.clone())
    }

    async fn discover_characteristics(
        &self,
        _link: &PeerId,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> TransportResult<Vec<(Uuid, Uuid)>> {
        let state = self.record(MockCall::Discover(service));
        Ok(characteristics
            .iter()
            .filter(|uuid| !state.missing.contains(uuid))
            .map(|uuid| (*uuid, *uuid))
            .collect())
    }

    async fn subscribe(&self, _link: &PeerId, characteristic: &Uuid) -> TransportResult<()> {
        self.record(MockCall::Subscribe(*characteristic));
        Ok(())
    }

    async fn write(&self, _characteristic: &Uuid, bytes: &[u8]) -> TransportResult<()> {
        let mut state = self.record(MockCall::Write(bytes.to_vec()));
        if state.fail_writes {
            return Err(TransportError::WriteFailed {
                message: "injected write failure".into(),
            });
        }
        if state.simulated_name.is_none() {
            return Ok(());
        }

        match (bytes.first().copied(), bytes.get(1).copied()) {
            (Some(opcode::START_REALTIME_SPO2_BP), _) if state.live_stream.is_none() => {
                debug!("Simulated watch starting live stream");
                state.live_stream = Some(self.start_live_stream());
            }
            (Some(opcode::START_MEASUREMENT), Some(0x00)) => {
                drop(state);
                self.emit(
                    TransportEvent::Notification {
                        peer: PeerId::new(SIMULATED_PEER),
                        data: vec![
                            report::MEASUREMENT,
                            report::MEASUREMENT_SNAPSHOT,
                            45,
                            35,
                            70,
                            20,
                            120,
                            80,
                            50,
                            16,
                        ],
                    },
                    SIMULATED_MEASUREMENT_TIME,
                );
            }
            _ => {}
        }
        Ok(())
    }

    async fn disconnect(&self, link: &PeerId) -> TransportResult<()> {
        let mut state = self.record(MockCall::Disconnect(link.clone()));
        if let Some(stream) = state.live_stream.take() {
            stream.abort();
        }
        Ok(())
    }
}
