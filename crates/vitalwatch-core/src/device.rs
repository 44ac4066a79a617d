//! The single task that owns the device slot.
//!
//! Transport events and commands are funnelled into one loop, which makes
//! every state transition and every decode-then-forward step run strictly one
//! at a time and in arrival order. Everything outside the loop talks to it
//! through a cloneable [`DeviceHandle`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, field, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::DeviceConfig;
use crate::driver::ProtocolDriver;
use crate::error::{Result, VitalWatchError};
use crate::publisher::{LinkStatePublisher, PushSink};
use crate::session::{LinkError, LinkSession, SessionOutcome};
use crate::storage::SnapshotStore;
use crate::transport::{Transport, TransportEvent};
use crate::types::LinkStatus;

type Reply = oneshot::Sender<std::result::Result<(), LinkError>>;

/// Requests handled by the device loop.
#[derive(Debug)]
pub enum DeviceCommand {
    /// Start a comprehensive measurement.
    RequestSnapshot {
        /// Outcome of issuing the command.
        reply: Reply,
    },
    /// Start (`true`) or stop (`false`) the ECG stream.
    EcgStream {
        /// Whether to start or stop.
        start: bool,
        /// Outcome of issuing the command.
        reply: Reply,
    },
    /// Restart scanning after an abandoned connection attempt.
    Rescan {
        /// Whether a scan was started.
        reply: oneshot::Sender<bool>,
    },
    /// The fixed reconnect delay elapsed.
    ReconnectDue,
}

/// Cloneable entry point to the running device loop.
///
/// These are the hooks the push channel and the HTTP layer call into.
#[derive(Clone)]
pub struct DeviceHandle {
    commands: mpsc::Sender<DeviceCommand>,
    publisher: LinkStatePublisher,
}

impl DeviceHandle {
    /// Current radio/device status. Never blocks.
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        self.publisher.current_status()
    }

    /// Observe status changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.publisher.watch_status()
    }

    /// Ask the watch for a comprehensive snapshot.
    ///
    /// Returns once the command is written; the result arrives on the
    /// `vitals-snapshot-result` topic.
    ///
    /// # Errors
    ///
    /// [`VitalWatchError::DeviceNotReady`] if the watch is not connected.
    pub async fn request_snapshot(&self) -> Result<()> {
        self.call(|reply| DeviceCommand::RequestSnapshot { reply })
            .await?
            .map_err(Into::into)
    }

    /// Start the ECG stream.
    ///
    /// # Errors
    ///
    /// [`VitalWatchError::DeviceNotReady`] if the watch is not connected.
    pub async fn start_ecg(&self) -> Result<()> {
        self.call(|reply| DeviceCommand::EcgStream { start: true, reply })
            .await?
            .map_err(Into::into)
    }

    /// Stop the ECG stream.
    ///
    /// # Errors
    ///
    /// [`VitalWatchError::DeviceNotReady`] if the watch is not connected.
    pub async fn stop_ecg(&self) -> Result<()> {
        self.call(|reply| DeviceCommand::EcgStream {
            start: false,
            reply,
        })
        .await?
        .map_err(Into::into)
    }

    /// Rescan manually. Returns `false` when the link is not `Disconnected`.
    ///
    /// # Errors
    ///
    /// [`VitalWatchError::DeviceActorStopped`] if the loop has exited.
    pub async fn rescan(&self) -> Result<bool> {
        self.call(|reply| DeviceCommand::Rescan { reply }).await
    }

    async fn call<R>(&self, command: impl FnOnce(oneshot::Sender<R>) -> DeviceCommand) -> Result<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| VitalWatchError::DeviceActorStopped)?;
        response
            .await
            .map_err(|_| VitalWatchError::DeviceActorStopped)
    }
}

/// Owns the session and driver and runs the event loop.
pub struct DeviceActor<T: Transport> {
    service: Uuid,
    session: LinkSession<T>,
    driver: ProtocolDriver,
    events: mpsc::Receiver<TransportEvent>,
    commands: mpsc::Receiver<DeviceCommand>,
}

impl<T: Transport> DeviceActor<T> {
    /// Wire session, driver and publisher together.
    ///
    /// `events` must be the receiving end of the channel `transport` reports
    /// on.
    pub fn new(
        transport: Arc<T>,
        events: mpsc::Receiver<TransportEvent>,
        device: DeviceConfig,
        push: Arc<dyn PushSink>,
        store: Arc<dyn SnapshotStore>,
    ) -> (Self, DeviceHandle) {
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        let (commands_tx, commands_rx) = mpsc::channel(device.command_queue_depth);
        let service = device.service_uuid;
        let publisher = LinkStatePublisher::new(status_rx, push);
        let session = LinkSession::new(
            transport,
            device,
            status_tx,
            publisher.clone(),
            commands_tx.clone(),
        );
        let driver = ProtocolDriver::new(publisher.clone(), store);

        let actor = Self {
            service,
            session,
            driver,
            events,
            commands: commands_rx,
        };
        let handle = DeviceHandle {
            commands: commands_tx,
            publisher,
        };
        (actor, handle)
    }

    /// Spawn the loop on the current runtime.
    ///
    /// The loop runs in a `device` span carrying the service UUID and, once a
    /// watch has been found, its `peer` address.
    pub fn spawn(self) -> JoinHandle<()> {
        let span = info_span!("device", service = %self.service, peer = field::Empty);
        tokio::spawn(self.run().instrument(span))
    }

    /// Run until the transport event channel closes.
    pub async fn run(mut self) {
        info!("Device loop started");
        loop {
            // Unbiased, so a steady notification stream cannot starve commands.
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    self.on_event(event).await;
                }
                Some(command) = self.commands.recv() => {
                    self.on_command(command).await;
                }
            }
        }
        info!("Transport event channel closed, device loop stopped");
    }

    async fn on_event(&mut self, event: TransportEvent) {
        match self.session.handle_event(event).await {
            SessionOutcome::Idle => {}
            SessionOutcome::Ready => self.driver.start_streaming(&self.session).await,
            SessionOutcome::Frame(data) => {
                let disposition = self.driver.handle_notification(&data).await;
                debug!(?disposition, "Frame handled");
            }
        }
    }

    async fn on_command(&mut self, command: DeviceCommand) {
        match command {
            DeviceCommand::RequestSnapshot { reply } => {
                let result = self.driver.request_snapshot(&self.session).await;
                let _ = reply.send(result);
            }
            DeviceCommand::EcgStream { start, reply } => {
                let result = self.driver.request_ecg_stream(&self.session, start).await;
                let _ = reply.send(result);
            }
            DeviceCommand::Rescan { reply } => {
                let started = self.session.rescan().await;
                let _ = reply.send(started);
            }
            DeviceCommand::ReconnectDue => self.session.on_reconnect_due().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::broadcast;

    use super::*;
    use crate::publisher::{BroadcastPush, PushEvent};
    use crate::storage::MemoryReportStore;
    use crate::transport::{MockCall, MockTransport};
    use crate::types::{LinkState, PeerId};

    const WATCH: &str = "C4:7C:8D:6A:11:02";

    struct Running {
        handle: DeviceHandle,
        events: mpsc::Sender<TransportEvent>,
        transport: Arc<MockTransport>,
        store: Arc<MemoryReportStore>,
        push: broadcast::Receiver<PushEvent>,
        _task: JoinHandle<()>,
    }

    fn start() -> Running {
        let (events_tx, events_rx) = mpsc::channel(64);
        let transport = Arc::new(MockTransport::new(events_tx.clone()));
        let push = BroadcastPush::new(64);
        let push_rx = push.subscribe();
        let store = Arc::new(MemoryReportStore::new());
        let (actor, handle) = DeviceActor::new(
            Arc::clone(&transport),
            events_rx,
            DeviceConfig::default(),
            Arc::new(push),
            store.clone(),
        );
        Running {
            handle,
            events: events_tx,
            transport,
            store,
            push: push_rx,
            _task: actor.spawn(),
        }
    }

    async fn wait_for_state(handle: &DeviceHandle, state: LinkState) {
        let mut status = handle.watch_status();
        status.wait_for(|s| s.state == state).await.unwrap();
    }

    async fn bring_up(r: &Running) {
        r.events
            .send(TransportEvent::RadioStateChanged { powered: true })
            .await
            .unwrap();
        r.events
            .send(TransportEvent::PeerDiscovered {
                peer: PeerId::new(WATCH),
                services: vec![DeviceConfig::default().service_uuid],
                name: Some("VitalWatch-7F2A".into()),
            })
            .await
            .unwrap();
        wait_for_state(&r.handle, LinkState::Ready).await;
    }

    #[tokio::test]
    async fn test_ready_starts_streaming() {
        let r = start();
        bring_up(&r).await;

        // Streaming commands are written right after the Ready transition.
        r.handle.request_snapshot().await.unwrap();
        let writes = r.transport.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0][0], 0x09);
        assert_eq!(writes[1][0], 0x28);
        assert_eq!(&writes[2][..3], &[0x99, 0x00, 0x00]);

        let status = r.handle.status();
        assert!(status.radio_on);
        assert!(status.device_connected);
        assert_eq!(status.device_name.as_deref(), Some("VitalWatch-7F2A"));
    }

    #[tokio::test]
    async fn test_commands_rejected_until_ready() {
        let r = start();

        let err = r.handle.request_snapshot().await.unwrap_err();
        assert!(matches!(err, VitalWatchError::DeviceNotReady));
        let err = r.handle.start_ecg().await.unwrap_err();
        assert!(matches!(err, VitalWatchError::DeviceNotReady));
        assert!(r.transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_notifications_forwarded_in_order() {
        let mut r = start();
        bring_up(&r).await;

        for hr in [70u8, 71, 72] {
            r.events
                .send(TransportEvent::Notification {
                    peer: PeerId::new(WATCH),
                    data: vec![0x28, 0, hr, 98, 0, 0, 118, 76],
                })
                .await
                .unwrap();
        }
        r.events
            .send(TransportEvent::Notification {
                peer: PeerId::new(WATCH),
                data: vec![0x9C, 0x03, 45, 35, 70, 20, 120, 80, 50, 16],
            })
            .await
            .unwrap();

        let mut received = Vec::new();
        for _ in 0..4 {
            received.push(r.push.recv().await.unwrap());
        }
        let heart_rates: Vec<u8> = received
            .iter()
            .filter_map(|event| match event {
                PushEvent::Live(v) => Some(v.heart_rate),
                _ => None,
            })
            .collect();
        assert_eq!(heart_rates, vec![70, 71, 72]);
        assert!(matches!(received[3], PushEvent::Snapshot(s) if s.stress == 20));

        // The snapshot is stored before the next event is processed.
        r.handle.stop_ecg().await.unwrap();
        assert_eq!(r.store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_goes_offline_then_rescans() {
        let mut r = start();
        bring_up(&r).await;

        r.events
            .send(TransportEvent::Disconnected {
                peer: PeerId::new(WATCH),
            })
            .await
            .unwrap();

        wait_for_state(&r.handle, LinkState::Disconnected).await;
        assert_eq!(r.push.recv().await.unwrap(), PushEvent::Offline);
        assert!(r.handle.status().device_name.is_none());

        let before = tokio::time::Instant::now();
        wait_for_state(&r.handle, LinkState::Scanning).await;
        assert!(before.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_manual_rescan_only_when_disconnected() {
        let r = start();
        r.events
            .send(TransportEvent::RadioStateChanged { powered: true })
            .await
            .unwrap();
        wait_for_state(&r.handle, LinkState::Scanning).await;

        assert!(!r.handle.rescan().await.unwrap());

        r.transport
            .omit_characteristic(DeviceConfig::default().write_characteristic_uuid);
        r.events
            .send(TransportEvent::PeerDiscovered {
                peer: PeerId::new(WATCH),
                services: vec![DeviceConfig::default().service_uuid],
                name: None,
            })
            .await
            .unwrap();
        wait_for_state(&r.handle, LinkState::Disconnected).await;

        assert!(r.handle.rescan().await.unwrap());
        assert_eq!(r.handle.status().state, LinkState::Scanning);
    }

    #[tokio::test]
    async fn test_state_stays_connecting_while_connect_is_pending() {
        let mut r = start();
        let gate = r.transport.hold_connect();
        r.events
            .send(TransportEvent::RadioStateChanged { powered: true })
            .await
            .unwrap();
        r.events
            .send(TransportEvent::PeerDiscovered {
                peer: PeerId::new(WATCH),
                services: vec![DeviceConfig::default().service_uuid],
                name: Some("VitalWatch-7F2A".into()),
            })
            .await
            .unwrap();
        wait_for_state(&r.handle, LinkState::Connecting).await;

        let status = r.handle.status();
        assert!(status.radio_on);
        assert!(!status.device_connected);
        assert_eq!(status.device_name, None);

        let rescan = tokio::spawn({
            let handle = r.handle.clone();
            async move { handle.rescan().await }
        });
        r.events
            .send(TransportEvent::PeerDiscovered {
                peer: PeerId::new("AA:AA:AA:AA:AA:AA"),
                services: vec![DeviceConfig::default().service_uuid],
                name: None,
            })
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(r.handle.status().state, LinkState::Connecting);

        gate.notify_one();
        assert!(!rescan.await.unwrap().unwrap());
        wait_for_state(&r.handle, LinkState::Ready).await;

        // Events are handled in order, so the second discovery is behind us
        // once this frame comes out.
        r.events
            .send(TransportEvent::Notification {
                peer: PeerId::new(WATCH),
                data: vec![0x28, 0, 70, 98, 0, 0, 118, 76],
            })
            .await
            .unwrap();
        assert!(matches!(r.push.recv().await.unwrap(), PushEvent::Live(_)));

        let connects = r
            .transport
            .calls()
            .into_iter()
            .filter(|call| matches!(call, MockCall::Connect(_)))
            .count();
        assert_eq!(connects, 1);
        assert_eq!(r.handle.status().state, LinkState::Ready);
    }

    #[tokio::test]
    async fn test_commands_served_during_notification_flood() {
        let r = start();
        bring_up(&r).await;

        let events = r.events.clone();
        let flood = tokio::spawn(async move {
            let frame = TransportEvent::Notification {
                peer: PeerId::new(WATCH),
                data: vec![0x28, 0, 70, 98, 0, 0, 118, 76],
            };
            while events.send(frame.clone()).await.is_ok() {}
        });

        let served =
            tokio::time::timeout(Duration::from_secs(5), r.handle.request_snapshot()).await;
        flood.abort();
        assert!(matches!(served, Ok(Ok(()))));
        assert!(r
            .transport
            .writes()
            .iter()
            .any(|bytes| bytes.starts_with(&[0x99, 0x00, 0x00])));
    }

    #[tokio::test]
    async fn test_loop_stops_when_transport_closes() {
        let (unused_tx, _unused_rx) = mpsc::channel(1);
        let (events_tx, events_rx) = mpsc::channel(1);
        let (actor, handle) = DeviceActor::new(
            Arc::new(MockTransport::new(unused_tx)),
            events_rx,
            DeviceConfig::default(),
            Arc::new(BroadcastPush::new(1)),
            Arc::new(MemoryReportStore::new()),
        );
        let task = actor.spawn();

        drop(events_tx);
        task.await.unwrap();

        assert!(matches!(
            handle.request_snapshot().await,
            Err(VitalWatchError::DeviceActorStopped)
        ));
        assert!(matches!(
            handle.rescan().await,
            Err(VitalWatchError::DeviceActorStopped)
        ));
    }
}
