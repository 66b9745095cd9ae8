//! Connection manager: one resilient logical live-update channel per target.
//!
//! Wraps a [`Connector`] with liveness probing, a staleness watchdog, and a
//! deterministic reconnect schedule. All timers and the transport reader run
//! as spawned tasks whose handles are recorded and aborted on whichever of
//! {manual disconnect, target change, teardown, natural completion} comes
//! first; an epoch counter turns any callback that raced past its abort into
//! a no-op.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::backoff;
use crate::client::events::ConnectionEvents;
use crate::protocol::{ClientFrame, ControlFrame, OutputSnapshot, ServerFrame};
use crate::session::Target;
use crate::transport::{CloseReason, Connector, Inbound, OutboundHandle, Transport, TransportError};

/// Liveness probe cadence while open.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Watchdog check cadence while open.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// Silence longer than this marks the socket as a zombie.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(25);

/// Delay before the dial that follows a forced reconnect.
pub const RESET_RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Settle delay after the host network comes back online.
pub const ONLINE_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Reconnection is unlimited; this sentinel is reported for UI display only.
pub const MAX_ATTEMPTS_DISPLAY: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

struct ManagerState {
    target: Target,
    phase: ConnectionState,
    attempts: u32,
    should_reconnect: bool,
    manual_disconnect: bool,
    refresh_rate: Option<f64>,
    last_heartbeat: Instant,
    /// One forced reconnect per staleness window; cleared on the next open
    /// and on any inbound liveness frame.
    watchdog_fired: bool,
    last_error: Option<String>,
    /// Bumped on disconnect/retarget/forced reconnect. Tasks carry the epoch
    /// they were spawned under and bail out when it no longer matches.
    epoch: u64,
    writer: Option<OutboundHandle>,
    reader_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    watchdog_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl ManagerState {
    fn abort_timers(&mut self) {
        abort_slot(&mut self.heartbeat_task);
        abort_slot(&mut self.watchdog_task);
        abort_slot(&mut self.reconnect_task);
    }

    fn abort_all(&mut self) {
        self.abort_timers();
        abort_slot(&mut self.reader_task);
    }
}

fn abort_slot(slot: &mut Option<JoinHandle<()>>) {
    if let Some(task) = slot.take() {
        task.abort();
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    state: Mutex<ManagerState>,
    events: ConnectionEvents,
}

/// Maintains a resilient live-update channel for the current target.
///
/// At most one live transport exists per manager at any time. Created once
/// per active view; [`ConnectionManager::shutdown`] (or drop) tears down all
/// tasks.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(target: Target, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                state: Mutex::new(ManagerState {
                    target,
                    phase: ConnectionState::Idle,
                    attempts: 0,
                    should_reconnect: true,
                    manual_disconnect: false,
                    refresh_rate: None,
                    last_heartbeat: Instant::now(),
                    watchdog_fired: false,
                    last_error: None,
                    epoch: 0,
                    writer: None,
                    reader_task: None,
                    heartbeat_task: None,
                    watchdog_task: None,
                    reconnect_task: None,
                }),
                events: ConnectionEvents::default(),
            }),
        }
    }

    pub fn on_connection(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.inner.events.on_connection(callback);
    }

    pub fn on_snapshot(&self, callback: impl Fn(OutputSnapshot) + Send + Sync + 'static) {
        self.inner.events.on_snapshot(callback);
    }

    pub fn on_reconnecting(&self, callback: impl Fn(u32, u32) + Send + Sync + 'static) {
        self.inner.events.on_reconnecting(callback);
    }

    /// Opens the live channel for the current target. No-op when a transport
    /// is already open or a dial is in flight. Errors on construction or
    /// handshake failure without scheduling a retry; the caller decides.
    pub async fn connect(&self) -> Result<(), TransportError> {
        dial(&self.inner).await
    }

    /// Manual, terminal disconnect: closes the transport normally, clears
    /// every pending timer, and suppresses reconnection.
    pub fn disconnect(&self) {
        {
            let mut st = self.inner.state.lock();
            st.epoch += 1;
            st.manual_disconnect = true;
            st.should_reconnect = false;
            // The close command goes out before the reader abort drops the
            // transport, so the socket gets a chance at a graceful goodbye.
            if let Some(writer) = st.writer.take() {
                writer.close(true);
            }
            st.abort_all();
            st.phase = ConnectionState::Closed;
            st.attempts = 0;
        }
        self.inner.events.emit_connection(false);
    }

    /// Switches the observed target. Exact-equality no-op. When connected,
    /// the old transport is closed gracefully and a fresh one opened with
    /// the attempt counter reset; when not connected, only the stored target
    /// changes. Any pending reconnect timer is cleared regardless.
    pub fn set_target(&self, target: Target) {
        let reopen = {
            let mut st = self.inner.state.lock();
            if st.target == target {
                return;
            }
            st.epoch += 1;
            let was_open = st.phase == ConnectionState::Open;
            if let Some(writer) = st.writer.take() {
                writer.close(true);
            }
            st.abort_all();
            match st.phase {
                ConnectionState::Open => st.phase = ConnectionState::Closed,
                ConnectionState::Connecting => st.phase = ConnectionState::Idle,
                _ => {}
            }
            st.target = target;
            st.attempts = 0;
            st.should_reconnect = true;
            st.manual_disconnect = false;
            was_open
        };

        if reopen {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                if dial(&inner).await.is_err() {
                    schedule_reconnect(&inner);
                }
            });
        }
    }

    /// Forces a fresh connection: resets the attempt counter, drops any
    /// existing transport, and dials again after a short fixed delay.
    pub fn reset_and_reconnect(&self) {
        force_reconnect(&self.inner, RESET_RECONNECT_DELAY);
    }

    /// Remembers the desired refresh cadence and pushes it to the server
    /// now (if open) and after every subsequent (re)open.
    pub fn set_refresh_rate(&self, interval: f64) {
        let writer = {
            let mut st = self.inner.state.lock();
            st.refresh_rate = Some(interval);
            st.writer.clone()
        };
        if let Some(writer) = writer {
            let _ = writer.send_frame(ClientFrame::SetRefreshRate { interval });
        }
    }

    /// Host network transition. Coming online while not connected forces a
    /// reconnect after a settle delay; going offline records a visible error
    /// without touching the reconnect schedule.
    pub fn handle_network_change(&self, online: bool) {
        if !online {
            self.inner.state.lock().last_error = Some("network offline".to_string());
            return;
        }

        let (reconnect, epoch) = {
            let mut st = self.inner.state.lock();
            st.last_error = None;
            (
                st.phase != ConnectionState::Open && !st.manual_disconnect,
                st.epoch,
            )
        };
        if !reconnect {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ONLINE_SETTLE_DELAY).await;
            let stale = {
                let st = inner.state.lock();
                st.epoch != epoch || st.phase == ConnectionState::Open || st.manual_disconnect
            };
            if !stale {
                force_reconnect(&inner, RESET_RECONNECT_DELAY);
            }
        });
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().phase
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    /// Display sentinel only; reconnection math never consults it.
    pub fn max_attempts(&self) -> u32 {
        MAX_ATTEMPTS_DISPLAY
    }

    pub fn target(&self) -> Target {
        self.inner.state.lock().target.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    /// Complete teardown: disconnects and drops all registered callbacks.
    pub fn shutdown(&self) {
        self.disconnect();
        self.inner.events.clear();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let mut st = self.inner.state.lock();
        st.epoch += 1;
        st.manual_disconnect = true;
        st.should_reconnect = false;
        if let Some(writer) = st.writer.take() {
            writer.close(true);
        }
        st.abort_all();
    }
}

/// Dials the current target once. Shared by `connect()` and the reconnect
/// path; only the latter schedules retries on failure.
async fn dial(inner: &Arc<Inner>) -> Result<(), TransportError> {
    let (target, epoch) = {
        let mut st = inner.state.lock();
        match st.phase {
            ConnectionState::Open | ConnectionState::Connecting => return Ok(()),
            _ => {}
        }
        abort_slot(&mut st.reconnect_task);
        st.phase = ConnectionState::Connecting;
        (st.target.clone(), st.epoch)
    };

    tracing::debug!(%target, "dialing live channel");
    match inner.connector.connect(&target).await {
        Ok(transport) => {
            open_transport(inner, transport, epoch);
            Ok(())
        }
        Err(err) => {
            let mut st = inner.state.lock();
            if st.epoch == epoch && st.phase == ConnectionState::Connecting {
                st.phase = ConnectionState::Closed;
                st.last_error = Some(err.to_string());
            }
            Err(err)
        }
    }
}

fn open_transport(inner: &Arc<Inner>, transport: Box<dyn Transport>, epoch: u64) {
    let writer = transport.outbound();
    let refresh_rate;
    {
        let mut st = inner.state.lock();
        if st.epoch != epoch {
            // Raced with a disconnect or retarget; this transport lost.
            writer.close(true);
            return;
        }
        st.phase = ConnectionState::Open;
        st.attempts = 0;
        st.should_reconnect = true;
        st.manual_disconnect = false;
        st.last_heartbeat = Instant::now();
        st.watchdog_fired = false;
        st.last_error = None;
        st.writer = Some(writer.clone());
        refresh_rate = st.refresh_rate;
        st.reader_task = Some(tokio::spawn(read_loop(inner.clone(), transport, epoch)));
        st.heartbeat_task = Some(tokio::spawn(heartbeat_loop(
            inner.clone(),
            writer.clone(),
            epoch,
        )));
        st.watchdog_task = Some(tokio::spawn(watchdog_loop(inner.clone(), epoch)));
    }
    if let Some(interval) = refresh_rate {
        let _ = writer.send_frame(ClientFrame::SetRefreshRate { interval });
    }
    inner.events.emit_connection(true);
}

async fn read_loop(inner: Arc<Inner>, mut transport: Box<dyn Transport>, epoch: u64) {
    let reason = loop {
        match transport.recv().await {
            Some(Inbound::Frame(frame)) => handle_frame(&inner, frame, epoch),
            Some(Inbound::Closed(reason)) => break reason,
            None => break CloseReason::Abnormal,
        }
    };
    drop(transport);
    handle_close(&inner, reason, epoch);
}

fn handle_frame(inner: &Arc<Inner>, frame: ServerFrame, epoch: u64) {
    match frame {
        ServerFrame::Control(ControlFrame::Heartbeat) => {
            let writer = {
                let mut st = inner.state.lock();
                if st.epoch != epoch {
                    return;
                }
                st.last_heartbeat = Instant::now();
                st.watchdog_fired = false;
                st.writer.clone()
            };
            // The server's heartbeat expects a ping back.
            if let Some(writer) = writer {
                let _ = writer.send_frame(ClientFrame::ping_now());
            }
        }
        ServerFrame::Control(ControlFrame::Pong) => {
            let mut st = inner.state.lock();
            if st.epoch != epoch {
                return;
            }
            st.last_heartbeat = Instant::now();
            st.watchdog_fired = false;
        }
        ServerFrame::Snapshot(snapshot) => {
            let deliver = {
                let st = inner.state.lock();
                st.epoch == epoch && snapshot.target == st.target
            };
            if deliver {
                inner.events.emit_snapshot(snapshot);
            } else {
                tracing::trace!(target = %snapshot.target, "dropping snapshot for stale target");
            }
        }
    }
}

fn handle_close(inner: &Arc<Inner>, reason: CloseReason, epoch: u64) {
    let reconnect = {
        let mut st = inner.state.lock();
        if st.epoch != epoch {
            return;
        }
        abort_slot(&mut st.heartbeat_task);
        abort_slot(&mut st.watchdog_task);
        st.writer = None;
        st.phase = ConnectionState::Closed;
        st.should_reconnect && !st.manual_disconnect && reason == CloseReason::Abnormal
    };
    tracing::debug!(?reason, reconnect, "live channel closed");
    inner.events.emit_connection(false);
    if reconnect {
        schedule_reconnect(inner);
    }
}

fn schedule_reconnect(inner: &Arc<Inner>) {
    let (attempt, delay, epoch) = {
        let mut st = inner.state.lock();
        if !st.should_reconnect || st.manual_disconnect {
            return;
        }
        st.attempts += 1;
        abort_slot(&mut st.reconnect_task);
        (st.attempts, backoff::reconnect_delay(st.attempts), st.epoch)
    };
    tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
    inner.events.emit_reconnecting(attempt, MAX_ATTEMPTS_DISPLAY);

    let task_inner = inner.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        {
            let st = task_inner.state.lock();
            if st.epoch != epoch || !st.should_reconnect || st.manual_disconnect {
                return;
            }
        }
        if dial(&task_inner).await.is_err() {
            schedule_reconnect(&task_inner);
        }
    });
    inner.state.lock().reconnect_task = Some(handle);
}

/// Force-closes whatever exists and dials fresh after `delay` with the
/// attempt counter reset. Used by explicit resets, the watchdog, and the
/// network-online path.
fn force_reconnect(inner: &Arc<Inner>, delay: Duration) {
    let (was_open, epoch) = {
        let mut st = inner.state.lock();
        st.epoch += 1;
        if let Some(writer) = st.writer.take() {
            writer.close(false);
        }
        st.abort_all();
        let was_open = st.phase == ConnectionState::Open;
        st.phase = ConnectionState::Closed;
        st.attempts = 0;
        st.should_reconnect = true;
        st.manual_disconnect = false;
        (was_open, st.epoch)
    };
    if was_open {
        inner.events.emit_connection(false);
    }

    let task_inner = inner.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        {
            let st = task_inner.state.lock();
            if st.epoch != epoch || st.manual_disconnect {
                return;
            }
        }
        if dial(&task_inner).await.is_err() {
            schedule_reconnect(&task_inner);
        }
    });
    inner.state.lock().reconnect_task = Some(handle);
}

async fn heartbeat_loop(inner: Arc<Inner>, writer: OutboundHandle, epoch: u64) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.tick().await; // first tick completes immediately
    loop {
        ticker.tick().await;
        {
            let st = inner.state.lock();
            if st.epoch != epoch || st.phase != ConnectionState::Open {
                return;
            }
        }
        // Failure here is fine; the close path handles the fallout.
        let _ = writer.send_frame(ClientFrame::ping_now());
    }
}

async fn watchdog_loop(inner: Arc<Inner>, epoch: u64) {
    let mut ticker = tokio::time::interval(WATCHDOG_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let stale = {
            let mut st = inner.state.lock();
            if st.epoch != epoch || st.phase != ConnectionState::Open {
                return;
            }
            if !st.watchdog_fired && st.last_heartbeat.elapsed() > HEARTBEAT_TIMEOUT {
                st.watchdog_fired = true;
                true
            } else {
                false
            }
        };
        if stale {
            tracing::warn!(
                timeout_secs = HEARTBEAT_TIMEOUT.as_secs(),
                "no heartbeat activity; treating socket as dead and reconnecting"
            );
            force_reconnect(&inner, RESET_RECONNECT_DELAY);
            return;
        }
    }
}
