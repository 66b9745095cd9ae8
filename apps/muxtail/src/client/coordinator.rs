//! View coordinator: glues the connection manager, the output window loader,
//! and the pull API behind one surface the view talks to.
//!
//! The loader decides; the coordinator executes. Pushed snapshots flow
//! through [`OutputWindowLoader::apply_snapshot`], scroll telemetry through
//! [`OutputWindowLoader::on_scroll`] (spawning at most one history fetch at
//! a time), and every resulting buffer change is published through the
//! output and view-command callbacks.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::api::OutputApi;
use crate::client::connection::ConnectionManager;
use crate::client::events::CallbackSlot;
use crate::client::loader::{
    HistoryRequest, OutputWindowLoader, ScrollMetrics, SnapshotOutcome, ViewCommand,
};
use crate::session::Target;
use crate::transport::{Connector, TransportError};

struct CoordinatorInner {
    api: Arc<dyn OutputApi>,
    loader: Mutex<OutputWindowLoader>,
    output: CallbackSlot<String>,
    commands: CallbackSlot<ViewCommand>,
}

impl CoordinatorInner {
    fn publish(&self, content: String, command: Option<ViewCommand>) {
        self.output.emit(content);
        if let Some(command) = command {
            self.commands.emit(command);
        }
    }
}

pub struct ViewCoordinator {
    manager: ConnectionManager,
    inner: Arc<CoordinatorInner>,
}

impl ViewCoordinator {
    pub fn new(target: Target, connector: Arc<dyn Connector>, api: Arc<dyn OutputApi>) -> Self {
        let manager = ConnectionManager::new(target.clone(), connector);
        let inner = Arc::new(CoordinatorInner {
            api,
            loader: Mutex::new(OutputWindowLoader::new(target)),
            output: CallbackSlot::new(),
            commands: CallbackSlot::new(),
        });

        let snapshot_inner = inner.clone();
        manager.on_snapshot(move |snapshot| {
            let (content, command) = {
                let mut loader = snapshot_inner.loader.lock();
                match loader.apply_snapshot(&snapshot) {
                    SnapshotOutcome::Applied(command) => (loader.content().to_string(), command),
                    SnapshotOutcome::DroppedWhileLoading => {
                        tracing::debug!("dropping live snapshot during history load");
                        return;
                    }
                    SnapshotOutcome::IgnoredOtherTarget => return,
                }
            };
            snapshot_inner.publish(content, command);
        });

        Self { manager, inner }
    }

    /// The buffer the view should render, emitted after every change.
    pub fn on_output(&self, callback: impl Fn(String) + Send + Sync + 'static) {
        self.inner.output.set(callback);
    }

    /// Viewport adjustments the view must apply after re-rendering.
    pub fn on_view_command(&self, callback: impl Fn(ViewCommand) + Send + Sync + 'static) {
        self.inner.commands.set(callback);
    }

    pub fn on_connection_change(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.manager.on_connection(callback);
    }

    pub fn on_reconnecting(&self, callback: impl Fn(u32, u32) + Send + Sync + 'static) {
        self.manager.on_reconnecting(callback);
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub async fn connect(&self) -> Result<(), TransportError> {
        self.manager.connect().await
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    /// Scroll telemetry from the view. Starts a backward history fetch when
    /// the loader says one is due; at most one is in flight.
    pub fn handle_scroll(&self, metrics: ScrollMetrics) {
        let request = self.inner.loader.lock().on_scroll(metrics);
        if let Some(request) = request {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                fetch_history(&inner, request).await;
            });
        }
    }

    /// One-shot pull refresh of the live window. Skipped while a history
    /// load is in flight for the same reason live snapshots are dropped.
    pub async fn refresh(&self) -> Result<(), crate::api::ApiError> {
        let target = {
            let loader = self.inner.loader.lock();
            if loader.is_loading_history() {
                return Ok(());
            }
            loader.target().clone()
        };
        let snapshot = self.inner.api.get_output(&target, false, None).await?;
        let (content, command) = {
            let mut loader = self.inner.loader.lock();
            if *loader.target() != target {
                return Ok(());
            }
            let command = loader.set_output(snapshot.content);
            (loader.content().to_string(), command)
        };
        self.inner.publish(content, command);
        Ok(())
    }

    /// Switches both halves of the stream to a new target and resets the
    /// view to the (empty) bottom. Exact-equality no-op.
    pub fn set_target(&self, target: Target) {
        {
            let mut loader = self.inner.loader.lock();
            if *loader.target() == target {
                return;
            }
            loader.reset_for_target(target.clone());
        }
        self.manager.set_target(target);
        self.inner.publish(String::new(), Some(ViewCommand::ScrollToBottom));
    }

    pub fn scroll_to_bottom(&self, force: bool) {
        let command = self.inner.loader.lock().scroll_to_bottom(force);
        if let Some(command) = command {
            self.inner.commands.emit(command);
        }
    }

    pub fn set_refresh_rate(&self, interval: f64) {
        self.manager.set_refresh_rate(interval);
    }

    pub fn handle_network_change(&self, online: bool) {
        self.manager.handle_network_change(online);
    }

    pub fn shutdown(&self) {
        self.manager.shutdown();
        self.inner.output.clear();
        self.inner.commands.clear();
    }
}

async fn fetch_history(inner: &Arc<CoordinatorInner>, request: HistoryRequest) {
    let result = inner
        .api
        .get_output(&request.target, true, Some(request.lines))
        .await;
    let content = match result {
        Ok(snapshot) => Some(snapshot.content),
        Err(err) => {
            tracing::warn!(%err, target = %request.target, "history load failed");
            None
        }
    };
    let (buffer, command) = {
        let mut loader = inner.loader.lock();
        match loader.complete_history(&request, content) {
            // Failed or stale completion: the buffer did not change.
            None => return,
            Some(command) => (loader.content().to_string(), command),
        }
    };
    inner.publish(buffer, Some(command));
}
