//! Top-level wiring for Spark job↔cell correlation.
//!
//! [`SparkMonitor`] owns the tracker, presentation gate, dispatcher, and
//! channel manager, and runs the two loops that drive them: one consuming
//! the notebook's document signals, one driving the comm channel through
//! kernel restarts. Everything is cooperative tasks over typed channels;
//! there is no parallel execution inside the core.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cell_tracker::CellTracker;
use crate::channel::{ChannelManager, ChannelState, KernelConnector};
use crate::dispatch::{Dispatcher, SinkEvent};
use crate::presentation::{PresentationGate, SurfaceRenderer};
use crate::CellModel;

/// Notebook document signals consumed by the monitor.
#[derive(Debug, Clone)]
pub enum NotebookSignal {
    /// A cell began executing. Fired once per genuine execution start.
    CellExecutionStarted { cell: CellModel },
    /// Cells were removed from the notebook.
    CellsRemoved { cell_ids: Vec<String> },
}

/// The assembled correlation core for one notebook session.
pub struct SparkMonitor {
    tracker: Arc<CellTracker>,
    gate: Arc<PresentationGate>,
    manager: Arc<ChannelManager>,
    sink: mpsc::UnboundedSender<SinkEvent>,
    signal_task: JoinHandle<()>,
    channel_task: JoinHandle<()>,
}

impl SparkMonitor {
    /// Wire up the core and start its loops.
    ///
    /// `signals` is the notebook's execution/removal signal stream,
    /// `connector` the kernel capability object, `renderer` the
    /// presentation layer, and `sink` the state store consuming normalized
    /// events. The channel opens as soon as the signal loop is attached
    /// (the tracker's readiness gate).
    pub fn start(
        connector: KernelConnector,
        renderer: Box<dyn SurfaceRenderer>,
        signals: mpsc::UnboundedReceiver<NotebookSignal>,
        sink: mpsc::UnboundedSender<SinkEvent>,
    ) -> Self {
        let tracker = Arc::new(CellTracker::new());
        let gate = Arc::new(PresentationGate::new(renderer));
        let dispatcher = Arc::new(Dispatcher::new(tracker.clone(), gate.clone(), sink.clone()));
        let manager = Arc::new(ChannelManager::new(connector, tracker.clone(), dispatcher));

        let signal_task = tokio::spawn(Self::signal_loop(
            signals,
            tracker.clone(),
            gate.clone(),
            sink.clone(),
        ));
        let channel_task = tokio::spawn(manager.clone().run());

        Self {
            tracker,
            gate,
            manager,
            sink,
            signal_task,
            channel_task,
        }
    }

    async fn signal_loop(
        mut signals: mpsc::UnboundedReceiver<NotebookSignal>,
        tracker: Arc<CellTracker>,
        gate: Arc<PresentationGate>,
        sink: mpsc::UnboundedSender<SinkEvent>,
    ) {
        tracker.mark_attached();
        info!("[monitor] attached to notebook execution signals");

        while let Some(signal) = signals.recv().await {
            match signal {
                NotebookSignal::CellExecutionStarted { cell } => tracker.cell_started(cell),
                NotebookSignal::CellsRemoved { cell_ids } => {
                    for cell_id in cell_ids {
                        gate.evict(&cell_id);
                        let _ = sink.send(SinkEvent::CellRemoved { cell_id });
                    }
                }
            }
        }
        debug!("[monitor] notebook signal stream closed");
    }

    /// Forward a display-visibility toggle to the sink.
    pub fn toggle_all(&self) {
        let _ = self.sink.send(SinkEvent::ToggleAll);
    }

    pub fn tracker(&self) -> Arc<CellTracker> {
        self.tracker.clone()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.manager.state()
    }

    /// Whether a presentation surface has been created for `cell_id`.
    pub fn has_surface(&self, cell_id: &str) -> bool {
        self.gate.has_surface(cell_id)
    }

    /// Stop the loops and drop the live channel. Events already handed to
    /// the sink stay delivered; anything in flight on the channel is
    /// dropped.
    pub fn shutdown(self) {
        self.signal_task.abort();
        self.channel_task.abort();
        self.manager.close();
    }
}
