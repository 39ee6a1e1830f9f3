//! Classifies inbound Spark events and correlates them to notebook cells.
//!
//! The dispatcher sits between the comm channel and the state sink. Each
//! backend frame is decoded, classified by kind, and forwarded as a
//! normalized [`SinkEvent`]. Job-start and stage-submitted events carry no
//! cell identity on the wire, so those are tagged with the currently
//! executing cell before forwarding; every other kind references a
//! job/stage/task id the sink already knows how to associate.
//!
//! Nothing here is fatal: malformed frames, unknown kinds, and events with
//! no correlation target are logged and dropped.

use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::cell_tracker::CellTracker;
use crate::presentation::PresentationGate;
use crate::protocol::{
    ApplicationStart, CommMessage, ExecutorAdded, ExecutorRemoved, JobEnd, JobStart, SparkEvent,
    StageActive, StageCompleted, StageSubmitted, TaskEnd, TaskStart, FROM_BACKEND,
};

/// Normalized, cell-tagged events delivered to the state sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// A job started in the given cell.
    JobStart { cell_id: String, event: JobStart },
    JobEnd { event: JobEnd },
    /// A stage was submitted while the given cell was executing.
    StageSubmitted { cell_id: String, event: StageSubmitted },
    StageCompleted { event: StageCompleted },
    StageActive { event: StageActive },
    TaskStart { event: TaskStart },
    TaskEnd { event: TaskEnd },
    ApplicationStart { event: ApplicationStart },
    ExecutorAdded { event: ExecutorAdded },
    ExecutorRemoved { event: ExecutorRemoved },
    /// The cell was re-executed; accumulated per-cell state must be
    /// discarded before applying the job event that follows.
    ResetCell { cell_id: String },
    /// A cell was removed from the notebook.
    CellRemoved { cell_id: String },
    /// Toggle visibility of all monitor displays.
    ToggleAll,
}

/// The event-correlation state machine.
pub struct Dispatcher {
    tracker: Arc<CellTracker>,
    gate: Arc<PresentationGate>,
    sink: mpsc::UnboundedSender<SinkEvent>,
    /// Executed-cell count at the time of the last job-start we processed.
    /// Zero until the first job-start is seen.
    last_job_execution: Mutex<u64>,
}

impl Dispatcher {
    pub fn new(
        tracker: Arc<CellTracker>,
        gate: Arc<PresentationGate>,
        sink: mpsc::UnboundedSender<SinkEvent>,
    ) -> Self {
        Self {
            tracker,
            gate,
            sink,
            last_job_execution: Mutex::new(0),
        }
    }

    /// Handle one inbound comm frame.
    ///
    /// Synchronous and infallible: every failure mode is contained here and
    /// converted to a log line plus a drop.
    pub fn handle_message(&self, message: &CommMessage) {
        if message.msgtype != FROM_BACKEND {
            debug!("[dispatch] ignoring frame with msgtype {}", message.msgtype);
            return;
        }
        let Some(payload) = message.msg.as_deref() else {
            warn!("[dispatch] backend frame has no payload, dropping");
            return;
        };
        let event = match SparkEvent::parse(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!("[dispatch] dropping undecodable event: {}", err);
                return;
            }
        };
        debug!("[dispatch] received {}", event.kind());

        match event {
            SparkEvent::JobStart(job) => self.on_job_start(job),
            SparkEvent::StageSubmitted(stage) => self.on_stage_submitted(stage),
            SparkEvent::JobEnd(event) => self.forward(SinkEvent::JobEnd { event }),
            SparkEvent::StageCompleted(event) => self.forward(SinkEvent::StageCompleted { event }),
            SparkEvent::StageActive(event) => self.forward(SinkEvent::StageActive { event }),
            SparkEvent::TaskStart(event) => self.forward(SinkEvent::TaskStart { event }),
            SparkEvent::TaskEnd(event) => self.forward(SinkEvent::TaskEnd { event }),
            SparkEvent::ApplicationStart(event) => {
                self.forward(SinkEvent::ApplicationStart { event })
            }
            // Intentionally not forwarded.
            SparkEvent::ApplicationEnd(_) => debug!("[dispatch] application ended"),
            SparkEvent::ExecutorAdded(event) => self.forward(SinkEvent::ExecutorAdded { event }),
            SparkEvent::ExecutorRemoved(event) => {
                self.forward(SinkEvent::ExecutorRemoved { event })
            }
            SparkEvent::Unrecognized(kind) => {
                warn!("[dispatch] unrecognized event kind {}, dropping", kind)
            }
        }
    }

    /// Job-start: resolve the triggering cell, make sure its surface
    /// exists, detect re-execution, then forward tagged with the cell id.
    fn on_job_start(&self, event: JobStart) {
        let Some(active) = self.tracker.active_cell() else {
            // Expected race: a straggler job can start after its cell's run
            // is no longer current. Never guess a cell.
            warn!(
                "[dispatch] job {} started with no active cell, dropping",
                event.job_id
            );
            return;
        };
        self.gate.ensure_presentation(&active.cell);

        let executed = self.tracker.cells_executed();
        let fresh_run = {
            let mut last = self.last_job_execution.lock().unwrap();
            let fresh = *last != 0 && executed > *last;
            *last = executed;
            fresh
        };
        if fresh_run {
            debug!(
                "[dispatch] cell {} re-executed, resetting its accumulated state",
                active.cell_id
            );
            self.tracker.set_reexecuted();
            self.forward(SinkEvent::ResetCell {
                cell_id: active.cell_id.clone(),
            });
        }
        self.forward(SinkEvent::JobStart {
            cell_id: active.cell_id,
            event,
        });
    }

    /// Stage-submitted: resolve the cell and create its surface, but never
    /// reset; resets are keyed to job starts only.
    fn on_stage_submitted(&self, event: StageSubmitted) {
        let Some(active) = self.tracker.active_cell() else {
            warn!(
                "[dispatch] stage {} submitted with no active cell, dropping",
                event.stage_id
            );
            return;
        };
        self.gate.ensure_presentation(&active.cell);
        self.forward(SinkEvent::StageSubmitted {
            cell_id: active.cell_id,
            event,
        });
    }

    fn forward(&self, event: SinkEvent) {
        // The sink outlives the channel in normal operation; a closed sink
        // means shutdown is underway and the event can be dropped.
        let _ = self.sink.send(event);
    }
}
