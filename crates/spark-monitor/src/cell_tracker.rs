//! Tracks which notebook cell is currently executing.
//!
//! The kernel has no notion of cells, so the only correlation signal is the
//! notebook's own "a cell began executing" notification. The tracker keeps
//! the most recent one as the current cell, along with a monotonic count of
//! executions observed since monitoring began.
//!
//! Overlapping executions are not supported: the current pointer is
//! last-writer-wins, and consumers that find no current cell must drop the
//! event rather than guess.

use std::sync::Mutex;

use log::debug;
use tokio::sync::watch;

use crate::CellModel;

/// The cell most recently reported as executing.
#[derive(Debug, Clone)]
pub struct ActiveCell {
    pub cell_id: String,
    /// Handle to the cell's editable model, opaque beyond identity and type.
    pub cell: CellModel,
    /// Value of the executed-cell counter when this cell was captured.
    pub execution_index: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    active: Option<ActiveCell>,
    cells_executed: u64,
    reexecuted: bool,
}

/// Last-writer-wins tracker for the currently executing cell.
///
/// Owned state: the current [`ActiveCell`] (replaced, never mutated, on each
/// execution signal), the executed-cell counter, and the re-execution flag
/// the reconnect path clears on kernel restart.
pub struct CellTracker {
    state: Mutex<TrackerState>,
    ready_tx: watch::Sender<bool>,
}

impl CellTracker {
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(TrackerState::default()),
            ready_tx,
        }
    }

    /// Mark the tracker as attached to the notebook's execution signals.
    ///
    /// Unblocks [`ready`](Self::ready). Idempotent.
    pub fn mark_attached(&self) {
        self.ready_tx.send_replace(true);
    }

    /// Suspends until the tracker is attached to the execution signal
    /// source. Resolves immediately if already attached. If no source ever
    /// attaches this never resolves and the tracker stays inert, which is
    /// the accepted degraded mode for a notebook that emits no signals.
    pub async fn ready(&self) {
        let mut ready_rx = self.ready_tx.subscribe();
        let _ = ready_rx.wait_for(|attached| *attached).await;
    }

    /// Record a new execution start. Replaces the previous active cell and
    /// increments the executed-cell counter.
    ///
    /// Must be called once per genuine execution start, not per re-render.
    pub fn cell_started(&self, cell: CellModel) {
        let mut state = self.state.lock().unwrap();
        state.cells_executed += 1;
        debug!(
            "[cells] execution started: cell={} count={}",
            cell.id, state.cells_executed
        );
        state.active = Some(ActiveCell {
            cell_id: cell.id.clone(),
            execution_index: state.cells_executed,
            cell,
        });
    }

    /// The current active cell, if any. `None` means there is no
    /// correlation target and the caller must drop its event.
    pub fn active_cell(&self) -> Option<ActiveCell> {
        self.state.lock().unwrap().active.clone()
    }

    /// Number of cell executions observed so far. Monotonic for the life of
    /// the tracker.
    pub fn cells_executed(&self) -> u64 {
        self.state.lock().unwrap().cells_executed
    }

    /// Whether a cell re-execution has been detected since the last kernel
    /// (re)connect.
    pub fn reexecuted(&self) -> bool {
        self.state.lock().unwrap().reexecuted
    }

    pub fn set_reexecuted(&self) {
        self.state.lock().unwrap().reexecuted = true;
    }

    /// Cleared by the channel manager whenever the kernel reports a fresh
    /// start, so the dispatcher can tell the first job after a (re)connect
    /// from steady-state traffic.
    pub fn clear_reexecuted(&self) {
        self.state.lock().unwrap().reexecuted = false;
    }
}

impl Default for CellTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::CellModel;

    #[test]
    fn test_no_active_cell_initially() {
        let tracker = CellTracker::new();
        assert!(tracker.active_cell().is_none());
        assert_eq!(tracker.cells_executed(), 0);
    }

    #[test]
    fn test_last_writer_wins() {
        let tracker = CellTracker::new();
        for n in 1..=5 {
            tracker.cell_started(CellModel::code(format!("c{}", n)));
            let active = tracker.active_cell().expect("active cell after signal");
            assert_eq!(active.cell_id, format!("c{}", n));
            assert_eq!(active.execution_index, n as u64);
            assert_eq!(tracker.cells_executed(), n as u64);
        }
    }

    #[test]
    fn test_counter_counts_reexecutions_of_same_cell() {
        let tracker = CellTracker::new();
        tracker.cell_started(CellModel::code("c1"));
        tracker.cell_started(CellModel::code("c1"));
        tracker.cell_started(CellModel::code("c1"));
        assert_eq!(tracker.cells_executed(), 3);
        assert_eq!(tracker.active_cell().unwrap().execution_index, 3);
    }

    #[test]
    fn test_reexecuted_flag() {
        let tracker = CellTracker::new();
        assert!(!tracker.reexecuted());
        tracker.set_reexecuted();
        assert!(tracker.reexecuted());
        tracker.clear_reexecuted();
        assert!(!tracker.reexecuted());
    }

    #[tokio::test]
    async fn test_ready_resolves_after_attach() {
        let tracker = CellTracker::new();
        tracker.mark_attached();
        // Must resolve immediately once attached.
        tokio::time::timeout(Duration::from_secs(1), tracker.ready())
            .await
            .expect("ready() should resolve after mark_attached");
    }

    #[tokio::test]
    async fn test_ready_is_idempotent() {
        let tracker = CellTracker::new();
        tracker.mark_attached();
        tracker.mark_attached();
        tracker.ready().await;
        tracker.ready().await;
    }

    #[tokio::test]
    async fn test_ready_pends_until_attached() {
        let tracker = CellTracker::new();
        let pending = tokio::time::timeout(Duration::from_millis(20), tracker.ready()).await;
        assert!(pending.is_err(), "ready() must not resolve before attach");

        tracker.mark_attached();
        tokio::time::timeout(Duration::from_secs(1), tracker.ready())
            .await
            .expect("ready() should resolve after attach");
    }
}
