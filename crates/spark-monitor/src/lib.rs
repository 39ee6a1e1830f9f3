//! spark-monitor - Correlates Spark job lifecycle events with notebook cells.
//!
//! A Spark-enabled kernel streams job/stage/task lifecycle events over a
//! named comm channel, but the backend has no notion of which notebook cell
//! issued a given unit of work. This crate tracks the currently executing
//! cell from the notebook's own execution signals and tags inbound events
//! with the cell that triggered them before handing them to a state sink.
//!
//! Components, leaves first:
//! - [`cell_tracker`]: which cell is running, and how many have run
//! - [`protocol`]: the comm wire format and the typed event union
//! - [`channel`]: the reconnect-capable "SparkMonitor" comm channel
//! - [`dispatch`]: classification, correlation, and re-execution detection
//! - [`presentation`]: one progress surface per cell, created lazily
//! - [`monitor`]: the assembled core for one notebook session
//!
//! Rendering, state accumulation, and the notebook document model itself
//! are external collaborators injected at construction: a
//! [`presentation::SurfaceRenderer`], a [`dispatch::SinkEvent`] channel,
//! a [`monitor::NotebookSignal`] stream, and a
//! [`channel::KernelConnector`] capability object.

pub mod cell_tracker;
pub mod channel;
pub mod dispatch;
pub mod monitor;
pub mod presentation;
pub mod protocol;

/// Kind of a notebook cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

/// Handle to a cell's editable model.
///
/// Opaque to the core beyond identity and type: the type gates surface
/// creation (only code cells get one), everything else about the model
/// belongs to the notebook document.
#[derive(Debug, Clone, PartialEq)]
pub struct CellModel {
    pub id: String,
    pub cell_type: CellType,
}

impl CellModel {
    pub fn new(id: impl Into<String>, cell_type: CellType) -> Self {
        Self {
            id: id.into(),
            cell_type,
        }
    }

    /// Convenience for the common case.
    pub fn code(id: impl Into<String>) -> Self {
        Self::new(id, CellType::Code)
    }
}
