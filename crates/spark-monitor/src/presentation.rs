//! Ensures each correlated cell gets exactly one progress surface.
//!
//! Surface construction and placement belong to the hosting presentation
//! layer; the gate only decides *when* a surface is needed and remembers
//! which cells already have one.

use std::collections::HashSet;
use std::sync::Mutex;

use log::debug;

use crate::{CellModel, CellType};

/// Result of asking the presentation layer to attach a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// A new surface was created and positioned in the cell's output area.
    Attached,
    /// The cell's view already carries a surface; nothing was created.
    AlreadyPresent,
    /// The cell has no live view right now (not yet rendered or scrolled
    /// out). The gate will retry on the next qualifying event.
    NotRenderable,
}

/// Creates progress surfaces inside a cell's output area.
///
/// Implemented by the hosting presentation layer. `attach` must position
/// the surface deterministically relative to the cell's output region and
/// must never create a duplicate for a cell that already has one.
pub trait SurfaceRenderer: Send + Sync {
    fn attach(&self, cell: &CellModel) -> AttachOutcome;
}

/// Gate in front of the presentation layer: at most one surface per cell,
/// created lazily on the first job or stage event correlated to it.
pub struct PresentationGate {
    renderer: Box<dyn SurfaceRenderer>,
    /// Cell ids that already have a surface. Evicted on cell removal so the
    /// set stays bounded over a long session.
    created: Mutex<HashSet<String>>,
}

impl PresentationGate {
    pub fn new(renderer: Box<dyn SurfaceRenderer>) -> Self {
        Self {
            renderer,
            created: Mutex::new(HashSet::new()),
        }
    }

    /// Ensure `cell` has a presentation surface.
    ///
    /// No-op for non-code cells and for cells already marked present. A
    /// `NotRenderable` outcome leaves the cell unmarked so a later event
    /// retries; repeated calls never create duplicates.
    pub fn ensure_presentation(&self, cell: &CellModel) {
        if cell.cell_type != CellType::Code {
            return;
        }
        if self.created.lock().unwrap().contains(&cell.id) {
            return;
        }
        match self.renderer.attach(cell) {
            AttachOutcome::Attached => {
                debug!("[presentation] surface created for cell {}", cell.id);
                self.created.lock().unwrap().insert(cell.id.clone());
            }
            AttachOutcome::AlreadyPresent => {
                self.created.lock().unwrap().insert(cell.id.clone());
            }
            AttachOutcome::NotRenderable => {
                debug!("[presentation] cell {} has no live view yet", cell.id);
            }
        }
    }

    /// Whether `cell_id` currently has a surface recorded.
    pub fn has_surface(&self, cell_id: &str) -> bool {
        self.created.lock().unwrap().contains(cell_id)
    }

    /// Forget a removed cell so the presence set stays bounded.
    pub fn evict(&self, cell_id: &str) {
        self.created.lock().unwrap().remove(cell_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Renderer that counts attachments and can simulate an unmounted view.
    struct FakeRenderer {
        attached: AtomicUsize,
        renderable: std::sync::atomic::AtomicBool,
    }

    impl FakeRenderer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                attached: AtomicUsize::new(0),
                renderable: std::sync::atomic::AtomicBool::new(true),
            })
        }
    }

    impl SurfaceRenderer for Arc<FakeRenderer> {
        fn attach(&self, _cell: &CellModel) -> AttachOutcome {
            if !self.renderable.load(Ordering::SeqCst) {
                return AttachOutcome::NotRenderable;
            }
            self.attached.fetch_add(1, Ordering::SeqCst);
            AttachOutcome::Attached
        }
    }

    #[test]
    fn test_idempotent_for_same_cell() {
        let renderer = FakeRenderer::new();
        let gate = PresentationGate::new(Box::new(renderer.clone()));
        let cell = CellModel::code("c1");

        gate.ensure_presentation(&cell);
        gate.ensure_presentation(&cell);
        gate.ensure_presentation(&cell);

        assert_eq!(renderer.attached.load(Ordering::SeqCst), 1);
        assert!(gate.has_surface("c1"));
    }

    #[test]
    fn test_non_code_cells_are_skipped() {
        let renderer = FakeRenderer::new();
        let gate = PresentationGate::new(Box::new(renderer.clone()));
        let cell = CellModel::new("md1", CellType::Markdown);

        gate.ensure_presentation(&cell);

        assert_eq!(renderer.attached.load(Ordering::SeqCst), 0);
        assert!(!gate.has_surface("md1"));
    }

    #[test]
    fn test_unrenderable_cell_retries_later() {
        let renderer = FakeRenderer::new();
        renderer.renderable.store(false, Ordering::SeqCst);
        let gate = PresentationGate::new(Box::new(renderer.clone()));
        let cell = CellModel::code("c1");

        gate.ensure_presentation(&cell);
        assert_eq!(renderer.attached.load(Ordering::SeqCst), 0);
        assert!(!gate.has_surface("c1"));

        // View mounts; the next qualifying event succeeds.
        renderer.renderable.store(true, Ordering::SeqCst);
        gate.ensure_presentation(&cell);
        assert_eq!(renderer.attached.load(Ordering::SeqCst), 1);
        assert!(gate.has_surface("c1"));
    }

    #[test]
    fn test_already_present_marks_without_creating() {
        struct AlreadyThere;
        impl SurfaceRenderer for AlreadyThere {
            fn attach(&self, _cell: &CellModel) -> AttachOutcome {
                AttachOutcome::AlreadyPresent
            }
        }

        let gate = PresentationGate::new(Box::new(AlreadyThere));
        gate.ensure_presentation(&CellModel::code("c1"));
        assert!(gate.has_surface("c1"));
    }

    #[test]
    fn test_evict_allows_fresh_surface() {
        let renderer = FakeRenderer::new();
        let gate = PresentationGate::new(Box::new(renderer.clone()));
        let cell = CellModel::code("c1");

        gate.ensure_presentation(&cell);
        gate.evict("c1");
        assert!(!gate.has_surface("c1"));

        gate.ensure_presentation(&cell);
        assert_eq!(renderer.attached.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_independent_cells_each_get_a_surface() {
        let renderer = FakeRenderer::new();
        let gate = PresentationGate::new(Box::new(renderer.clone()));

        gate.ensure_presentation(&CellModel::code("c1"));
        gate.ensure_presentation(&CellModel::code("c2"));
        gate.ensure_presentation(&CellModel::code("c1"));

        assert_eq!(renderer.attached.load(Ordering::SeqCst), 2);
    }
}
