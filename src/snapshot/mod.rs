//! Undo snapshots: captured geometry state and its compacted form.
//!
//! A [`Snapshot`] starts out expanded (raw byte arrays captured from the
//! editor), is compacted into store handles shortly after (usually on a
//! background worker), and is transiently re-expanded whenever the step is
//! applied or torn down. Layer metadata is retained across compaction so the
//! two forms always stay structurally symmetric.

mod compact;

use parking_lot::Mutex;
use std::sync::Arc;

use crate::attr::{AttrKind, Domain, GeometryData, SelectMode, UvSelectMode};
use crate::store::ArrayState;
use crate::undo::ObjectId;

/// Shared handle to a snapshot.
///
/// The mutex arbitrates between the foreground thread and the background
/// worker compacting the snapshot; the scheduler's drain barrier guarantees
/// the foreground only ever locks quiescent snapshots.
pub type SnapshotRef = Arc<Mutex<Snapshot>>;

/// Stored handles for one run of consecutive same-kind layers.
#[derive(Debug)]
pub(crate) struct LayerRun {
    pub(crate) kind: AttrKind,
    /// One entry per layer in the run; `None` for layers without data.
    pub(crate) states: Vec<Option<ArrayState>>,
}

/// Store handles substituted for a snapshot's raw arrays while compacted.
#[derive(Debug, Default)]
pub(crate) struct CompactState {
    pub(crate) domains: [Vec<LayerRun>; Domain::COUNT],
    pub(crate) keyblocks: Option<Vec<Option<ArrayState>>>,
    pub(crate) selection: Option<ArrayState>,
}

/// Full captured state of one tracked object at one undo step.
pub struct Snapshot {
    identity: ObjectId,
    geometry: GeometryData,
    compacted: Option<CompactState>,
    undo_size: usize,
}

impl Snapshot {
    /// Capture a snapshot from freshly extracted geometry.
    pub fn capture(identity: ObjectId, geometry: GeometryData) -> Self {
        let undo_size = geometry.raw_size();
        Self {
            identity,
            geometry,
            compacted: None,
            undo_size,
        }
    }

    /// Stable identity token of the tracked object.
    #[inline]
    pub fn identity(&self) -> ObjectId {
        self.identity
    }

    /// Estimated raw byte size of the captured state, for the host's
    /// undo-memory accounting.
    #[inline]
    pub fn undo_size(&self) -> usize {
        self.undo_size
    }

    /// Whether the raw arrays have been moved into the store.
    #[inline]
    pub fn is_compacted(&self) -> bool {
        self.compacted.is_some()
    }

    /// The captured geometry. While compacted, layer data fields are `None`
    /// but all structural metadata remains valid.
    #[inline]
    pub fn geometry(&self) -> &GeometryData {
        &self.geometry
    }

    /// Selection mode recorded at capture time.
    #[inline]
    pub fn select_mode(&self) -> SelectMode {
        self.geometry.select_mode
    }

    /// UV selection mode recorded at capture time.
    #[inline]
    pub fn uv_select_mode(&self) -> UvSelectMode {
        self.geometry.uv_select_mode
    }
}
