//! Collaborator traits implemented by the host editor.

use crate::attr::{GeometryData, SelectMode, UvSelectMode};

/// Stable identity token for a tracked object, unique within a session.
///
/// Copied into each snapshot so later encodes can find the most recent prior
/// snapshot of the same object regardless of where the live object moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// One editable object as seen by the undo engine.
pub trait EditTarget {
    /// Stable identity token.
    fn identity(&self) -> ObjectId;

    /// Whether the object is currently in an editable state. Gates both
    /// capture and restore.
    fn is_editable(&self) -> bool;

    /// Extract a full flat copy of the object's editable geometry.
    fn capture(&self) -> GeometryData;

    /// Rebuild the live representation from an expanded capture.
    fn restore(&mut self, data: &GeometryData);

    /// Mark derived geometry (normals, tessellation) for recomputation
    /// after a restore.
    fn tag_geometry_dirty(&mut self);
}

/// The host editor surface the step manager drives.
pub trait EditContext {
    type Target: EditTarget;

    /// Every object currently in an editable state, in a stable order.
    fn editable_targets(&mut self) -> Vec<&mut Self::Target>;

    /// Resolve a tracked object by its identity token.
    fn target_by_identity(&mut self, id: ObjectId) -> Option<&mut Self::Target>;

    /// Apply step-wide selection modes after a decode.
    fn apply_select_mode(&mut self, mode: SelectMode, uv_mode: UvSelectMode);

    /// Notify the host that geometry changed (refresh viewports etc.).
    fn notify_geometry_changed(&mut self);
}
