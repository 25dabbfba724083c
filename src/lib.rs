//! # meshundo
//!
//! Deduplicating undo-snapshot engine for editable mesh attribute data.
//!
//! Every edit to an editable object captures a full copy of its attribute
//! arrays. Storing N full copies for N undo steps is prohibitively expensive,
//! so snapshots are compacted into a content-addressed chunk store that
//! shares identical regions with earlier snapshots of the same object. The
//! CPU-bound compaction runs on a background pool, overlapped with
//! interactive editing; a drain barrier keeps every read correct.
//!
//! ## Modules
//!
//! - [`util`] - Error handling
//! - [`attr`] - Attribute kinds, layers and the raw geometry capture
//! - [`store`] - Content-addressed, stride-keyed chunk store
//! - [`snapshot`] - Snapshots and their compaction/expansion
//! - [`task`] - Background compaction worker pool
//! - [`undo`] - Step lifecycle manager and host collaborator traits
//!
//! ## Example
//!
//! ```ignore
//! use meshundo::undo::UndoSystem;
//!
//! let mut system = UndoSystem::new();
//!
//! if system.poll(&mut editor) {
//!     let step = system.encode(&mut editor, "Extrude")?;
//!     // ... later, as the user walks history:
//!     system.decode(&mut editor, &step);
//!     system.free(step);
//! }
//! ```

pub mod attr;
pub mod snapshot;
pub mod store;
pub mod task;
pub mod undo;
pub mod util;

// Re-export commonly used types
pub use undo::{EditContext, EditTarget, ObjectId, UndoStep, UndoSystem};
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::attr::{
        AttrKind, AttrLayer, Domain, GeometryData, LayerGroup, SelectElem, SelectHistory,
        SelectMode, ShapeKeyBlock, ShapeKeySet, UvSelectMode,
    };
    pub use crate::snapshot::Snapshot;
    pub use crate::store::{StoreOptions, StoreSet};
    pub use crate::undo::{EditContext, EditTarget, ObjectId, UndoStep, UndoSystem};
    pub use crate::util::{Error, Result};
}
