//! Undo-step lifecycle: encode, decode and free across multiple objects.
//!
//! The [`UndoSystem`] owns the shared array stores, the append-ordered
//! history of live snapshots used to pick deduplication baselines, and the
//! background compaction pool. One foreground thread drives all entry
//! points; every path that reads compacted data drains the pool first, so
//! callers never observe a partially compacted snapshot.

mod host;

pub use host::{EditContext, EditTarget, ObjectId};

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::snapshot::{Snapshot, SnapshotRef};
use crate::store::{StoreOptions, StoreSet};
use crate::task::CompactPool;
use crate::util::{Error, Result};

/// One (object, snapshot) pair within a step.
struct StepElem {
    object: ObjectId,
    snapshot: SnapshotRef,
}

/// An ordered collection of per-object snapshots captured together.
pub struct UndoStep {
    name: String,
    elems: Vec<StepElem>,
    size: usize,
}

impl UndoStep {
    /// Step name, as given at encode time.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total estimated raw byte size of the step, for the host's global
    /// undo-memory-budget policy.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of objects captured in the step.
    #[inline]
    pub fn object_count(&self) -> usize {
        self.elems.len()
    }

    /// Yield each element's stable object reference, for host-side
    /// bookkeeping (rename/deletion tracking). Read-only.
    pub fn foreach_object_ref(&self, mut visit: impl FnMut(ObjectId)) {
        for elem in &self.elems {
            visit(elem.object);
        }
    }
}

/// Orchestrates snapshot capture, restoration and teardown.
pub struct UndoSystem {
    stores: Arc<StoreSet>,
    /// All live snapshots, oldest first. Order only encodes recency.
    history: Vec<SnapshotRef>,
    pool: Option<CompactPool>,
    /// Live snapshot count; store and pool are torn down when it hits zero.
    /// Only the foreground thread touches it.
    users: usize,
}

impl UndoSystem {
    /// Create a system with default store options.
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    /// Create a system with explicit store options.
    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            stores: Arc::new(StoreSet::new(options)),
            history: Vec::new(),
            pool: None,
            users: 0,
        }
    }

    /// Precondition gate for [`encode`](Self::encode): true iff the host has
    /// at least one editable object.
    pub fn poll<C: EditContext>(&self, ctx: &mut C) -> bool {
        !ctx.editable_targets().is_empty()
    }

    /// Capture a snapshot of every editable object into a new step.
    ///
    /// Compaction is submitted to the background pool; the returned step is
    /// immediately safe to hold, and any later read drains the pool first.
    pub fn encode<C: EditContext>(&mut self, ctx: &mut C, name: &str) -> Result<UndoStep> {
        // Pending compactions must settle before their snapshots can serve
        // as reference baselines.
        self.drain();

        let mut targets = ctx.editable_targets();
        if targets.is_empty() {
            return Err(Error::NoEditTarget);
        }

        let ids: Vec<ObjectId> = targets.iter().map(|t| t.identity()).collect();
        let references = self.reference_index(&ids);

        let mut elems = Vec::with_capacity(targets.len());
        let mut size = 0;
        for target in &mut targets {
            let id = target.identity();
            let snapshot = Snapshot::capture(id, target.capture());
            size += snapshot.undo_size();

            let snapshot = Arc::new(Mutex::new(snapshot));
            self.history.push(Arc::clone(&snapshot));
            self.users += 1;

            self.submit_compact(Arc::clone(&snapshot), references.get(&id).cloned());
            elems.push(StepElem {
                object: id,
                snapshot,
            });
        }

        Ok(UndoStep {
            name: name.to_string(),
            elems,
            size,
        })
    }

    /// Restore a previously encoded step into the live editor state.
    ///
    /// Best-effort per element: an object that is missing or not editable is
    /// logged and skipped, the remaining elements still decode. The first
    /// element's selection modes are applied step-wide afterwards.
    pub fn decode<C: EditContext>(&mut self, ctx: &mut C, step: &UndoStep) {
        self.drain();

        for elem in &step.elems {
            let target = match ctx.target_by_identity(elem.object) {
                Some(t) => t,
                None => {
                    tracing::error!(
                        step = %step.name,
                        "{}, undo state not restored",
                        Error::ObjectNotFound(elem.object)
                    );
                    continue;
                }
            };
            if !target.is_editable() {
                tracing::error!(
                    step = %step.name,
                    "{}, undo state not restored",
                    Error::NotEditable(elem.object)
                );
                continue;
            }

            let mut snapshot = elem.snapshot.lock();
            snapshot.expand(&self.stores);
            target.restore(snapshot.geometry());
            target.tag_geometry_dirty();
            snapshot.discard_expanded();
        }

        // The first element is authoritative for step-wide scalar settings.
        if let Some(first) = step.elems.first() {
            let snapshot = first.snapshot.lock();
            ctx.apply_select_mode(snapshot.select_mode(), snapshot.uv_select_mode());
        }
        ctx.notify_geometry_changed();
    }

    /// Tear down a step, releasing every store handle it holds.
    ///
    /// When the last live snapshot goes away the stores are cleared and the
    /// compaction pool is shut down.
    pub fn free(&mut self, step: UndoStep) {
        self.drain();

        for elem in step.elems {
            {
                let mut snapshot = elem.snapshot.lock();
                // Expand once more so transiently held allocations are
                // dropped together with the snapshot.
                snapshot.expand(&self.stores);
                snapshot.release(&self.stores);
            }

            let index = self
                .history
                .iter()
                .position(|s| Arc::ptr_eq(s, &elem.snapshot));
            match index {
                Some(i) => {
                    self.history.remove(i);
                }
                None => debug_assert!(false, "freed snapshot missing from history"),
            }

            assert!(self.users > 0, "snapshot user count underflow");
            self.users -= 1;
            if self.users == 0 {
                tracing::debug!("undo array store: releasing all data");
                self.stores.clear();
                self.pool = None;
            }
        }
    }

    /// Live snapshot count across all steps.
    #[inline]
    pub fn user_count(&self) -> usize {
        self.users
    }

    /// (expanded, compacted) byte totals currently held by the stores.
    ///
    /// Drains pending compaction so the numbers are settled.
    pub fn memory_usage(&self) -> (usize, usize) {
        self.drain();
        self.stores.memory_usage()
    }

    /// Block until all outstanding compaction tasks finish.
    fn drain(&self) {
        if let Some(pool) = &self.pool {
            pool.drain();
        }
    }

    /// Queue compaction of a fresh snapshot against its reference baseline.
    fn submit_compact(&mut self, snapshot: SnapshotRef, reference: Option<SnapshotRef>) {
        let stores = Arc::clone(&self.stores);
        let pool = self.pool.get_or_insert_with(CompactPool::new);
        pool.submit(move || {
            let (expanded_prev, compacted_prev) = stores.memory_usage();

            let mut snapshot = snapshot.lock();
            match &reference {
                Some(r) => {
                    let reference = r.lock();
                    snapshot.compact(&stores, Some(&reference));
                }
                None => snapshot.compact(&stores, None),
            }

            let (expanded, compacted) = stores.memory_usage();
            let step_expanded = expanded.saturating_sub(expanded_prev);
            let step_compacted = compacted.saturating_sub(compacted_prev);
            if step_expanded > 0 {
                tracing::debug!(
                    object = ?snapshot.identity(),
                    overall_pct = compacted as f64 / expanded as f64 * 100.0,
                    step_pct = step_compacted as f64 / step_expanded as f64 * 100.0,
                    "snapshot compacted"
                );
            }
        });
    }

    /// Build the per-batch identity index: most recent prior snapshot for
    /// each requested identity. Walks history backwards and stops early once
    /// every identity is resolved.
    fn reference_index(&self, ids: &[ObjectId]) -> HashMap<ObjectId, SnapshotRef> {
        let mut wanted: HashSet<ObjectId> = ids.iter().copied().collect();
        let mut map = HashMap::with_capacity(wanted.len());
        for snapshot in self.history.iter().rev() {
            if wanted.is_empty() {
                break;
            }
            let id = snapshot.lock().identity();
            if wanted.remove(&id) {
                map.insert(id, Arc::clone(snapshot));
            }
        }
        map
    }
}

impl Default for UndoSystem {
    fn default() -> Self {
        Self::new()
    }
}
