//! Compaction and expansion of snapshots against the array store.
//!
//! Compaction walks each domain's layer group in runs of consecutive
//! same-kind layers, keeping a cursor into the reference snapshot's run list
//! so that unchanged layer layouts hit the aligned fast path. Expansion walks
//! the retained layer metadata in lock-step with the stored handles.

use crate::attr::{Domain, LayerGroup, SELECT_STRIDE};
use crate::store::StoreSet;

use super::{CompactState, LayerRun, Snapshot};

impl Snapshot {
    /// Move all raw arrays into the store, deduplicating against `reference`
    /// (the most recent prior snapshot of the same object) when given.
    ///
    /// Consumes the raw data; afterwards only layer metadata remains
    /// expanded. The reference must itself be fully compacted.
    pub fn compact(&mut self, stores: &StoreSet, reference: Option<&Snapshot>) {
        assert!(self.compacted.is_none(), "snapshot compacted twice");
        let reference = reference.map(|r| {
            let compacted = match &r.compacted {
                Some(c) => c,
                None => panic!("reference snapshot is not compacted"),
            };
            (compacted, &r.geometry)
        });

        let mut compacted = CompactState::default();

        for domain in Domain::ALL {
            let i = domain.index();
            compacted.domains[i] = compact_group(
                &mut self.geometry.domains[i],
                self.geometry.counts[i],
                reference.map(|(c, _)| c.domains[i].as_slice()),
                stores,
            );
        }

        if let Some(keys) = self.geometry.shape_keys.as_mut() {
            // A reference is only usable when its blocks live in the same
            // per-stride store as ours.
            let ref_blocks = reference.and_then(|(c, geo)| {
                let same_stride = geo
                    .shape_keys
                    .as_ref()
                    .is_some_and(|k| k.stride == keys.stride);
                if same_stride { c.keyblocks.as_deref() } else { None }
            });

            let store = stores.ensure(keys.stride);
            let mut store = store.lock();
            let mut states = Vec::with_capacity(keys.blocks.len());
            for (i, block) in keys.blocks.iter_mut().enumerate() {
                let state = block.data.take().map(|data| {
                    debug_assert_eq!(data.len(), block.elem_count * keys.stride);
                    let positional = ref_blocks.and_then(|rb| rb.get(i).copied().flatten());
                    store.state_add(&data, positional)
                });
                states.push(state);
            }
            compacted.keyblocks = Some(states);
        }

        if let Some(sel) = self.geometry.selection.as_mut() {
            if let Some(elems) = sel.elems.take() {
                let store = stores.ensure(SELECT_STRIDE);
                let positional = reference.and_then(|(c, _)| c.selection);
                compacted.selection =
                    Some(store.lock().state_add(bytemuck::cast_slice(&elems), positional));
            }
        }

        self.compacted = Some(compacted);
    }

    /// Materialize the raw arrays back from the store.
    ///
    /// The layer metadata retained at compaction time drives the walk; the
    /// handles stay valid so the snapshot can be expanded again later.
    pub fn expand(&mut self, stores: &StoreSet) {
        let compacted = match &self.compacted {
            Some(c) => c,
            None => panic!("snapshot is not compacted"),
        };

        for domain in Domain::ALL {
            let i = domain.index();
            expand_group(
                &mut self.geometry.domains[i],
                self.geometry.counts[i],
                &compacted.domains[i],
                stores,
            );
        }

        if let Some(states) = &compacted.keyblocks {
            let keys = match self.geometry.shape_keys.as_mut() {
                Some(k) => k,
                None => panic!("compacted shape keys without shape-key metadata"),
            };
            assert_eq!(states.len(), keys.blocks.len());
            let store = stores.get(keys.stride);
            let store = store.lock();
            for (block, state) in keys.blocks.iter_mut().zip(states) {
                block.data = state.map(|s| {
                    let data = store.state_bytes(s);
                    assert_eq!(data.len(), block.elem_count * keys.stride);
                    data
                });
            }
        }

        if let Some(state) = compacted.selection {
            let sel = match self.geometry.selection.as_mut() {
                Some(s) => s,
                None => panic!("compacted selection without selection metadata"),
            };
            let store = stores.get(SELECT_STRIDE);
            let data = store.lock().state_bytes(state);
            assert_eq!(data.len(), sel.elem_count * SELECT_STRIDE);
            sel.elems = Some(bytemuck::pod_collect_to_vec(&data));
        }
    }

    /// Drop arrays that were only expanded for transient use.
    ///
    /// The store handles are untouched; the snapshot stays compacted.
    pub fn discard_expanded(&mut self) {
        debug_assert!(self.compacted.is_some());
        for group in &mut self.geometry.domains {
            for layer in &mut group.layers {
                layer.data = None;
            }
        }
        if let Some(keys) = self.geometry.shape_keys.as_mut() {
            for block in &mut keys.blocks {
                block.data = None;
            }
        }
        if let Some(sel) = self.geometry.selection.as_mut() {
            sel.elems = None;
        }
    }

    /// Release every store handle held by this snapshot.
    ///
    /// Chunks no longer referenced by any snapshot are reclaimed. Terminal:
    /// the snapshot cannot be expanded afterwards.
    pub fn release(&mut self, stores: &StoreSet) {
        let compacted = match self.compacted.take() {
            Some(c) => c,
            None => panic!("snapshot is not compacted"),
        };

        for runs in &compacted.domains {
            for run in runs {
                let store = stores.get(run.kind.stride());
                let mut store = store.lock();
                for state in run.states.iter().copied().flatten() {
                    store.state_remove(state);
                }
            }
        }

        if let Some(states) = &compacted.keyblocks {
            let keys = match self.geometry.shape_keys.as_ref() {
                Some(k) => k,
                None => panic!("compacted shape keys without shape-key metadata"),
            };
            let store = stores.get(keys.stride);
            let mut store = store.lock();
            for state in states.iter().copied().flatten() {
                store.state_remove(state);
            }
        }

        if let Some(state) = compacted.selection {
            stores.get(SELECT_STRIDE).lock().state_remove(state);
        }
    }
}

/// Compact one domain's layer group into runs of store handles.
fn compact_group(
    group: &mut LayerGroup,
    elem_count: usize,
    reference: Option<&[LayerRun]>,
    stores: &StoreSet,
) -> Vec<LayerRun> {
    let mut runs: Vec<LayerRun> = Vec::new();
    let mut cursor: Option<usize> = reference.map(|_| 0);

    let layer_count = group.layers.len();
    let mut start = 0;
    while start < layer_count {
        let kind = group.layers[start].kind;
        let mut end = start + 1;
        while end < layer_count && group.layers[end].kind == kind {
            end += 1;
        }

        // Align the reference cursor with this run. The common case is that
        // snapshots evolve without layer reordering, keeping the cursor on
        // the matching run; otherwise relocate with a full scan by kind.
        let aligned: Option<&LayerRun> = match reference {
            Some(ref_runs) => {
                let at_cursor = cursor.and_then(|i| ref_runs.get(i)).filter(|r| r.kind == kind);
                match at_cursor {
                    Some(run) => Some(run),
                    None => match ref_runs.iter().position(|r| r.kind == kind) {
                        Some(i) => {
                            cursor = Some(i);
                            Some(&ref_runs[i])
                        }
                        None => {
                            cursor = None;
                            None
                        }
                    },
                }
            }
            None => None,
        };

        let stride = kind.stride();
        let store = stores.ensure(stride);
        let mut store = store.lock();

        let mut states = Vec::with_capacity(end - start);
        for (i, layer) in group.layers[start..end].iter_mut().enumerate() {
            let state = layer.data.take().map(|data| {
                debug_assert_eq!(data.len(), elem_count * stride);
                // Content comparison on layers with embedded allocations is
                // meaningless, so dynamic kinds always store a fresh copy.
                if kind.is_dynamic() {
                    store.state_add_unique(&data)
                } else {
                    let reference = aligned.and_then(|run| run.states.get(i).copied().flatten());
                    store.state_add(&data, reference)
                }
            });
            states.push(state);
        }
        runs.push(LayerRun { kind, states });

        cursor = cursor.map(|i| i + 1);
        start = end;
    }
    runs
}

/// Refill one domain's layer data from its compacted runs.
fn expand_group(group: &mut LayerGroup, elem_count: usize, runs: &[LayerRun], stores: &StoreSet) {
    let mut layers = group.layers.iter_mut();
    for run in runs {
        let stride = run.kind.stride();
        let store = stores.get(stride);
        let store = store.lock();
        for state in &run.states {
            let layer = match layers.next() {
                Some(l) => l,
                None => panic!("layer group shorter than its compacted runs"),
            };
            assert_eq!(layer.kind, run.kind);
            layer.data = state.map(|s| {
                let data = store.state_bytes(s);
                assert_eq!(data.len(), elem_count * stride);
                data
            });
        }
    }
}
