use std::sync::Arc;

use crate::foundation::core::GroupId;
use crate::foundation::error::{StrandError, StrandResult};
use crate::render::renderable::{Renderable as _, SharedRenderable};
use crate::render::target::{MultiGroupTarget, SharedTarget};

/// One `(target, renderable)` binding.
#[derive(Clone)]
pub struct PlanEntry {
    pub target: SharedTarget,
    pub renderable: SharedRenderable,
}

/// The current mapping of targets to renderables.
///
/// Iteration order is an implementation detail. The pipeline wraps the plan
/// in its plan mutex; every method here assumes that mutex is held, so the
/// whole of `add` (including conflict resolution) is one linearised
/// operation.
///
/// Lock order within an operation: the plan mutex outranks target locks,
/// which outrank renderable locks. No method holds two target locks at
/// once; the incoming target's membership is snapshotted up front instead.
#[derive(Default)]
pub struct RenderPlan {
    entries: Vec<PlanEntry>,
}

/// What conflict resolution decided to do with an existing entry.
enum Resolution {
    Keep,
    /// Same id set as the incoming target: the new binding replaces it.
    Replaced,
    /// Mutable container lost members; resize its renderable to `pixels`.
    Reshaped { pixels: usize },
    /// Container lost every member (or was an evictable singleton).
    Evicted,
}

impl RenderPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the entry list for one frame. Handles stay alive for the
    /// whole frame even if `remove` runs concurrently.
    pub fn snapshot(&self) -> Vec<PlanEntry> {
        self.entries.clone()
    }

    /// Insert a binding, resolving spatial conflicts with existing entries.
    ///
    /// Non-container targets insert or replace by handle identity. For a
    /// container target, every existing container sharing a group id is
    /// reconciled first: an identical id set is replaced; a mutable
    /// container is stripped of the shared ids (and dropped if that empties
    /// it, or its renderable resized otherwise); an immutable singleton is
    /// evicted; an immutable multi-member container makes the whole `add`
    /// fail with the plan untouched.
    pub fn add(&mut self, renderable: SharedRenderable, target: SharedTarget) -> StrandResult<()> {
        let (incoming, incoming_pixels) = {
            let t = target.lock();
            if t.num_pixels() == 0 {
                return Err(StrandError::invalid_arg("target covers zero pixels"));
            }
            (t.as_container().cloned(), t.num_pixels())
        };

        match incoming {
            None => {
                tracing::debug!(pixels = incoming_pixels, "inserting non-container target");
                if let Some(existing) = self
                    .entries
                    .iter_mut()
                    .find(|e| Arc::ptr_eq(&e.target, &target))
                {
                    existing.renderable = Arc::clone(&renderable);
                } else {
                    self.entries.push(PlanEntry {
                        target: Arc::clone(&target),
                        renderable: Arc::clone(&renderable),
                    });
                }
            }
            Some(incoming) => {
                // First a read-only scan: if any conflict is unresolvable
                // the plan must come out of this call unchanged.
                for entry in &self.entries {
                    let t = entry.target.lock();
                    let Some(existing) = t.as_container() else {
                        continue;
                    };
                    if !existing.contains(&incoming)
                        || existing.same_groups(&incoming)
                        || existing.is_mutable()
                        || existing.num_groups() == 1
                    {
                        continue;
                    }
                    return Err(StrandError::conflict(format!(
                        "groups {:?} overlap an immutable multi-group target",
                        existing.intersect(&incoming)
                    )));
                }

                let mut kept = Vec::with_capacity(self.entries.len() + 1);
                for entry in self.entries.drain(..) {
                    let resolution = resolve_entry(&entry, &incoming);
                    match resolution {
                        Resolution::Keep => kept.push(entry),
                        Resolution::Replaced => {
                            tracing::trace!("identical group set in existing entry; replacing");
                        }
                        Resolution::Evicted => {
                            tracing::trace!("evicting emptied conflicting entry");
                        }
                        Resolution::Reshaped { pixels } => {
                            tracing::trace!(pixels, "resizing renderable of reshaped entry");
                            entry.renderable.lock().resize(pixels);
                            kept.push(entry);
                        }
                    }
                }
                self.entries = kept;
                self.entries.push(PlanEntry {
                    target: Arc::clone(&target),
                    renderable: Arc::clone(&renderable),
                });
            }
        }

        // Size coherence: the renderable always matches its target.
        renderable.lock().resize(incoming_pixels);
        Ok(())
    }

    /// Erase the binding for `target`, matched by handle identity or, for
    /// containers, by id-set equality.
    pub fn remove(&mut self, target: &SharedTarget) -> StrandResult<()> {
        let incoming = target.lock().as_container().cloned();
        let pos = self.entries.iter().position(|e| {
            if Arc::ptr_eq(&e.target, target) {
                return true;
            }
            match (&incoming, e.target.lock().as_container()) {
                (Some(a), Some(b)) => a.same_groups(b),
                _ => false,
            }
        });
        match pos {
            Some(i) => {
                self.entries.remove(i);
                Ok(())
            }
            None => Err(StrandError::not_found("no such target in render plan")),
        }
    }

    /// Command-path removal by group id: strip `ids` out of every binding
    /// that covers them.
    ///
    /// Single-group targets and containers whose membership ends up empty
    /// are dropped; mutable containers that keep other members have their
    /// renderable resized. An immutable container only partially covered by
    /// `ids` fails the whole call with the plan unchanged.
    pub fn remove_groups(&mut self, ids: &[GroupId]) -> StrandResult<usize> {
        if ids.is_empty() {
            return Err(StrandError::invalid_arg("no group ids given"));
        }

        for entry in &self.entries {
            let t = entry.target.lock();
            let Some(container) = t.as_container() else {
                continue;
            };
            if container.is_mutable() {
                continue;
            }
            let member_ids = container.group_ids();
            let overlapping = member_ids.iter().any(|id| ids.contains(id));
            let covered = member_ids.iter().all(|id| ids.contains(id));
            if overlapping && !covered {
                return Err(StrandError::conflict(format!(
                    "groups {member_ids:?} belong to an immutable multi-group target",
                )));
            }
        }

        let mut affected = 0usize;
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            enum Step {
                Keep,
                Drop,
                Resize(usize),
            }
            let step = {
                let mut t = entry.target.lock();
                match t.as_container_mut() {
                    None => {
                        if ids.contains(&t.covered_ids()[0]) {
                            Step::Drop
                        } else {
                            Step::Keep
                        }
                    }
                    Some(container) => {
                        if !container.group_ids().iter().any(|id| ids.contains(id)) {
                            Step::Keep
                        } else if container.is_mutable() {
                            for id in ids {
                                container.remove_group(*id);
                            }
                            if container.num_groups() == 0 {
                                Step::Drop
                            } else {
                                Step::Resize(t.num_pixels())
                            }
                        } else {
                            // Pre-scan guarantees full coverage here.
                            Step::Drop
                        }
                    }
                }
            };
            match step {
                Step::Keep => kept.push(entry),
                Step::Drop => affected += 1,
                Step::Resize(pixels) => {
                    entry.renderable.lock().resize(pixels);
                    affected += 1;
                    kept.push(entry);
                }
            }
        }
        self.entries = kept;
        Ok(affected)
    }

    /// Rewrite the live brightness of every slice of `id`. Returns how many
    /// bindings were touched.
    pub fn set_brightness(&mut self, id: GroupId, brightness: f64) -> usize {
        let mut hits = 0;
        for entry in &self.entries {
            if entry.target.lock().set_brightness(id, brightness) {
                hits += 1;
            }
        }
        hits
    }

    /// Human-readable snapshot for diagnostics.
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let _ = writeln!(out, "plan: {} entries", self.entries.len());
        for (idx, entry) in self.entries.iter().enumerate() {
            let t = entry.target.lock();
            let ids = t
                .covered_ids()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let kind = if t.as_container().is_some() {
                "multi"
            } else {
                "single"
            };
            let _ = writeln!(
                out,
                "  [{idx}] {kind} groups=[{ids}] pixels={} renderable={} px",
                t.num_pixels(),
                entry.renderable.lock().len(),
            );
        }
        out
    }
}

/// Decide and apply the fate of one existing entry against an incoming
/// container. Member removal happens here, under the entry's target lock;
/// renderable resizing is left to the caller so the two locks are never
/// nested.
fn resolve_entry(entry: &PlanEntry, incoming: &MultiGroupTarget) -> Resolution {
    let mut t = entry.target.lock();
    let Some(existing) = t.as_container_mut() else {
        return Resolution::Keep;
    };
    if !existing.contains(incoming) {
        return Resolution::Keep;
    }

    tracing::debug!(
        existing = ?existing.group_ids(),
        incoming = ?incoming.group_ids(),
        "conflict between incoming container and existing entry"
    );

    if existing.same_groups(incoming) {
        return Resolution::Replaced;
    }

    if !existing.is_mutable() {
        // The pre-scan only lets singletons through to this point.
        return Resolution::Evicted;
    }

    let intersection = existing.intersect(incoming);
    tracing::trace!(
        count = intersection.len(),
        "removing shared groups from conflicting entry"
    );
    for id in &intersection {
        existing.remove_group(*id);
    }
    if existing.num_groups() == 0 {
        return Resolution::Evicted;
    }
    Resolution::Reshaped {
        pixels: t.num_pixels(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::{GroupId, HsiPixel};
    use crate::render::renderable::{FillRenderable, Renderable as _, shared};
    use crate::render::target::Target;
    use crate::store::model::Group;

    fn group(id: u32, start: usize, end: usize) -> Group {
        Group {
            id: GroupId(id),
            name: format!("g{id}"),
            enabled: true,
            start,
            end,
            brightness: 1.0,
            mirrored: false,
        }
    }

    fn fill(len: usize) -> SharedRenderable {
        shared(FillRenderable::new(len, HsiPixel::new(0.0, 1.0, 1.0)))
    }

    fn multi(groups: &[Group]) -> SharedTarget {
        Target::from_groups(groups).unwrap().shared()
    }

    fn ids_of(plan: &RenderPlan) -> Vec<Vec<GroupId>> {
        plan.snapshot()
            .iter()
            .map(|e| e.target.lock().covered_ids())
            .collect()
    }

    #[test]
    fn add_resizes_renderable_to_target() {
        let mut plan = RenderPlan::default();
        let r = fill(1);
        plan.add(Arc::clone(&r), multi(&[group(1, 0, 3), group(2, 4, 9)]))
            .unwrap();
        assert_eq!(r.lock().len(), 10);
    }

    #[test]
    fn conflict_with_mutable_container_strips_and_resizes() {
        let mut plan = RenderPlan::default();
        let r1 = fill(0);
        let r2 = fill(0);
        plan.add(Arc::clone(&r1), multi(&[group(1, 0, 3), group(2, 4, 7)]))
            .unwrap();
        plan.add(Arc::clone(&r2), multi(&[group(2, 4, 7), group(3, 8, 11)]))
            .unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(
            ids_of(&plan),
            vec![vec![GroupId(1)], vec![GroupId(2), GroupId(3)]]
        );
        assert_eq!(r1.lock().len(), 4, "surviving renderable shrank to its group");
        assert_eq!(r2.lock().len(), 8);
    }

    #[test]
    fn conflict_with_immutable_multi_member_fails_and_leaves_plan_unchanged() {
        let mut plan = RenderPlan::default();
        let r1 = fill(0);
        let fixed = Target::MultiGroup(
            crate::render::target::MultiGroupTarget::fixed(&[group(1, 0, 3), group(2, 4, 7)])
                .unwrap(),
        )
        .shared();
        plan.add(Arc::clone(&r1), Arc::clone(&fixed)).unwrap();

        let r2 = fill(0);
        let err = plan.add(Arc::clone(&r2), multi(&[group(2, 4, 7)])).unwrap_err();
        assert!(matches!(err, StrandError::UnresolvableConflict(_)));

        assert_eq!(plan.len(), 1);
        assert_eq!(ids_of(&plan), vec![vec![GroupId(1), GroupId(2)]]);
        assert_eq!(r1.lock().len(), 8, "existing renderable untouched");
    }

    #[test]
    fn conflict_with_immutable_singleton_evicts_it() {
        let mut plan = RenderPlan::default();
        let fixed = Target::MultiGroup(
            crate::render::target::MultiGroupTarget::fixed(&[group(1, 0, 3)]).unwrap(),
        )
        .shared();
        plan.add(fill(0), fixed).unwrap();

        plan.add(fill(0), multi(&[group(1, 0, 3), group(2, 4, 7)]))
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(ids_of(&plan), vec![vec![GroupId(1), GroupId(2)]]);
    }

    #[test]
    fn identical_id_set_replaces_entry() {
        let mut plan = RenderPlan::default();
        let r1 = fill(0);
        let r2 = fill(0);
        plan.add(Arc::clone(&r1), multi(&[group(1, 0, 3), group(2, 4, 7)]))
            .unwrap();
        // Different handle, same id set, members in the other order.
        plan.add(Arc::clone(&r2), multi(&[group(2, 4, 7), group(1, 0, 3)]))
            .unwrap();

        assert_eq!(plan.len(), 1);
        let entry = plan.snapshot().remove(0);
        assert!(Arc::ptr_eq(&entry.renderable, &r2));
    }

    #[test]
    fn add_is_idempotent() {
        let mut plan = RenderPlan::default();
        let r = fill(0);
        let t = multi(&[group(1, 0, 3)]);
        plan.add(Arc::clone(&r), Arc::clone(&t)).unwrap();
        plan.add(Arc::clone(&r), Arc::clone(&t)).unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(r.lock().len(), 4);
    }

    #[test]
    fn remove_round_trips() {
        let mut plan = RenderPlan::default();
        let t = multi(&[group(1, 0, 3)]);
        plan.add(fill(0), Arc::clone(&t)).unwrap();
        plan.remove(&t).unwrap();
        assert!(plan.is_empty());

        assert!(matches!(plan.remove(&t), Err(StrandError::NotFound(_))));
    }

    #[test]
    fn remove_matches_container_by_id_set() {
        let mut plan = RenderPlan::default();
        plan.add(fill(0), multi(&[group(1, 0, 3), group(2, 4, 7)]))
            .unwrap();
        // Fresh handle, same ids.
        plan.remove(&multi(&[group(2, 4, 7), group(1, 0, 3)])).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn no_group_id_appears_in_two_containers() {
        let mut plan = RenderPlan::default();
        plan.add(fill(0), multi(&[group(1, 0, 1), group(2, 2, 3)]))
            .unwrap();
        plan.add(fill(0), multi(&[group(2, 2, 3), group(3, 4, 5)]))
            .unwrap();
        plan.add(fill(0), multi(&[group(1, 0, 1), group(3, 4, 5)]))
            .unwrap();

        let mut seen = Vec::new();
        for ids in ids_of(&plan) {
            for id in ids {
                assert!(!seen.contains(&id), "group {id} mapped twice");
                seen.push(id);
            }
        }
    }

    #[test]
    fn non_container_targets_key_by_handle() {
        let mut plan = RenderPlan::default();
        let t = Target::from_group(&group(1, 0, 3)).unwrap().shared();
        let r1 = fill(0);
        let r2 = fill(0);
        plan.add(Arc::clone(&r1), Arc::clone(&t)).unwrap();
        plan.add(Arc::clone(&r2), Arc::clone(&t)).unwrap();

        assert_eq!(plan.len(), 1);
        assert!(Arc::ptr_eq(&plan.snapshot()[0].renderable, &r2));

        // A different handle over the same group does not replace it.
        let t2 = Target::from_group(&group(1, 0, 3)).unwrap().shared();
        plan.add(fill(0), t2).unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn remove_groups_strips_and_drops() {
        let mut plan = RenderPlan::default();
        let r1 = fill(0);
        plan.add(Arc::clone(&r1), multi(&[group(1, 0, 3), group(2, 4, 7)]))
            .unwrap();
        let single = Target::from_group(&group(3, 8, 9)).unwrap().shared();
        plan.add(fill(0), single).unwrap();

        let affected = plan.remove_groups(&[GroupId(2), GroupId(3)]).unwrap();
        assert_eq!(affected, 2);
        assert_eq!(plan.len(), 1);
        assert_eq!(ids_of(&plan), vec![vec![GroupId(1)]]);
        assert_eq!(r1.lock().len(), 4);
    }

    #[test]
    fn remove_groups_rejects_partial_immutable_coverage() {
        let mut plan = RenderPlan::default();
        let fixed = Target::MultiGroup(
            crate::render::target::MultiGroupTarget::fixed(&[group(1, 0, 3), group(2, 4, 7)])
                .unwrap(),
        )
        .shared();
        plan.add(fill(0), fixed).unwrap();

        assert!(matches!(
            plan.remove_groups(&[GroupId(1)]),
            Err(StrandError::UnresolvableConflict(_))
        ));
        assert_eq!(plan.len(), 1);

        // Full coverage drops the immutable container.
        assert_eq!(plan.remove_groups(&[GroupId(1), GroupId(2)]).unwrap(), 1);
        assert!(plan.is_empty());
    }

    #[test]
    fn set_brightness_touches_matching_slices() {
        let mut plan = RenderPlan::default();
        plan.add(fill(0), multi(&[group(1, 0, 3)])).unwrap();
        assert_eq!(plan.set_brightness(GroupId(1), 0.25), 1);
        assert_eq!(plan.set_brightness(GroupId(9), 0.25), 0);
    }

    #[test]
    fn dump_lists_entries() {
        let mut plan = RenderPlan::default();
        plan.add(fill(0), multi(&[group(1, 0, 3), group(2, 4, 7)]))
            .unwrap();
        let dump = plan.dump();
        assert!(dump.contains("plan: 1 entries"));
        assert!(dump.contains("g1"));
        assert!(dump.contains("pixels=8"));
    }
}
