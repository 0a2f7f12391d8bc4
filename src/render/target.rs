use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::foundation::core::{FrameToken, GroupId, HsiPixel};
use crate::foundation::error::{StrandError, StrandResult};
use crate::render::framebuffer::Framebuffer;
use crate::store::model::Group;

/// Value snapshot of a persisted [`Group`], copied into a target at
/// construction time. Targets never hold references into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSlice {
    pub id: GroupId,
    pub start: usize,
    pub end: usize,
    pub brightness: f64,
    pub mirrored: bool,
}

impl GroupSlice {
    pub fn num_pixels(&self) -> usize {
        (self.end - self.start) + 1
    }
}

impl From<&Group> for GroupSlice {
    fn from(g: &Group) -> Self {
        Self {
            id: g.id,
            start: g.start,
            end: g.end,
            brightness: g.brightness,
            mirrored: g.mirrored,
        }
    }
}

/// Writes one contiguous framebuffer range from a single group.
#[derive(Debug, Clone)]
pub struct GroupTarget {
    group: GroupSlice,
}

impl GroupTarget {
    pub fn new(group: &Group) -> StrandResult<Self> {
        if group.end < group.start {
            return Err(StrandError::invalid_arg(format!(
                "group {} range {}..={} is inverted",
                group.id, group.start, group.end
            )));
        }
        Ok(Self {
            group: GroupSlice::from(group),
        })
    }

    pub fn group_id(&self) -> GroupId {
        self.group.id
    }
}

/// Writes the concatenation of several groups' framebuffer ranges, in member
/// order. Supports the set operations conflict resolution needs.
///
/// Containers built with [`MultiGroupTarget::new`] are mutable: conflict
/// resolution may strip members out of them. [`MultiGroupTarget::fixed`]
/// builds an immutable container whose membership is final; an overlapping
/// `add` against one fails instead of reshaping it (unless every member
/// conflicts away, see the plan rules).
#[derive(Debug, Clone)]
pub struct MultiGroupTarget {
    groups: SmallVec<[GroupSlice; 4]>,
    mutable: bool,
}

impl MultiGroupTarget {
    pub fn new(groups: &[Group]) -> StrandResult<Self> {
        Self::build(groups, true)
    }

    /// Immutable variant: membership cannot be reshaped by conflict
    /// resolution.
    pub fn fixed(groups: &[Group]) -> StrandResult<Self> {
        Self::build(groups, false)
    }

    fn build(groups: &[Group], mutable: bool) -> StrandResult<Self> {
        if groups.is_empty() {
            return Err(StrandError::invalid_arg(
                "a multi-group target needs at least one group",
            ));
        }
        let mut out = SmallVec::<[GroupSlice; 4]>::with_capacity(groups.len());
        for g in groups {
            if g.end < g.start {
                return Err(StrandError::invalid_arg(format!(
                    "group {} range {}..={} is inverted",
                    g.id, g.start, g.end
                )));
            }
            if out.iter().any(|s: &GroupSlice| s.id == g.id) {
                return Err(StrandError::invalid_arg(format!(
                    "group {} listed twice in multi-group target",
                    g.id
                )));
            }
            out.push(GroupSlice::from(g));
        }
        Ok(Self {
            groups: out,
            mutable,
        })
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.iter().map(|g| g.id).collect()
    }

    /// True when the two containers share at least one group id.
    pub fn contains(&self, other: &MultiGroupTarget) -> bool {
        self.groups
            .iter()
            .any(|g| other.groups.iter().any(|o| o.id == g.id))
    }

    /// Group ids present in both containers.
    pub fn intersect(&self, other: &MultiGroupTarget) -> Vec<GroupId> {
        self.groups
            .iter()
            .filter(|g| other.groups.iter().any(|o| o.id == g.id))
            .map(|g| g.id)
            .collect()
    }

    /// True when both containers cover exactly the same group ids.
    pub fn same_groups(&self, other: &MultiGroupTarget) -> bool {
        self.num_groups() == other.num_groups() && self.intersect(other).len() == self.num_groups()
    }

    /// Drop a member by id. Returns whether anything was removed.
    pub fn remove_group(&mut self, id: GroupId) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| g.id != id);
        self.groups.len() != before
    }

    pub(crate) fn slices(&self) -> &[GroupSlice] {
        &self.groups
    }
}

/// Where a renderable's pixels land in the framebuffer.
///
/// The container capability (set operations, member removal) belongs to the
/// [`MultiGroupTarget`] variant alone; a [`GroupTarget`] is an opaque
/// single-range destination keyed by handle identity in the plan.
#[derive(Debug, Clone)]
pub enum Target {
    Group(GroupTarget),
    MultiGroup(MultiGroupTarget),
}

/// Shared handle to a target. The mutex is the target's lock, held while
/// conflict resolution reshapes membership and while a render job inscribes.
pub type SharedTarget = Arc<Mutex<Target>>;

impl Target {
    /// Wrap a target for handing to the pipeline.
    pub fn shared(self) -> SharedTarget {
        Arc::new(Mutex::new(self))
    }

    pub fn from_group(group: &Group) -> StrandResult<Target> {
        Ok(Target::Group(GroupTarget::new(group)?))
    }

    pub fn from_groups(groups: &[Group]) -> StrandResult<Target> {
        Ok(Target::MultiGroup(MultiGroupTarget::new(groups)?))
    }

    pub fn num_pixels(&self) -> usize {
        match self {
            Target::Group(t) => t.group.num_pixels(),
            Target::MultiGroup(t) => t.groups.iter().map(GroupSlice::num_pixels).sum(),
        }
    }

    pub fn as_container(&self) -> Option<&MultiGroupTarget> {
        match self {
            Target::Group(_) => None,
            Target::MultiGroup(t) => Some(t),
        }
    }

    pub fn as_container_mut(&mut self) -> Option<&mut MultiGroupTarget> {
        match self {
            Target::Group(_) => None,
            Target::MultiGroup(t) => Some(t),
        }
    }

    /// Group ids this target covers, container or not. Used by the
    /// command-path removal that operates on ids rather than handles.
    pub(crate) fn covered_ids(&self) -> Vec<GroupId> {
        match self {
            Target::Group(t) => vec![t.group.id],
            Target::MultiGroup(t) => t.group_ids(),
        }
    }

    pub(crate) fn set_brightness(&mut self, id: GroupId, brightness: f64) -> bool {
        let slices: &mut [GroupSlice] = match self {
            Target::Group(t) => std::slice::from_mut(&mut t.group),
            Target::MultiGroup(t) => &mut t.groups,
        };
        let mut hit = false;
        for s in slices.iter_mut().filter(|s| s.id == id) {
            s.brightness = brightness;
            hit = true;
        }
        hit
    }

    /// Copy `pixels` into the framebuffer under `token`: one sub-slice per
    /// group, in member order, reversed when the group is mirrored, with
    /// brightness applied multiplicatively to intensity.
    ///
    /// `pixels` must be exactly `num_pixels()` long; the renderable was
    /// resized to match when the plan entry was made.
    pub fn inscribe(
        &self,
        fb: &Framebuffer,
        token: FrameToken,
        pixels: &[HsiPixel],
    ) -> StrandResult<()> {
        if pixels.len() != self.num_pixels() {
            return Err(StrandError::render(format!(
                "renderable produced {} pixels, target covers {}",
                pixels.len(),
                self.num_pixels()
            )));
        }

        let mut cursor = 0usize;
        let slices: &[GroupSlice] = match self {
            Target::Group(t) => std::slice::from_ref(&t.group),
            Target::MultiGroup(t) => t.slices(),
        };
        for slice in slices {
            let n = slice.num_pixels();
            let sub = &pixels[cursor..cursor + n];
            let mut out: Vec<HsiPixel> = Vec::with_capacity(n);
            if slice.mirrored {
                out.extend(sub.iter().rev().map(|p| p.scale_intensity(slice.brightness)));
            } else {
                out.extend(sub.iter().map(|p| p.scale_intensity(slice.brightness)));
            }
            fb.write(token, slice.start, &out)?;
            cursor += n;
        }
        Ok(())
    }
}
