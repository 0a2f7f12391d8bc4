use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::foundation::core::GroupId;

/// A named, persisted range of the logical framebuffer.
///
/// `start..=end` is inclusive on both ends, so a group always covers at
/// least one pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub enabled: bool,
    pub start: usize,
    pub end: usize,
    #[serde(default = "default_brightness")]
    pub brightness: f64,
    #[serde(default)]
    pub mirrored: bool,
}

fn default_brightness() -> f64 {
    1.0
}

impl Group {
    pub fn num_pixels(&self) -> usize {
        (self.end - self.start) + 1
    }

    /// Half-open framebuffer range covered by this group.
    pub fn fb_range(&self) -> Range<usize> {
        self.start..self.end + 1
    }
}

/// An output node on the network that drives one or more LED channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub hostname: String,
    /// Last known address, as reported by the node protocol handler.
    #[serde(default)]
    pub addr: Option<String>,
    pub adopted: bool,
    pub hw_version: u32,
    pub sw_version: u32,
    /// Unix timestamp of the last packet seen from this node.
    #[serde(default)]
    pub last_seen: u64,
}

/// One physical output channel on a node: a window into the framebuffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: u32,
    pub node_id: u32,
    /// Channel index on the node hardware.
    pub node_index: u32,
    /// Offset of this channel's first pixel in the framebuffer.
    pub fb_offset: usize,
    pub num_pixels: usize,
}

impl Channel {
    pub fn fb_range(&self) -> Range<usize> {
        self.fb_offset..self.fb_offset + self.num_pixels
    }
}

/// A stored effect routine.
///
/// `code` names the effect implementation; parameter defaults may be
/// overridden per mapping by the command endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    pub id: u32,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub default_params: BTreeMap<String, f64>,
}
