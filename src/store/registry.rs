use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::foundation::core::GroupId;
use crate::foundation::error::{StrandError, StrandResult};
use crate::store::model::{Channel, Group, Node, Routine};

/// In-memory store of all persisted server entities, keyed by id.
///
/// The registry hands out entities by value only; nothing in the render
/// pipeline ever holds a reference into the store. `load`/`save` move the
/// whole state through a single JSON document.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<State>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct State {
    info: BTreeMap<String, String>,
    groups: BTreeMap<u32, Group>,
    nodes: BTreeMap<u32, Node>,
    channels: BTreeMap<u32, Channel>,
    routines: BTreeMap<u32, Routine>,
    next_id: u32,
}

impl State {
    fn assign_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry from a JSON file. A missing file yields an empty
    /// registry, so first boot needs no provisioning step.
    pub fn load(path: impl AsRef<Path>) -> StrandResult<Self> {
        let path = path.as_ref();
        let f = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => {
                return Err(StrandError::config(format!(
                    "open store '{}': {e}",
                    path.display()
                )));
            }
        };
        let state: State = serde_json::from_reader(BufReader::new(f))
            .map_err(|e| StrandError::config(format!("parse store '{}': {e}", path.display())))?;
        Ok(Self {
            inner: Mutex::new(state),
        })
    }

    /// Persist the registry as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> StrandResult<()> {
        let path = path.as_ref();
        let f = File::create(path)
            .map_err(|e| StrandError::config(format!("create store '{}': {e}", path.display())))?;
        let state = self.inner.lock();
        serde_json::to_writer_pretty(BufWriter::new(f), &*state)
            .map_err(|e| StrandError::config(format!("write store '{}': {e}", path.display())))?;
        Ok(())
    }

    pub fn set_info(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().info.insert(key.into(), value.into());
    }

    pub fn info(&self, key: &str) -> Option<String> {
        self.inner.lock().info.get(key).cloned()
    }

    // Groups.

    /// Insert a group, assigning a fresh id. Returns the assigned id.
    pub fn add_group(&self, mut group: Group) -> StrandResult<GroupId> {
        if group.end < group.start {
            return Err(StrandError::invalid_arg(format!(
                "group range {}..={} is inverted",
                group.start, group.end
            )));
        }
        let mut state = self.inner.lock();
        let id = state.assign_id();
        group.id = GroupId(id);
        state.groups.insert(id, group);
        Ok(GroupId(id))
    }

    pub fn update_group(&self, group: Group) -> StrandResult<()> {
        if group.end < group.start {
            return Err(StrandError::invalid_arg(format!(
                "group range {}..={} is inverted",
                group.start, group.end
            )));
        }
        let mut state = self.inner.lock();
        match state.groups.get_mut(&group.id.0) {
            Some(slot) => {
                *slot = group;
                Ok(())
            }
            None => Err(StrandError::not_found(format!("group {}", group.id))),
        }
    }

    pub fn group(&self, id: GroupId) -> Option<Group> {
        self.inner.lock().groups.get(&id.0).cloned()
    }

    pub fn all_groups(&self) -> Vec<Group> {
        self.inner.lock().groups.values().cloned().collect()
    }

    // Nodes.

    pub fn add_node(&self, mut node: Node) -> u32 {
        let mut state = self.inner.lock();
        let id = state.assign_id();
        node.id = id;
        state.nodes.insert(id, node);
        id
    }

    pub fn update_node(&self, node: Node) -> StrandResult<()> {
        let mut state = self.inner.lock();
        match state.nodes.get_mut(&node.id) {
            Some(slot) => {
                *slot = node;
                Ok(())
            }
            None => Err(StrandError::not_found(format!("node {}", node.id))),
        }
    }

    pub fn node(&self, id: u32) -> Option<Node> {
        self.inner.lock().nodes.get(&id).cloned()
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        self.inner.lock().nodes.values().cloned().collect()
    }

    // Channels.

    pub fn add_channel(&self, channel: Channel) -> StrandResult<u32> {
        let mut state = self.inner.lock();
        if !state.nodes.contains_key(&channel.node_id) {
            return Err(StrandError::not_found(format!("node {}", channel.node_id)));
        }
        let id = state.assign_id();
        let mut channel = channel;
        channel.id = id;
        state.channels.insert(id, channel);
        Ok(id)
    }

    pub fn update_channel(&self, channel: Channel) -> StrandResult<()> {
        let mut state = self.inner.lock();
        if !state.nodes.contains_key(&channel.node_id) {
            return Err(StrandError::not_found(format!("node {}", channel.node_id)));
        }
        match state.channels.get_mut(&channel.id) {
            Some(slot) => {
                *slot = channel;
                Ok(())
            }
            None => Err(StrandError::not_found(format!("channel {}", channel.id))),
        }
    }

    pub fn channel(&self, id: u32) -> Option<Channel> {
        self.inner.lock().channels.get(&id).cloned()
    }

    pub fn all_channels(&self) -> Vec<Channel> {
        self.inner.lock().channels.values().cloned().collect()
    }

    // Routines.

    pub fn add_routine(&self, mut routine: Routine) -> u32 {
        let mut state = self.inner.lock();
        let id = state.assign_id();
        routine.id = id;
        state.routines.insert(id, routine);
        id
    }

    pub fn update_routine(&self, routine: Routine) -> StrandResult<()> {
        let mut state = self.inner.lock();
        match state.routines.get_mut(&routine.id) {
            Some(slot) => {
                *slot = routine;
                Ok(())
            }
            None => Err(StrandError::not_found(format!("routine {}", routine.id))),
        }
    }

    pub fn routine(&self, id: u32) -> Option<Routine> {
        self.inner.lock().routines.get(&id).cloned()
    }

    pub fn all_routines(&self) -> Vec<Routine> {
        self.inner.lock().routines.values().cloned().collect()
    }
}
