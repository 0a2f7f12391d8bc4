use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::model::{Channel, Group, Node, Routine};

/// Requests understood by the command endpoint. Schema-level only; the wire
/// transport that carries these is a separate concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Status,
    ListNodes,
    UpdateNode { id: u32, set: NodePatch },
    ListGroups,
    UpdateGroup { id: u32, set: GroupPatch },
    ListRoutines,
    UpdateRoutine { id: u32, set: RoutinePatch },
    ListChannels,
    UpdateChannel { id: u32, set: ChannelPatch },
    AddMapping {
        routine_id: u32,
        group_ids: Vec<u32>,
        #[serde(default)]
        params: BTreeMap<String, f64>,
    },
    RemoveMapping { group_ids: Vec<u32> },
    GetBrightness { group_id: u32 },
    SetBrightness { group_id: u32, brightness: f64 },
}

/// A request plus the client's optional transaction marker, echoed back in
/// the reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(flatten)]
    pub request: Request,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn: Option<serde_json::Value>,
}

/// Field-wise updates for an existing group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub start: Option<usize>,
    pub end: Option<usize>,
    pub brightness: Option<f64>,
    pub mirrored: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodePatch {
    pub hostname: Option<String>,
    pub adopted: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutinePatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub default_params: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelPatch {
    pub node_id: Option<u32>,
    pub node_index: Option<u32>,
    pub fb_offset: Option<usize>,
    pub num_pixels: Option<usize>,
}

/// Reply status codes. Zero is success; everything else names the entity or
/// condition at fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    InvalidRequest = 1,
    InvalidNode = 2,
    InvalidGroup = 3,
    InvalidRoutine = 4,
    InvalidChannel = 5,
    Conflict = 6,
    NotRunning = 7,
    Internal = 8,
}

/// Server vitals for the status request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub version: String,
    pub frames_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_fps: Option<f64>,
    pub groups: usize,
    pub nodes: usize,
    pub routines: usize,
    pub channels: usize,
}

/// Endpoint reply: a status code plus whichever payload fields the request
/// produced, and the echoed transaction marker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Id of the entity a lookup failed on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<Group>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routines: Option<Vec<Routine>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<Channel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn: Option<serde_json::Value>,
}

impl Reply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failed(code: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status: code as i32,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn failed_for(code: StatusCode, error: impl Into<String>, id: u32) -> Self {
        Self {
            id: Some(id),
            ..Self::failed(code, error)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok as i32
    }
}
