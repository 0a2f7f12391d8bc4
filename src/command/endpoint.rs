use std::collections::BTreeMap;
use std::sync::Arc;

use crate::command::schema::{
    ChannelPatch, GroupPatch, NodePatch, Reply, Request, RequestEnvelope, RoutinePatch,
    ServerStatus, StatusCode,
};
use crate::foundation::core::{GroupId, HsiPixel};
use crate::foundation::error::{StrandError, StrandResult};
use crate::render::pipeline::Pipeline;
use crate::render::renderable::{FillRenderable, SharedRenderable, SweepRenderable, shared};
use crate::store::model::Group;
use crate::store::registry::Registry;

/// The command endpoint: resolves entity ids against the registry and
/// expresses mapping changes as render pipeline calls.
///
/// Every request produces a reply; failures become status codes, never
/// panics or dropped requests. Transport (socket handling, framing) lives
/// outside this type.
pub struct Endpoint {
    registry: Arc<Registry>,
    pipeline: Arc<Pipeline>,
    pretty_replies: bool,
}

impl Endpoint {
    pub fn new(registry: Arc<Registry>, pipeline: Arc<Pipeline>, pretty_replies: bool) -> Self {
        Self {
            registry,
            pipeline,
            pretty_replies,
        }
    }

    /// Handle one raw JSON request and produce the serialized reply,
    /// echoing the client's `txn` marker.
    pub fn handle_json(&self, raw: &str) -> String {
        let reply = match serde_json::from_str::<RequestEnvelope>(raw) {
            Ok(envelope) => {
                let mut reply = self.handle(envelope.request);
                reply.txn = envelope.txn;
                reply
            }
            Err(e) => {
                tracing::warn!(error = %e, "unparseable command request");
                Reply::failed(StatusCode::InvalidRequest, format!("parse request: {e}"))
            }
        };

        let serialized = if self.pretty_replies {
            serde_json::to_string_pretty(&reply)
        } else {
            serde_json::to_string(&reply)
        };
        serialized.unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize reply");
            format!(r#"{{"status":{}}}"#, StatusCode::Internal as i32)
        })
    }

    /// Dispatch one parsed request.
    pub fn handle(&self, request: Request) -> Reply {
        tracing::trace!(?request, "handling command request");
        match request {
            Request::Status => self.status(),
            Request::ListNodes => Reply {
                nodes: Some(self.registry.all_nodes()),
                ..Reply::ok()
            },
            Request::UpdateNode { id, set } => self.update_node(id, set),
            Request::ListGroups => Reply {
                groups: Some(self.registry.all_groups()),
                ..Reply::ok()
            },
            Request::UpdateGroup { id, set } => self.update_group(id, set),
            Request::ListRoutines => Reply {
                routines: Some(self.registry.all_routines()),
                ..Reply::ok()
            },
            Request::UpdateRoutine { id, set } => self.update_routine(id, set),
            Request::ListChannels => Reply {
                channels: Some(self.registry.all_channels()),
                ..Reply::ok()
            },
            Request::UpdateChannel { id, set } => self.update_channel(id, set),
            Request::AddMapping {
                routine_id,
                group_ids,
                params,
            } => self.add_mapping(routine_id, &group_ids, &params),
            Request::RemoveMapping { group_ids } => self.remove_mapping(&group_ids),
            Request::GetBrightness { group_id } => self.get_brightness(group_id),
            Request::SetBrightness {
                group_id,
                brightness,
            } => self.set_brightness(group_id, brightness),
        }
    }

    fn status(&self) -> Reply {
        let stats = self.pipeline.stats();
        Reply {
            server: Some(ServerStatus {
                version: env!("CARGO_PKG_VERSION").to_owned(),
                frames_total: stats.frames_total,
                observed_fps: stats.observed_fps,
                groups: self.registry.all_groups().len(),
                nodes: self.registry.all_nodes().len(),
                routines: self.registry.all_routines().len(),
                channels: self.registry.all_channels().len(),
            }),
            ..Reply::ok()
        }
    }

    /// Fetch every requested group, failing on the first unknown id.
    fn resolve_groups(&self, group_ids: &[u32]) -> Result<Vec<Group>, Reply> {
        if group_ids.is_empty() {
            return Err(Reply::failed(
                StatusCode::InvalidRequest,
                "at least one group id is required",
            ));
        }
        let mut groups = Vec::with_capacity(group_ids.len());
        for &id in group_ids {
            match self.registry.group(GroupId(id)) {
                Some(g) => groups.push(g),
                None => {
                    return Err(Reply::failed_for(
                        StatusCode::InvalidGroup,
                        "no group with the specified id",
                        id,
                    ));
                }
            }
        }
        Ok(groups)
    }

    fn add_mapping(&self, routine_id: u32, group_ids: &[u32], params: &BTreeMap<String, f64>) -> Reply {
        let Some(routine) = self.registry.routine(routine_id) else {
            return Reply::failed_for(
                StatusCode::InvalidRoutine,
                "no routine with the specified id",
                routine_id,
            );
        };
        let groups = match self.resolve_groups(group_ids) {
            Ok(groups) => groups,
            Err(reply) => return reply,
        };

        let renderable = match build_renderable(&routine.code, &routine.default_params, params) {
            Ok(r) => r,
            Err(e) => {
                return Reply::failed_for(StatusCode::InvalidRoutine, e.to_string(), routine_id);
            }
        };

        let outcome = if groups.len() == 1 {
            self.pipeline.add_group(renderable, &groups[0]).map(|_| ())
        } else {
            self.pipeline.add_groups(renderable, &groups).map(|_| ())
        };
        match outcome {
            Ok(()) => Reply::ok(),
            Err(e) => pipeline_error_reply(e),
        }
    }

    fn remove_mapping(&self, group_ids: &[u32]) -> Reply {
        let groups = match self.resolve_groups(group_ids) {
            Ok(groups) => groups,
            Err(reply) => return reply,
        };
        let ids: Vec<GroupId> = groups.iter().map(|g| g.id).collect();
        match self.pipeline.remove_groups(&ids) {
            Ok(affected) => {
                tracing::debug!(affected, "removed mappings");
                Reply::ok()
            }
            Err(e) => pipeline_error_reply(e),
        }
    }

    fn get_brightness(&self, group_id: u32) -> Reply {
        match self.registry.group(GroupId(group_id)) {
            Some(g) => Reply {
                brightness: Some(g.brightness),
                ..Reply::ok()
            },
            None => Reply::failed_for(
                StatusCode::InvalidGroup,
                "no group with the specified id",
                group_id,
            ),
        }
    }

    /// Persist the new brightness and rewrite it on any live target slices,
    /// so the next frame renders with it.
    fn set_brightness(&self, group_id: u32, brightness: f64) -> Reply {
        let Some(mut group) = self.registry.group(GroupId(group_id)) else {
            return Reply::failed_for(
                StatusCode::InvalidGroup,
                "no group with the specified id",
                group_id,
            );
        };
        match self.pipeline.set_brightness(GroupId(group_id), brightness) {
            Ok(touched) => {
                tracing::debug!(group_id, brightness, touched, "brightness updated");
            }
            Err(e) => return pipeline_error_reply(e),
        }
        group.brightness = brightness;
        match self.registry.update_group(group) {
            Ok(()) => Reply::ok(),
            Err(e) => Reply::failed(StatusCode::Internal, e.to_string()),
        }
    }

    fn update_group(&self, id: u32, set: GroupPatch) -> Reply {
        let Some(mut group) = self.registry.group(GroupId(id)) else {
            return Reply::failed_for(
                StatusCode::InvalidGroup,
                "no group with the specified id",
                id,
            );
        };
        if let Some(name) = set.name {
            group.name = name;
        }
        if let Some(enabled) = set.enabled {
            group.enabled = enabled;
        }
        if let Some(start) = set.start {
            group.start = start;
        }
        if let Some(end) = set.end {
            group.end = end;
        }
        if let Some(brightness) = set.brightness {
            group.brightness = brightness;
        }
        if let Some(mirrored) = set.mirrored {
            group.mirrored = mirrored;
        }
        match self.registry.update_group(group) {
            Ok(()) => Reply::ok(),
            Err(e) => Reply::failed_for(StatusCode::InvalidGroup, e.to_string(), id),
        }
    }

    fn update_node(&self, id: u32, set: NodePatch) -> Reply {
        let Some(mut node) = self.registry.node(id) else {
            return Reply::failed_for(StatusCode::InvalidNode, "no node with the specified id", id);
        };
        if let Some(hostname) = set.hostname {
            node.hostname = hostname;
        }
        if let Some(adopted) = set.adopted {
            node.adopted = adopted;
        }
        match self.registry.update_node(node) {
            Ok(()) => Reply::ok(),
            Err(e) => Reply::failed_for(StatusCode::InvalidNode, e.to_string(), id),
        }
    }

    fn update_routine(&self, id: u32, set: RoutinePatch) -> Reply {
        let Some(mut routine) = self.registry.routine(id) else {
            return Reply::failed_for(
                StatusCode::InvalidRoutine,
                "no routine with the specified id",
                id,
            );
        };
        if let Some(name) = set.name {
            routine.name = name;
        }
        if let Some(code) = set.code {
            routine.code = code;
        }
        if let Some(default_params) = set.default_params {
            routine.default_params = default_params;
        }
        match self.registry.update_routine(routine) {
            Ok(()) => Reply::ok(),
            Err(e) => Reply::failed_for(StatusCode::InvalidRoutine, e.to_string(), id),
        }
    }

    fn update_channel(&self, id: u32, set: ChannelPatch) -> Reply {
        let Some(mut channel) = self.registry.channel(id) else {
            return Reply::failed_for(
                StatusCode::InvalidChannel,
                "no channel with the specified id",
                id,
            );
        };
        if let Some(node_id) = set.node_id {
            if self.registry.node(node_id).is_none() {
                return Reply::failed_for(
                    StatusCode::InvalidNode,
                    "no node with the specified id",
                    node_id,
                );
            }
            channel.node_id = node_id;
        }
        if let Some(node_index) = set.node_index {
            channel.node_index = node_index;
        }
        if let Some(fb_offset) = set.fb_offset {
            channel.fb_offset = fb_offset;
        }
        if let Some(num_pixels) = set.num_pixels {
            channel.num_pixels = num_pixels;
        }
        match self.registry.update_channel(channel) {
            Ok(()) => Reply::ok(),
            Err(e) => Reply::failed_for(StatusCode::InvalidChannel, e.to_string(), id),
        }
    }
}

/// Instantiate the renderable a routine names.
///
/// The effect scripting host is out of scope here; `code` selects one of
/// the built-in effects, parameterised by the routine defaults overlaid
/// with the per-mapping params. The plan resizes the renderable to its
/// target when the mapping is added.
fn build_renderable(
    code: &str,
    defaults: &BTreeMap<String, f64>,
    overrides: &BTreeMap<String, f64>,
) -> StrandResult<SharedRenderable> {
    let param = |key: &str, fallback: f64| -> f64 {
        overrides
            .get(key)
            .or_else(|| defaults.get(key))
            .copied()
            .unwrap_or(fallback)
    };

    match code {
        "fill" => {
            let color = HsiPixel::clamped(
                param("hue", 0.0),
                param("saturation", 1.0),
                param("intensity", 1.0),
            );
            Ok(shared(FillRenderable::new(0, color)))
        }
        "sweep" => Ok(shared(SweepRenderable::new(
            0,
            param("degrees_per_frame", 1.0),
        ))),
        other => Err(StrandError::invalid_arg(format!(
            "unknown routine code '{other}'"
        ))),
    }
}

fn pipeline_error_reply(err: StrandError) -> Reply {
    let code = match &err {
        StrandError::UnresolvableConflict(_) => StatusCode::Conflict,
        StrandError::NotRunning => StatusCode::NotRunning,
        StrandError::InvalidArg(_) => StatusCode::InvalidRequest,
        StrandError::NotFound(_) => StatusCode::InvalidGroup,
        _ => StatusCode::Internal,
    };
    Reply::failed(code, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::model::Routine;

    fn fixture() -> (Arc<Registry>, Arc<Pipeline>, Endpoint) {
        let mut cfg = Config::default();
        cfg.render.fps = 200.0;
        cfg.render.threads = 1;
        cfg.render.framebuffer_pixels = 32;

        let registry = Arc::new(Registry::new());
        let pipeline = Pipeline::launch(&cfg).unwrap();
        let endpoint = Endpoint::new(Arc::clone(&registry), Arc::clone(&pipeline), false);
        (registry, pipeline, endpoint)
    }

    fn seed_group(registry: &Registry, start: usize, end: usize) -> u32 {
        registry
            .add_group(Group {
                id: GroupId(0),
                name: "strip".into(),
                enabled: true,
                start,
                end,
                brightness: 1.0,
                mirrored: false,
            })
            .unwrap()
            .0
    }

    fn seed_fill_routine(registry: &Registry) -> u32 {
        registry.add_routine(Routine {
            id: 0,
            name: "solid red".into(),
            code: "fill".into(),
            default_params: BTreeMap::new(),
        })
    }

    #[test]
    fn add_mapping_installs_a_plan_entry() {
        let (registry, pipeline, endpoint) = fixture();
        let g = seed_group(&registry, 0, 3);
        let r = seed_fill_routine(&registry);

        let reply = endpoint.handle(Request::AddMapping {
            routine_id: r,
            group_ids: vec![g],
            params: BTreeMap::new(),
        });
        assert!(reply.is_ok(), "reply: {reply:?}");
        assert!(pipeline.dump().contains("plan: 1 entries"));
        pipeline.shutdown();
    }

    #[test]
    fn add_mapping_rejects_unknown_ids() {
        let (registry, pipeline, endpoint) = fixture();
        let g = seed_group(&registry, 0, 3);

        let reply = endpoint.handle(Request::AddMapping {
            routine_id: 99,
            group_ids: vec![g],
            params: BTreeMap::new(),
        });
        assert_eq!(reply.status, StatusCode::InvalidRoutine as i32);
        assert_eq!(reply.id, Some(99));

        let r = seed_fill_routine(&registry);
        let reply = endpoint.handle(Request::AddMapping {
            routine_id: r,
            group_ids: vec![g, 1234],
            params: BTreeMap::new(),
        });
        assert_eq!(reply.status, StatusCode::InvalidGroup as i32);
        assert_eq!(reply.id, Some(1234));
        pipeline.shutdown();
    }

    #[test]
    fn remove_mapping_clears_the_plan() {
        let (registry, pipeline, endpoint) = fixture();
        let a = seed_group(&registry, 0, 3);
        let b = seed_group(&registry, 4, 7);
        let r = seed_fill_routine(&registry);

        assert!(
            endpoint
                .handle(Request::AddMapping {
                    routine_id: r,
                    group_ids: vec![a, b],
                    params: BTreeMap::new(),
                })
                .is_ok()
        );
        assert!(
            endpoint
                .handle(Request::RemoveMapping {
                    group_ids: vec![a, b],
                })
                .is_ok()
        );
        assert!(pipeline.dump().contains("plan: 0 entries"));
        pipeline.shutdown();
    }

    #[test]
    fn brightness_round_trips_through_store_and_plan() {
        let (registry, pipeline, endpoint) = fixture();
        let g = seed_group(&registry, 0, 3);
        let r = seed_fill_routine(&registry);
        endpoint.handle(Request::AddMapping {
            routine_id: r,
            group_ids: vec![g],
            params: BTreeMap::new(),
        });

        let reply = endpoint.handle(Request::SetBrightness {
            group_id: g,
            brightness: 0.25,
        });
        assert!(reply.is_ok());

        let reply = endpoint.handle(Request::GetBrightness { group_id: g });
        assert_eq!(reply.brightness, Some(0.25));

        let reply = endpoint.handle(Request::SetBrightness {
            group_id: g,
            brightness: 1.5,
        });
        assert_eq!(reply.status, StatusCode::InvalidRequest as i32);
        pipeline.shutdown();
    }

    #[test]
    fn unknown_routine_code_is_rejected() {
        let (registry, pipeline, endpoint) = fixture();
        let g = seed_group(&registry, 0, 3);
        let r = registry.add_routine(Routine {
            id: 0,
            name: "mystery".into(),
            code: "wavetable".into(),
            default_params: BTreeMap::new(),
        });

        let reply = endpoint.handle(Request::AddMapping {
            routine_id: r,
            group_ids: vec![g],
            params: BTreeMap::new(),
        });
        assert_eq!(reply.status, StatusCode::InvalidRoutine as i32);
        pipeline.shutdown();
    }

    #[test]
    fn json_requests_echo_txn() {
        let (registry, pipeline, endpoint) = fixture();
        let _ = registry;

        let raw = r#"{"type": "status", "txn": "abc-1"}"#;
        let reply: Reply = serde_json::from_str(&endpoint.handle_json(raw)).unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.txn, Some(serde_json::json!("abc-1")));
        assert!(reply.server.is_some());

        let reply: Reply =
            serde_json::from_str(&endpoint.handle_json("this is not json")).unwrap();
        assert_eq!(reply.status, StatusCode::InvalidRequest as i32);
        pipeline.shutdown();
    }

    #[test]
    fn update_group_applies_partial_patch() {
        let (registry, pipeline, endpoint) = fixture();
        let g = seed_group(&registry, 0, 3);

        let reply = endpoint.handle(Request::UpdateGroup {
            id: g,
            set: GroupPatch {
                name: Some("window".into()),
                end: Some(7),
                ..GroupPatch::default()
            },
        });
        assert!(reply.is_ok());

        let group = registry.group(GroupId(g)).unwrap();
        assert_eq!(group.name, "window");
        assert_eq!(group.end, 7);
        assert_eq!(group.start, 0, "untouched fields survive");
        pipeline.shutdown();
    }
}
