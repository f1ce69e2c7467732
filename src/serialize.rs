//! Serialization and Persistence
//!
//! Projects are saved as a single JSON object `{title, nodes}` in `.ncft`
//! files. Saving strips every node property outside the common set and the
//! schema's declared state; loading first repairs legacy payloads
//! (`normalize`), then validates, then hands back the typed project. A
//! parse failure reports without touching the saved payload.

use crate::error::ParseError;
use crate::model::Project;
use crate::schema::{NodeKind, ParamDefault};
use serde_json::{json, Map, Value};

/// Project file extension.
pub const FILE_EXT: &str = "ncft";

/// Encode a project for saving.
///
/// The copy is stripped down to `{type, name, x, y, ins, inNames,
/// outNames, params}` plus each kind's declared state; transient fields
/// (scope capture buffers) never reach disk.
pub fn serialize(project: &Project) -> Result<String, serde_json::Error> {
    let mut copy = project.clone();
    strip_nodes(&mut copy);
    serde_json::to_string(&copy)
}

/// Decode a `.ncft` payload: parse, normalize legacy fields, validate.
pub fn deserialize(payload: &str) -> Result<Project, ParseError> {
    let mut value: Value = serde_json::from_str(payload)?;
    normalize(&mut value);
    let project: Project = serde_json::from_value(value)?;
    crate::validate::validate(&project).map_err(|issues| ParseError::Invalid { issues })?;
    Ok(project)
}

fn strip_nodes(project: &mut Project) {
    fn strip(nodes: &mut std::collections::BTreeMap<crate::model::NodeId, crate::model::Node>) {
        for node in nodes.values_mut() {
            let state = node.kind.schema().state;
            if !state.contains(&"patterns") {
                node.patterns = None;
            }
            if !state.contains(&"curPattern") {
                node.cur_pattern = None;
            }
            if !state.contains(&"scaleRoot") {
                node.scale_root = None;
            }
            if !state.contains(&"scaleName") {
                node.scale_name = None;
            }
            if !state.contains(&"numOctaves") {
                node.num_octaves = None;
            }
            if !state.contains(&"numRows") {
                node.num_rows = None;
            }
            node.samples = None;
            if node.kind != NodeKind::Module {
                node.sub_nodes = None;
                node.in_map = None;
                node.out_map = None;
            } else if let Some(sub) = &mut node.sub_nodes {
                strip(sub);
            }
        }
    }
    strip(&mut project.nodes);
}

/// Repair payloads written by older versions in place:
/// field renames, inverted ranges, and missing inputs, port names, and
/// parameters backfilled from the schema.
pub fn normalize(value: &mut Value) {
    let Some(root) = value.as_object_mut() else {
        return;
    };
    root.entry("title").or_insert_with(|| json!("New Project"));
    if let Some(nodes) = root.get_mut("nodes").and_then(Value::as_object_mut) {
        normalize_nodes(nodes);
    }
}

fn normalize_nodes(nodes: &mut Map<String, Value>) {
    for node in nodes.values_mut() {
        let Some(obj) = node.as_object_mut() else {
            continue;
        };
        rename_field(obj, "numOcts", "numOctaves");

        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .and_then(NodeKind::from_name);

        if let Some(params) = obj.get_mut("params").and_then(Value::as_object_mut) {
            rename_field(params, "controlNo", "controlId");
            swap_inverted_range(params);
            if let Some(kind) = kind {
                backfill_params(params, kind);
            }
        } else if let Some(kind) = kind {
            let mut params = Map::new();
            backfill_params(&mut params, kind);
            obj.insert("params".to_string(), Value::Object(params));
        }

        if let Some(kind) = kind {
            backfill_ports(obj, kind);
        }

        // Module interiors get the same treatment.
        if let Some(sub) = obj.get_mut("nodes").and_then(Value::as_object_mut) {
            normalize_nodes(sub);
        }
    }
}

fn rename_field(obj: &mut Map<String, Value>, old: &str, new: &str) {
    if let Some(value) = obj.remove(old) {
        obj.entry(new).or_insert(value);
    }
}

fn swap_inverted_range(params: &mut Map<String, Value>) {
    let min = params.get("minVal").and_then(Value::as_f64);
    let max = params.get("maxVal").and_then(Value::as_f64);
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            params.insert("minVal".to_string(), json!(max));
            params.insert("maxVal".to_string(), json!(min));
        }
    }
}

fn backfill_params(params: &mut Map<String, Value>, kind: NodeKind) {
    for def in kind.schema().params {
        params
            .entry(def.name)
            .or_insert_with(|| match def.default {
                ParamDefault::Num(n) => json!(n),
                ParamDefault::Str(s) => json!(s),
                ParamDefault::Null => Value::Null,
            });
    }
}

fn backfill_ports(obj: &mut Map<String, Value>, kind: NodeKind) {
    let schema = kind.schema();
    // Modules carry their own arity in the port maps.
    if kind == NodeKind::Module {
        return;
    }

    if let Some(ins) = obj.entry("ins").or_insert_with(|| json!([])).as_array_mut() {
        while ins.len() < schema.ins.len() {
            ins.push(Value::Null);
        }
        ins.truncate(schema.ins.len());
    }

    if let Some(in_names) = obj
        .entry("inNames")
        .or_insert_with(|| json!([]))
        .as_array_mut()
    {
        for i in in_names.len()..schema.ins.len() {
            in_names.push(json!(schema.ins[i].name));
        }
        in_names.truncate(schema.ins.len());
    }

    // Derived output arity: GateSeq rows, otherwise the schema list.
    let out_count = if kind == NodeKind::GateSeq {
        obj.get("numRows").and_then(Value::as_u64).unwrap_or(4) as usize
    } else {
        schema.outs.len()
    };
    if let Some(out_names) = obj
        .entry("outNames")
        .or_insert_with(|| json!([]))
        .as_array_mut()
    {
        for i in out_names.len()..out_count {
            let name = if kind == NodeKind::GateSeq {
                format!("gate{i}")
            } else {
                schema.outs[i].to_string()
            };
            out_names.push(json!(name));
        }
        out_names.truncate(out_count);
    }

    obj.entry("name").or_insert_with(|| json!(schema.name));
    obj.entry("x").or_insert(json!(0));
    obj.entry("y").or_insert(json!(0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeId, ParamValue, PortRef};

    fn demo_project() -> Project {
        let mut project = Project::new();
        project.title = "Demo".to_string();
        let sine = project.next_id();
        project
            .nodes
            .insert(sine, Project::seed_node(NodeKind::Sine, 30, 40));
        let out = project.next_id();
        let mut out_node = Project::seed_node(NodeKind::AudioOut, 200, 40);
        out_node.ins[0] = Some(PortRef(sine, 0));
        out_node.ins[1] = Some(PortRef(sine, 0));
        project.nodes.insert(out, out_node);
        project
    }

    #[test]
    fn test_round_trip() {
        let project = demo_project();
        let payload = serialize(&project).unwrap();
        let loaded = deserialize(&payload).unwrap();
        assert_eq!(loaded, project);
    }

    #[test]
    fn test_round_trip_with_sequencer_state() {
        let mut project = demo_project();
        let seq = project.next_id();
        let mut node = Project::seed_node(NodeKind::MonoSeq, 0, 0);
        node.patterns.as_mut().unwrap()[0].set(3, 2, 1);
        project.nodes.insert(seq, node);

        let loaded = deserialize(&serialize(&project).unwrap()).unwrap();
        assert_eq!(loaded, project);
        assert_eq!(
            loaded.nodes[&seq].patterns.as_ref().unwrap()[0].get(3, 2),
            Some(1)
        );
    }

    #[test]
    fn test_scope_samples_never_serialized() {
        let mut project = demo_project();
        let scope = project.next_id();
        let mut node = Project::seed_node(NodeKind::Scope, 0, 0);
        node.samples = Some(vec![0.5; 16]);
        project.nodes.insert(scope, node);

        let payload = serialize(&project).unwrap();
        assert!(!payload.contains("samples"));
        let loaded = deserialize(&payload).unwrap();
        assert!(loaded.nodes[&scope].samples.is_none());
    }

    #[test]
    fn test_ids_are_decimal_strings_on_the_wire() {
        let payload = serialize(&demo_project()).unwrap();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert!(value["nodes"].get("0").is_some());
        assert_eq!(value["nodes"]["1"]["ins"][0], json!(["0", 0]));
    }

    #[test]
    fn test_normalize_renames_num_octs() {
        // Build the legacy payload from a valid modern one so the pattern
        // grid keeps the right shape (major over 2 octaves = 15 rows).
        let mut project = Project::new();
        let seq = project.next_id();
        let mut node = Project::seed_node(NodeKind::MonoSeq, 0, 0);
        node.scale_name = Some("major".to_string());
        node.num_octaves = Some(2);
        node.patterns = Some(vec![crate::model::Grid::new(16, node.grid_rows())]);
        project.nodes.insert(seq, node);

        let mut value: Value = serde_json::from_str(&serialize(&project).unwrap()).unwrap();
        let obj = value["nodes"]["0"].as_object_mut().unwrap();
        let octs = obj.remove("numOctaves").unwrap();
        obj.insert("numOcts".to_string(), octs);

        let loaded = deserialize(&value.to_string()).unwrap();
        assert_eq!(loaded.nodes[&NodeId(0)].num_octaves, Some(2));
    }

    #[test]
    fn test_normalize_renames_control_no() {
        let payload = r#"{
            "title": "Legacy",
            "nodes": {
                "0": {
                    "type": "Knob",
                    "name": "Knob",
                    "x": 0, "y": 0,
                    "ins": [],
                    "inNames": [],
                    "outNames": ["out"],
                    "params": {"value": 0.5, "minVal": 0, "maxVal": 1, "controlNo": 7}
                }
            }
        }"#;
        let project = deserialize(payload).unwrap();
        assert_eq!(
            project.nodes[&NodeId(0)].params.get("controlId"),
            Some(&ParamValue::Num(7.0))
        );
        assert!(!project.nodes[&NodeId(0)].params.contains_key("controlNo"));
    }

    #[test]
    fn test_normalize_swaps_inverted_range() {
        let payload = r#"{
            "title": "Legacy",
            "nodes": {
                "0": {
                    "type": "Knob",
                    "name": "Knob",
                    "x": 0, "y": 0,
                    "ins": [],
                    "inNames": [],
                    "outNames": ["out"],
                    "params": {"value": 0.5, "minVal": 1, "maxVal": 0, "controlId": null}
                }
            }
        }"#;
        let project = deserialize(payload).unwrap();
        let node = &project.nodes[&NodeId(0)];
        assert_eq!(node.param_num("minVal"), Some(0.0));
        assert_eq!(node.param_num("maxVal"), Some(1.0));
    }

    #[test]
    fn test_normalize_backfills_missing_fields() {
        // An older Sine without the sync input or oscillator range params.
        let payload = r#"{
            "title": "Legacy",
            "nodes": {
                "0": {
                    "type": "Sine",
                    "ins": [null],
                    "inNames": ["freq"],
                    "outNames": ["out"],
                    "params": {}
                }
            }
        }"#;
        let project = deserialize(payload).unwrap();
        let node = &project.nodes[&NodeId(0)];
        assert_eq!(node.ins.len(), 2);
        assert_eq!(node.in_names, vec!["freq", "sync"]);
        assert_eq!(node.param_num("minVal"), Some(-1.0));
        assert_eq!(node.param_num("maxVal"), Some(1.0));
    }

    #[test]
    fn test_parse_error_reported() {
        assert!(matches!(deserialize("{not json"), Err(ParseError::Json(_))));
    }

    #[test]
    fn test_invalid_project_rejected() {
        // Two AudioOut nodes violate uniqueness.
        let payload = r#"{
            "title": "Bad",
            "nodes": {
                "0": {"type": "AudioOut", "name": "AudioOut", "x": 0, "y": 0,
                      "ins": [null, null], "inNames": ["left", "right"],
                      "outNames": [], "params": {}},
                "1": {"type": "AudioOut", "name": "AudioOut", "x": 0, "y": 0,
                      "ins": [null, null], "inNames": ["left", "right"],
                      "outNames": [], "params": {}}
            }
        }"#;
        assert!(matches!(
            deserialize(payload),
            Err(ParseError::Invalid { .. })
        ));
    }

    #[test]
    fn test_non_decimal_id_rejected() {
        let payload = r#"{"title": "Bad", "nodes": {"x1": {"type": "Nop",
            "name": "Nop", "x": 0, "y": 0, "ins": [null], "inNames": ["in"],
            "outNames": ["out"], "params": {}}}}"#;
        assert!(deserialize(payload).is_err());
    }
}
