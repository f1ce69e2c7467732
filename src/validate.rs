//! Project Validation
//!
//! A total, pure check over a project: structural invariants (edge
//! targets, unique kinds, port arities, acyclicity modulo delay/hold),
//! value rules (name and title lengths, parameter types and ranges), and
//! sequencer grid shape. Accepts exactly the projects reachable through
//! the action set; every problem is reported with a path to the offending
//! field rather than stopping at the first.

use crate::compiler;
use crate::model::{Grid, Node, NodeId, ParamValue, Project, MAX_NAME_LEN, MAX_TITLE_LEN};
use crate::music;
use crate::schema::NodeKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A validation problem with the path to the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateIssue {
    pub path: String,
    pub message: String,
}

impl ValidateIssue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidateIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate a project. Never mutates; returns every issue found.
pub fn validate(project: &Project) -> Result<(), Vec<ValidateIssue>> {
    let mut issues = Vec::new();

    if project.title.chars().count() > MAX_TITLE_LEN {
        issues.push(ValidateIssue::new(
            "title",
            format!("title longer than {MAX_TITLE_LEN} characters"),
        ));
    }

    // Unique kinds are unique across the whole project, module interiors
    // included.
    let mut unique_counts: BTreeMap<NodeKind, usize> = BTreeMap::new();
    count_unique(&project.nodes, &mut unique_counts);
    for (kind, count) in unique_counts {
        if count > 1 {
            issues.push(ValidateIssue::new(
                "nodes",
                format!("{} {} nodes, at most one allowed", count, kind.name()),
            ));
        }
    }

    validate_scope("nodes", &project.nodes, &mut issues);

    if let Err(err) = compiler::check_acyclic(project) {
        issues.push(ValidateIssue::new("nodes", err.to_string()));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

fn count_unique(nodes: &BTreeMap<NodeId, Node>, counts: &mut BTreeMap<NodeKind, usize>) {
    for node in nodes.values() {
        if node.kind.schema().unique {
            *counts.entry(node.kind).or_insert(0) += 1;
        }
        if let Some(sub) = &node.sub_nodes {
            count_unique(sub, counts);
        }
    }
}

fn validate_scope(path: &str, nodes: &BTreeMap<NodeId, Node>, issues: &mut Vec<ValidateIssue>) {
    for (&id, node) in nodes {
        validate_node(&format!("{path}[{id}]"), node, nodes, issues);
        if let Some(sub) = &node.sub_nodes {
            validate_scope(&format!("{path}[{id}].nodes"), sub, issues);
        }
    }
}

fn validate_node(
    path: &str,
    node: &Node,
    scope: &BTreeMap<NodeId, Node>,
    issues: &mut Vec<ValidateIssue>,
) {
    let schema = node.kind.schema();

    if schema.internal {
        issues.push(ValidateIssue::new(
            path,
            format!("internal kind {} cannot appear in a project", schema.name),
        ));
    }

    let name_len = node.name.chars().count();
    if name_len == 0 || name_len > MAX_NAME_LEN {
        issues.push(ValidateIssue::new(
            format!("{path}.name"),
            format!("name must be 1 to {MAX_NAME_LEN} characters"),
        ));
    }

    // Port arities (I3); module arity comes from its port maps.
    let expected_ins = match node.kind {
        NodeKind::Module => node.in_map.as_ref().map_or(0, Vec::len),
        _ => schema.ins.len(),
    };
    if node.ins.len() != expected_ins {
        issues.push(ValidateIssue::new(
            format!("{path}.ins"),
            format!("expected {} inputs, found {}", expected_ins, node.ins.len()),
        ));
    }
    if node.in_names.len() != node.ins.len() {
        issues.push(ValidateIssue::new(
            format!("{path}.inNames"),
            "one name per input required",
        ));
    }
    let expected_outs = match node.kind {
        NodeKind::Module => node.out_map.as_ref().map_or(0, Vec::len),
        NodeKind::GateSeq => node.num_rows.unwrap_or(0),
        _ => schema.outs.len(),
    };
    if node.out_names.len() != expected_outs {
        issues.push(ValidateIssue::new(
            format!("{path}.outNames"),
            format!(
                "expected {} outputs, found {}",
                expected_outs,
                node.out_names.len()
            ),
        ));
    }

    // Edge targets exist and the referenced output port does too (I1).
    for (port, input) in node.ins.iter().enumerate() {
        if let Some(edge) = input {
            match scope.get(&edge.node()) {
                None => issues.push(ValidateIssue::new(
                    format!("{path}.ins[{port}]"),
                    format!("references missing node {}", edge.node()),
                )),
                Some(src) => {
                    if edge.port() >= src.out_arity() {
                        issues.push(ValidateIssue::new(
                            format!("{path}.ins[{port}]"),
                            format!(
                                "references output {} of node {} which has {}",
                                edge.port(),
                                edge.node(),
                                src.out_arity()
                            ),
                        ));
                    }
                }
            }
        }
    }

    validate_params(path, node, issues);
    validate_grids(path, node, issues);

    if node.kind == NodeKind::Module {
        validate_module_maps(path, node, issues);
    }
}

fn validate_params(path: &str, node: &Node, issues: &mut Vec<ValidateIssue>) {
    let schema = node.kind.schema();

    for def in schema.params {
        match node.params.get(def.name) {
            None => issues.push(ValidateIssue::new(
                format!("{path}.params.{}", def.name),
                "missing parameter",
            )),
            Some(value) => {
                if !value.matches_default(&def.default) {
                    issues.push(ValidateIssue::new(
                        format!("{path}.params.{}", def.name),
                        "wrong parameter type",
                    ));
                }
            }
        }
    }
    for name in node.params.keys() {
        if schema.param(name).is_none() {
            issues.push(ValidateIssue::new(
                format!("{path}.params.{name}"),
                "unknown parameter",
            ));
        }
    }

    // Value range invariant (I4).
    if let (Some(min), Some(value), Some(max)) = (
        node.param_num("minVal"),
        node.param_num("value"),
        node.param_num("maxVal"),
    ) {
        if value < min || value > max {
            issues.push(ValidateIssue::new(
                format!("{path}.params.value"),
                format!("{value} outside [{min}, {max}]"),
            ));
        }
    }

    if let Some(ParamValue::Num(factor)) = node.params.get("factor") {
        if *factor <= 0.0 {
            issues.push(ValidateIssue::new(
                format!("{path}.params.factor"),
                "factor must be greater than zero",
            ));
        }
    }

    if let Some(channel) = node.params.get("channel") {
        let ok = match channel {
            ParamValue::Null => true,
            ParamValue::Num(c) => (1.0..=16.0).contains(c) && c.fract() == 0.0,
            ParamValue::Str(_) => false,
        };
        if !ok {
            issues.push(ValidateIssue::new(
                format!("{path}.params.channel"),
                "channel must be 1 to 16 or null",
            ));
        }
    }
}

fn validate_grids(path: &str, node: &Node, issues: &mut Vec<ValidateIssue>) {
    if !node.is_sequencer() {
        return;
    }

    let expected_rows = match node.kind {
        NodeKind::MonoSeq => {
            let root = node.scale_root.as_deref().unwrap_or("");
            let scale = node.scale_name.as_deref().unwrap_or("");
            let octaves = node.num_octaves.unwrap_or(0);
            match music::scale_rows(root, scale, octaves) {
                Ok(rows) => rows,
                Err(err) => {
                    issues.push(ValidateIssue::new(
                        format!("{path}.scaleName"),
                        err.to_string(),
                    ));
                    return;
                }
            }
        }
        _ => node.num_rows.unwrap_or(0),
    };

    let Some(patterns) = &node.patterns else {
        issues.push(ValidateIssue::new(
            format!("{path}.patterns"),
            "sequencer without patterns",
        ));
        return;
    };
    if patterns.is_empty() {
        issues.push(ValidateIssue::new(
            format!("{path}.patterns"),
            "at least one pattern required",
        ));
    }

    match node.cur_pattern {
        Some(cur) if cur < patterns.len() => {}
        _ => issues.push(ValidateIssue::new(
            format!("{path}.curPattern"),
            "current pattern out of range",
        )),
    }

    for (i, grid) in patterns.iter().enumerate() {
        validate_grid(
            &format!("{path}.patterns[{i}]"),
            grid,
            expected_rows,
            node.kind == NodeKind::MonoSeq,
            issues,
        );
    }
}

fn validate_grid(
    path: &str,
    grid: &Grid,
    expected_rows: usize,
    monophonic: bool,
    issues: &mut Vec<ValidateIssue>,
) {
    let steps = grid.num_steps();
    if steps == 0 || steps % crate::model::PATTERN_STEP_BLOCK != 0 {
        issues.push(ValidateIssue::new(
            path,
            format!("step count {steps} is not a positive multiple of 16"),
        ));
    }

    for (step, row) in grid.steps_iter().enumerate() {
        if row.len() != expected_rows {
            issues.push(ValidateIssue::new(
                format!("{path}[{step}]"),
                format!("expected {} rows, found {}", expected_rows, row.len()),
            ));
        }
        if row.iter().any(|&c| c > 1) {
            issues.push(ValidateIssue::new(
                format!("{path}[{step}]"),
                "cells must be 0 or 1",
            ));
        }
        if monophonic && row.iter().filter(|&&c| c != 0).count() > 1 {
            issues.push(ValidateIssue::new(
                format!("{path}[{step}]"),
                "more than one active cell in a monophonic step",
            ));
        }
    }
}

fn validate_module_maps(path: &str, node: &Node, issues: &mut Vec<ValidateIssue>) {
    let sub = node.sub_nodes.as_ref();
    let in_map = node.in_map.as_deref().unwrap_or(&[]);
    let out_map = node.out_map.as_deref().unwrap_or(&[]);

    let Some(sub) = sub else {
        issues.push(ValidateIssue::new(
            format!("{path}.nodes"),
            "module without a sub-graph",
        ));
        return;
    };

    for (i, targets) in in_map.iter().enumerate() {
        for target in targets {
            match sub.get(&target.node()) {
                None => issues.push(ValidateIssue::new(
                    format!("{path}.inMap[{i}]"),
                    format!("references missing sub-node {}", target.node()),
                )),
                Some(inner) => {
                    if target.port() >= inner.in_arity() {
                        issues.push(ValidateIssue::new(
                            format!("{path}.inMap[{i}]"),
                            "references an input port out of range",
                        ));
                    }
                }
            }
        }
    }

    for (o, source) in out_map.iter().enumerate() {
        match sub.get(&source.node()) {
            None => issues.push(ValidateIssue::new(
                format!("{path}.outMap[{o}]"),
                format!("references missing sub-node {}", source.node()),
            )),
            Some(inner) => {
                if source.port() >= inner.out_arity() {
                    issues.push(ValidateIssue::new(
                        format!("{path}.outMap[{o}]"),
                        "references an output port out of range",
                    ));
                }
            }
        }
    }
}
