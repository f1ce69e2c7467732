//! Property-based tests for the editing model and persistence layer.
//!
//! Projects are generated by driving the model through random action
//! sequences, so every tested project is one a user could actually reach.
//! Rejected actions are part of the point: the model must refuse them
//! without corrupting state.

use nodecraft::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Kinds the generator draws from; a mix of pure, stateful, cycle-breaking,
/// sequencer, and unique nodes.
const KINDS: [NodeKind; 18] = [
    NodeKind::Sine,
    NodeKind::Saw,
    NodeKind::Add,
    NodeKind::Mul,
    NodeKind::Div,
    NodeKind::Filter,
    NodeKind::Delay,
    NodeKind::Hold,
    NodeKind::Knob,
    NodeKind::Const,
    NodeKind::MonoSeq,
    NodeKind::GateSeq,
    NodeKind::AudioOut,
    NodeKind::Noise,
    NodeKind::Adsr,
    NodeKind::Scope,
    NodeKind::Clock,
    NodeKind::Notes,
];

#[derive(Debug, Clone)]
enum EditStep {
    Create { kind: usize, x: i32, y: i32 },
    Connect {
        src: usize,
        src_port: usize,
        dst: usize,
        dst_port: usize,
    },
    Disconnect { dst: usize, dst_port: usize },
    SetValue { node: usize, value: f64 },
    Toggle {
        node: usize,
        step: usize,
        row: usize,
    },
    Move { node: usize, dx: i32, dy: i32 },
    Delete { node: usize },
    Rename { node: usize, name: String },
}

fn arb_step() -> impl Strategy<Value = EditStep> {
    prop_oneof![
        (0..KINDS.len(), -500..500i32, -500..500i32)
            .prop_map(|(kind, x, y)| EditStep::Create { kind, x, y }),
        (0..16usize, 0..4usize, 0..16usize, 0..5usize).prop_map(
            |(src, src_port, dst, dst_port)| EditStep::Connect {
                src,
                src_port,
                dst,
                dst_port,
            }
        ),
        (0..16usize, 0..5usize)
            .prop_map(|(dst, dst_port)| EditStep::Disconnect { dst, dst_port }),
        (0..16usize, -2.0..2.0f64).prop_map(|(node, value)| EditStep::SetValue { node, value }),
        (0..16usize, 0..16usize, 0..8usize)
            .prop_map(|(node, step, row)| EditStep::Toggle { node, step, row }),
        (0..16usize, -50..50i32, -50..50i32)
            .prop_map(|(node, dx, dy)| EditStep::Move { node, dx, dy }),
        (0..16usize).prop_map(|node| EditStep::Delete { node }),
        (0..16usize, "[a-z]{1,12}").prop_map(|(node, name)| EditStep::Rename { node, name }),
    ]
}

fn arb_steps() -> impl Strategy<Value = Vec<EditStep>> {
    prop::collection::vec(arb_step(), 0..48)
}

/// Drive a model through the steps, skipping steps that reference nodes
/// that were never created and ignoring rejections.
fn build(steps: &[EditStep]) -> Model {
    let mut model = Model::new();
    let mut ids: Vec<NodeId> = Vec::new();

    for step in steps {
        match step {
            EditStep::Create { kind, x, y } => {
                if let Ok(Some(ActionOutput::Created(id))) = model.update(Action::CreateNode {
                    kind: KINDS[*kind],
                    x: *x,
                    y: *y,
                }) {
                    ids.push(id);
                }
            }
            EditStep::Connect {
                src,
                src_port,
                dst,
                dst_port,
            } => {
                if ids.is_empty() {
                    continue;
                }
                let _ = model.update(Action::ConnectNodes {
                    src: ids[src % ids.len()],
                    src_port: *src_port,
                    dst: ids[dst % ids.len()],
                    dst_port: *dst_port,
                });
            }
            EditStep::Disconnect { dst, dst_port } => {
                if ids.is_empty() {
                    continue;
                }
                let _ = model.update(Action::Disconnect {
                    dst: ids[dst % ids.len()],
                    dst_port: *dst_port,
                });
            }
            EditStep::SetValue { node, value } => {
                if ids.is_empty() {
                    continue;
                }
                let _ = model.update(Action::SetParam {
                    id: ids[node % ids.len()],
                    name: "value".to_string(),
                    value: ParamValue::Num(*value),
                });
            }
            EditStep::Toggle { node, step, row } => {
                if ids.is_empty() {
                    continue;
                }
                let _ = model.update(Action::ToggleCell {
                    id: ids[node % ids.len()],
                    pattern: 0,
                    step: *step,
                    row: *row,
                });
            }
            EditStep::Move { node, dx, dy } => {
                if ids.is_empty() {
                    continue;
                }
                let _ = model.update(Action::MoveNodes {
                    ids: vec![ids[node % ids.len()]],
                    dx: *dx,
                    dy: *dy,
                });
            }
            EditStep::Delete { node } => {
                if ids.is_empty() {
                    continue;
                }
                let id = ids[node % ids.len()];
                if model.update(Action::DeleteNodes { ids: vec![id] }).is_ok() {
                    ids.retain(|&i| i != id);
                }
            }
            EditStep::Rename { node, name } => {
                if ids.is_empty() {
                    continue;
                }
                let _ = model.update(Action::SetNodeName {
                    id: ids[node % ids.len()],
                    name: name.clone(),
                });
            }
        }
    }
    model
}

/// Expected plan length: the split doubles delays and holds, notes vanish.
fn expected_plan_len(project: &Project) -> usize {
    project
        .nodes
        .values()
        .map(|node| match node.kind {
            NodeKind::Delay | NodeKind::Hold => 2,
            NodeKind::Notes => 0,
            _ => 1,
        })
        .sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// P1: serialize then deserialize reproduces any reachable project.
    #[test]
    fn serialization_round_trips(steps in arb_steps()) {
        let model = build(&steps);
        let payload = serialize(model.project()).unwrap();
        let loaded = deserialize(&payload).unwrap();
        prop_assert_eq!(&loaded, model.project());
    }

    /// P2: undo restores the exact pre-action state for any undoable action
    /// the model accepts.
    #[test]
    fn undo_inverts_any_action(steps in arb_steps(), extra in arb_step()) {
        let mut model = build(&steps);
        let before = model.project().clone();
        let undo_before = model.undo_len();

        let mut tail = build_tail(&mut model, &extra);
        // Only actions that were actually applied get undone.
        if tail {
            prop_assert!(model.undo_len() >= undo_before);
            tail = model.undo();
            prop_assert!(tail);
            prop_assert_eq!(model.project(), &before);
        }
    }

    /// P3: validation accepts every project reachable through actions.
    #[test]
    fn validate_accepts_reachable_projects(steps in arb_steps()) {
        let model = build(&steps);
        let result = validate(model.project());
        prop_assert!(result.is_ok(), "issues: {:?}", result.err());
    }

    /// P4/P5: reachable graphs always compile, and the plan has exactly one
    /// step per node after the cycle-breaker split.
    #[test]
    fn reachable_graphs_compile(steps in arb_steps()) {
        let model = build(&steps);
        let unit = compile(model.project()).unwrap();
        prop_assert_eq!(unit.plan.len(), expected_plan_len(model.project()));
    }

    /// P6: pasted nodes never reference ids outside the paste.
    #[test]
    fn paste_is_closed_under_ids(steps in arb_steps(), picks in prop::collection::vec(0..16usize, 1..6), x in -200..200i32, y in -200..200i32) {
        let mut model = build(&steps);
        let all_ids: Vec<NodeId> = model.project().nodes.keys().copied().collect();
        if all_ids.is_empty() {
            return Ok(());
        }

        let mut buffer = BTreeMap::new();
        for pick in picks {
            let id = all_ids[pick % all_ids.len()];
            buffer.insert(id, model.project().nodes[&id].clone());
        }

        let pasted = match model.update(Action::Paste { nodes: buffer, x, y }) {
            Ok(Some(ActionOutput::Pasted(ids))) => ids,
            other => panic!("paste failed: {other:?}"),
        };

        for id in &pasted {
            let node = &model.project().nodes[id];
            for edge in node.ins.iter().flatten() {
                prop_assert!(
                    pasted.contains(&edge.node()),
                    "pasted node {} references external id {}",
                    id,
                    edge.node()
                );
            }
        }
    }

    /// P7: after any toggle sequence a MonoSeq step holds at most one
    /// active cell.
    #[test]
    fn mono_seq_stays_monophonic(toggles in prop::collection::vec((0..32usize, 0..8usize), 0..64)) {
        let mut model = Model::new();
        let seq = match model.update(Action::CreateNode {
            kind: NodeKind::MonoSeq,
            x: 0,
            y: 0,
        }) {
            Ok(Some(ActionOutput::Created(id))) => id,
            _ => unreachable!(),
        };

        for (step, row) in toggles {
            let _ = model.update(Action::ToggleCell {
                id: seq,
                pattern: 0,
                step,
                row,
            });
        }

        let grid = &model.project().nodes[&seq].patterns.as_ref().unwrap()[0];
        for step in grid.steps_iter() {
            prop_assert!(step.iter().filter(|&&c| c != 0).count() <= 1);
        }
    }

    /// P8: repositioning is idempotent.
    #[test]
    fn reposition_is_idempotent(steps in arb_steps()) {
        let model = build(&steps);
        let mut once = model.project().clone();
        once.reposition();
        let mut twice = once.clone();
        twice.reposition();
        prop_assert_eq!(once, twice);
    }
}

/// Apply one step to an existing model, reporting whether an undoable
/// action was actually applied.
fn build_tail(model: &mut Model, step: &EditStep) -> bool {
    let ids: Vec<NodeId> = model.project().nodes.keys().copied().collect();
    match step {
        EditStep::Create { kind, x, y } => model
            .update(Action::CreateNode {
                kind: KINDS[*kind],
                x: *x,
                y: *y,
            })
            .is_ok(),
        EditStep::Connect {
            src,
            src_port,
            dst,
            dst_port,
        } => {
            !ids.is_empty()
                && model
                    .update(Action::ConnectNodes {
                        src: ids[src % ids.len()],
                        src_port: *src_port,
                        dst: ids[dst % ids.len()],
                        dst_port: *dst_port,
                    })
                    .is_ok()
        }
        EditStep::Disconnect { dst, dst_port } => {
            !ids.is_empty()
                && model
                    .update(Action::Disconnect {
                        dst: ids[dst % ids.len()],
                        dst_port: *dst_port,
                    })
                    .is_ok()
        }
        EditStep::SetValue { node, value } => {
            !ids.is_empty()
                && model
                    .update(Action::SetParam {
                        id: ids[node % ids.len()],
                        name: "value".to_string(),
                        value: ParamValue::Num(*value),
                    })
                    .is_ok()
        }
        EditStep::Toggle { node, step, row } => {
            !ids.is_empty()
                && model
                    .update(Action::ToggleCell {
                        id: ids[node % ids.len()],
                        pattern: 0,
                        step: *step,
                        row: *row,
                    })
                    .is_ok()
        }
        EditStep::Move { node, dx, dy } => {
            !ids.is_empty()
                && model
                    .update(Action::MoveNodes {
                        ids: vec![ids[node % ids.len()]],
                        dx: *dx,
                        dy: *dy,
                    })
                    .is_ok()
        }
        EditStep::Delete { node } => {
            !ids.is_empty()
                && model
                    .update(Action::DeleteNodes {
                        ids: vec![ids[node % ids.len()]],
                    })
                    .is_ok()
        }
        EditStep::Rename { node, name } => {
            !ids.is_empty()
                && model
                    .update(Action::SetNodeName {
                        id: ids[node % ids.len()],
                        name: name.clone(),
                    })
                    .is_ok()
        }
    }
}
