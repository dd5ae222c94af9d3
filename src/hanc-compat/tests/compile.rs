// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! End-to-end pipeline tests: HAML text through import, checking,
//! transformation, and C generation.

use hanc_compat::engine::codegen::{render, Language};
use hanc_compat::engine::common::ErrorCode;
use hanc_compat::engine::{transform, Project, TransformOptions};
use hanc_compat::haml::parse_haml;

const TRAIN_GATE: &str = r#"
name: TrainGate
definitions:
  Train:
    outputs:
      pos: REAL
    parameters:
      trainSpeed:
        type: REAL
        default: 5
    locations:
      moving:
        invariant: pos <= 25
        flow:
          pos: trainSpeed
        transitions:
          - to: moving
            guard: pos >= 25
            update:
              pos: 0
    initialisation:
      location: moving
      valuations:
        pos: 0
  Gate:
    inputs:
      trainPos: REAL
    outputs:
      closed:
        type: BOOLEAN
        default: false
    locations:
      watching:
        update:
          closed: trainPos >= 20 && trainPos <= 25
    initialisation:
      location: watching
instances:
  train:
    type: Train
    parameters:
      trainSpeed: 10
  gate:
    type: Gate
mappings:
  gate.trainPos: train.pos
codegenConfig:
  execution:
    stepSize: 0.001
    simulationTime: 100.0
"#;

const HEART: &str = r#"
name: heart
outputs:
  beat: REAL
definitions:
  Chamber:
    definitions:
      Cell:
        inputs:
          stimulus: REAL
        outputs:
          v:
            type: REAL
            default: 0
        parameters:
          gain:
            type: REAL
            default: 1
        locations:
          active:
            flow:
              v: gain * stimulus - v
        initialisation:
          location: active
    inputs:
      stim: REAL
    outputs:
      out: REAL
    instances:
      c1:
        type: Cell
      c2:
        type: Cell
        parameters:
          gain: 2
    mappings:
      c1.stimulus: stim
      c2.stimulus: c1.v
      out: c2.v
instances:
  left:
    type: Chamber
mappings:
  left.stim: "1"
  beat: left.out
codegenConfig:
  parametrisationMethod: RUN_TIME
"#;

fn checked_project(source: &str) -> Project {
    let network = parse_haml(source).unwrap();
    let project = Project::new(network);
    assert!(!project.has_errors(), "{:?}", project.all_errors());
    project
}

#[test]
fn train_gate_compiles_to_c() {
    let mut project = checked_project(TRAIN_GATE);
    transform(&mut project, &TransformOptions::default()).unwrap();
    let files = render(&project, Language::C).unwrap();

    // compile-time is the default: one pair per instance
    let header = files.get("train/train.h").unwrap();
    assert!(header.contains("#define TRAIN_TRAIN_TRAIN_SPEED 10.0"));

    let runnable = files.get("runnable.c").unwrap();
    assert!(runnable.contains("time,train.pos,gate.closed"));
    assert!(files.get("Makefile").is_some());
    assert!(files.get("config.h").unwrap().contains("SIMULATION_TIME 100.0"));
}

#[test]
fn heart_flattens_to_one_file_per_definition() {
    let mut project = checked_project(HEART);
    transform(
        &mut project,
        &TransformOptions { flatten: true },
    )
    .unwrap();
    let files = render(&project, Language::C).unwrap();

    // a single definition survives flattening, so run-time
    // parametrisation gives exactly one source pair for it
    let paths: Vec<String> = files
        .paths()
        .map(|p| p.display().to_string())
        .collect();
    assert!(
        paths.contains(&"chamber_cell/chamber_cell.h".to_string()),
        "generated {:?}",
        paths
    );
    assert_eq!(
        1,
        paths.iter().filter(|p| p.ends_with(".h") && p.contains('/')).count(),
        "one header per definition, got {:?}",
        paths
    );

    // lifted instances appear in the glue with dotted names folded
    let glue = files.get("heart.c").unwrap();
    assert!(glue.contains("me->left_c1"));
    assert!(glue.contains("me->left_c2"));
    // per-instance parameter values survive the lift
    assert!(glue.contains("me->left_c1.gain = 1.0;"));
    assert!(glue.contains("me->left_c2.gain = 2.0;"));

    // the network output is wired through the composed mapping
    assert!(glue.contains("me->beat = me->left_c2.v;"));
}

#[test]
fn delay_produces_ring_buffer() {
    let source = r#"
name: delayed
definitions:
  Cell:
    outputs:
      v:
        type: REAL
        default: 0
        delayableBy: 0.005
    locations:
      active:
        flow:
          v: "1"
    initialisation:
      location: active
instances:
  cell:
    type: Cell
codegenConfig:
  execution:
    stepSize: 0.001
  parametrisationMethod: RUN_TIME
"#;
    let mut project = checked_project(source);
    transform(&mut project, &TransformOptions::default()).unwrap();
    let files = render(&project, Language::C).unwrap();

    let header = files.get("cell/cell.h").unwrap();
    assert!(header.contains("double v_buf[6];"));
    assert!(header.contains("unsigned int v_idx;"));

    // writes advance the head; delayed readers index one past it
    let body = files.get("cell/cell.c").unwrap();
    assert!(body.contains("me->v_idx = (me->v_idx + 1u) % 6u;"));
}

#[test]
fn unresolved_mapping_is_reported_and_blocks_generation() {
    let source = r#"
name: broken
definitions:
  Gate:
    inputs:
      trigger: BOOLEAN
    outputs:
      pos: REAL
    locations:
      open:
        update:
          pos: "1"
    initialisation:
      location: open
instances:
  gate:
    type: Gate
mappings:
  gate.nonexistent: "true"
"#;
    let network = parse_haml(source).unwrap();
    let project = Project::new(network);
    assert!(project.has_errors());
    let errors = project.all_errors();
    assert_eq!(1, errors.len());
    assert_eq!(ErrorCode::UnresolvedMapping, errors[0].code);
    assert!(errors[0]
        .get_details()
        .as_ref()
        .unwrap()
        .contains("gate.nonexistent"));
}

#[test]
fn generation_is_deterministic_end_to_end() {
    let mut project = checked_project(HEART);
    transform(&mut project, &TransformOptions { flatten: true }).unwrap();
    let first = render(&project, Language::C).unwrap();
    let second = render(&project, Language::C).unwrap();
    assert_eq!(first, second);
}
