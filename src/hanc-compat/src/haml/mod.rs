// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! HAML importer: typed serde structs mirror the document schema,
//! then convert into the engine's raw IR.
//!
//! `!include <path>` tags are spliced textually before YAML parsing.
//! The spliced text is re-indented to the tag's column so a mapping
//! or list fragment lands as a correctly nested block.  Relative
//! paths resolve against the file containing the tag; cycles are
//! detected and reported with their participants.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::engine::common::{Error, ErrorCode, ErrorKind, Result};
use crate::engine::datamodel;

const INCLUDE_TAG: &str = "!include";

fn import_error(code: ErrorCode, details: String) -> Error {
    Error::new(ErrorKind::Import, code, Some(details))
}

/// Read a file, retrying once on a transient failure.
fn read_file(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(_) => fs::read_to_string(path).map_err(|err| {
            import_error(ErrorCode::Io, format!("{}: {}", path.display(), err))
        }),
    }
}

fn splice_includes(path: &Path, stack: &mut Vec<PathBuf>) -> Result<String> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if stack.contains(&canonical) {
        let mut participants: Vec<String> =
            stack.iter().map(|p| p.display().to_string()).collect();
        participants.push(canonical.display().to_string());
        return Err(import_error(
            ErrorCode::IncludeCycle,
            participants.join(" -> "),
        ));
    }
    stack.push(canonical);

    let text = read_file(path)?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut out = String::new();
    for line in text.lines() {
        let idx = match line.find(INCLUDE_TAG) {
            Some(idx) => idx,
            None => {
                out.push_str(line);
                out.push('\n');
                continue;
            }
        };

        let target = line[idx + INCLUDE_TAG.len()..].trim();
        if target.is_empty() {
            return Err(import_error(
                ErrorCode::Io,
                format!("{}: {} without a path", path.display(), INCLUDE_TAG),
            ));
        }
        let target_path = if Path::new(target).is_absolute() {
            PathBuf::from(target)
        } else {
            base.join(target)
        };
        let included = splice_includes(&target_path, stack)?;

        let prefix = &line[..idx];
        let indent = " ".repeat(idx);
        if prefix.trim().is_empty() {
            // the tag sits alone at some indentation: splice in place
            for inc_line in included.lines() {
                out.push_str(prefix);
                out.push_str(inc_line);
                out.push('\n');
            }
        } else {
            // `key: !include x` becomes `key:` with a nested block
            out.push_str(prefix.trim_end());
            out.push('\n');
            for inc_line in included.lines() {
                out.push_str(&indent);
                out.push_str(inc_line);
                out.push('\n');
            }
        }
    }

    stack.pop();
    Ok(out)
}

// --- the document schema ---

type FormulaNode = serde_yaml::Value;

fn formula_text(value: &FormulaNode) -> String {
    match value {
        serde_yaml::Value::Bool(true) => "true".to_string(),
        serde_yaml::Value::Bool(false) => "false".to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}

#[derive(Clone, Copy, Deserialize, Debug)]
enum TypeNode {
    #[serde(rename = "REAL")]
    Real,
    #[serde(rename = "BOOLEAN")]
    Boolean,
}

impl From<TypeNode> for datamodel::VarType {
    fn from(ty: TypeNode) -> Self {
        match ty {
            TypeNode::Real => datamodel::VarType::Real,
            TypeNode::Boolean => datamodel::VarType::Boolean,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct VariableDefNode {
    #[serde(rename = "type")]
    var_type: TypeNode,
    default: Option<FormulaNode>,
    #[serde(rename = "delayableBy")]
    delayable_by: Option<FormulaNode>,
}

/// A bare `REAL`/`BOOLEAN` scalar is shorthand for a variable of that
/// type with no default.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum VariableNode {
    Shorthand(TypeNode),
    Full(VariableDefNode),
}

impl VariableNode {
    fn lower(&self, name: &str, locality: datamodel::Locality) -> datamodel::Variable {
        match self {
            VariableNode::Shorthand(ty) => datamodel::Variable {
                name: name.to_string(),
                var_type: (*ty).into(),
                locality,
                default: None,
                delayable_by: None,
            },
            VariableNode::Full(def) => datamodel::Variable {
                name: name.to_string(),
                var_type: def.var_type.into(),
                locality,
                default: def.default.as_ref().map(formula_text),
                delayable_by: def.delayable_by.as_ref().map(formula_text),
            },
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct TransitionNode {
    to: String,
    guard: Option<FormulaNode>,
    #[serde(default)]
    update: IndexMap<String, FormulaNode>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct LocationNode {
    invariant: Option<FormulaNode>,
    #[serde(default)]
    flow: IndexMap<String, FormulaNode>,
    #[serde(default)]
    update: IndexMap<String, FormulaNode>,
    #[serde(default)]
    transitions: Vec<TransitionNode>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct FunctionNode {
    #[serde(default)]
    inputs: IndexMap<String, TypeNode>,
    logic: String,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct InitialNode {
    location: String,
    #[serde(default)]
    valuations: IndexMap<String, FormulaNode>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct AutomatonNode {
    #[serde(default)]
    inputs: IndexMap<String, VariableNode>,
    #[serde(default)]
    outputs: IndexMap<String, VariableNode>,
    #[serde(default)]
    internals: IndexMap<String, VariableNode>,
    #[serde(default)]
    parameters: IndexMap<String, VariableNode>,
    #[serde(default)]
    locations: IndexMap<String, LocationNode>,
    #[serde(default)]
    functions: IndexMap<String, FunctionNode>,
    initialisation: InitialNode,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum DefinitionNode {
    Automaton(Box<AutomatonNode>),
    Network(Box<NetworkNode>),
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct InstanceNode {
    #[serde(rename = "type")]
    of: String,
    #[serde(default)]
    parameters: IndexMap<String, FormulaNode>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct ExecutionNode {
    #[serde(rename = "stepSize")]
    step_size: Option<f64>,
    #[serde(rename = "simulationTime")]
    simulation_time: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct LoggingNode {
    enable: Option<bool>,
    interval: Option<f64>,
    file: Option<String>,
    #[serde(default)]
    fields: Vec<String>,
}

#[derive(Deserialize, Debug)]
enum ParametrisationNode {
    #[serde(rename = "COMPILE_TIME")]
    CompileTime,
    #[serde(rename = "RUN_TIME")]
    RunTime,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct CodegenNode {
    #[serde(rename = "indentSize")]
    indent_size: Option<i32>,
    #[serde(default)]
    execution: ExecutionNode,
    #[serde(default)]
    logging: LoggingNode,
    #[serde(rename = "parametrisationMethod")]
    parametrisation_method: Option<ParametrisationNode>,
    #[serde(rename = "maximumInterTransitions")]
    maximum_inter_transitions: Option<u32>,
    #[serde(rename = "requireOneIntraTransitionPerTick")]
    require_one_intra_transition_per_tick: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct NetworkNode {
    #[serde(default)]
    inputs: IndexMap<String, VariableNode>,
    #[serde(default)]
    outputs: IndexMap<String, VariableNode>,
    #[serde(default)]
    definitions: IndexMap<String, DefinitionNode>,
    #[serde(default)]
    instances: IndexMap<String, InstanceNode>,
    #[serde(default)]
    mappings: IndexMap<String, FormulaNode>,
    #[serde(rename = "codegenConfig")]
    codegen_config: Option<CodegenNode>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct HamlDocument {
    name: String,
    system: Option<NetworkNode>,
    #[serde(default)]
    inputs: IndexMap<String, VariableNode>,
    #[serde(default)]
    outputs: IndexMap<String, VariableNode>,
    #[serde(default)]
    definitions: IndexMap<String, DefinitionNode>,
    #[serde(default)]
    instances: IndexMap<String, InstanceNode>,
    #[serde(default)]
    mappings: IndexMap<String, FormulaNode>,
    #[serde(rename = "codegenConfig")]
    codegen_config: Option<CodegenNode>,
}

// --- conversion into the raw IR ---

fn lower_variables(
    vars: &IndexMap<String, VariableNode>,
    locality: datamodel::Locality,
) -> Vec<datamodel::Variable> {
    vars.iter()
        .map(|(name, node)| node.lower(name, locality))
        .collect()
}

fn lower_automaton(name: &str, node: &AutomatonNode) -> datamodel::Automaton {
    let mut variables = lower_variables(&node.inputs, datamodel::Locality::Input);
    variables.extend(lower_variables(&node.outputs, datamodel::Locality::Output));
    variables.extend(lower_variables(&node.internals, datamodel::Locality::Internal));
    variables.extend(lower_variables(
        &node.parameters,
        datamodel::Locality::Parameter,
    ));

    let locations = node
        .locations
        .iter()
        .map(|(loc_name, loc)| datamodel::Location {
            name: loc_name.clone(),
            invariant: loc.invariant.as_ref().map(formula_text),
            flows: loc
                .flow
                .iter()
                .map(|(target, f)| (target.clone(), formula_text(f)))
                .collect(),
            updates: loc
                .update
                .iter()
                .map(|(target, f)| (target.clone(), formula_text(f)))
                .collect(),
            transitions: loc
                .transitions
                .iter()
                .map(|t| datamodel::Transition {
                    target: t.to.clone(),
                    guard: t.guard.as_ref().map(formula_text),
                    updates: t
                        .update
                        .iter()
                        .map(|(target, f)| (target.clone(), formula_text(f)))
                        .collect(),
                })
                .collect(),
        })
        .collect();

    let functions = node
        .functions
        .iter()
        .map(|(fn_name, f)| datamodel::Function {
            name: fn_name.clone(),
            inputs: f
                .inputs
                .iter()
                .map(|(input, ty)| (input.clone(), (*ty).into()))
                .collect(),
            body: f.logic.clone(),
        })
        .collect();

    datamodel::Automaton {
        name: name.to_string(),
        variables,
        locations,
        functions,
        initial: datamodel::Initial {
            location: node.initialisation.location.clone(),
            valuations: node
                .initialisation
                .valuations
                .iter()
                .map(|(target, f)| (target.clone(), formula_text(f)))
                .collect(),
        },
    }
}

fn lower_codegen(node: Option<&CodegenNode>) -> datamodel::CodegenConfig {
    let mut config = datamodel::CodegenConfig::default();
    let node = match node {
        Some(node) => node,
        None => return config,
    };

    if let Some(indent_size) = node.indent_size {
        config.indent_size = indent_size;
    }
    if let Some(step_size) = node.execution.step_size {
        config.step_size = step_size;
    }
    if let Some(simulation_time) = node.execution.simulation_time {
        config.simulation_time = simulation_time;
    }
    if let Some(enable) = node.logging.enable {
        config.logging.enabled = enable;
    }
    config.logging.interval = node.logging.interval;
    if let Some(file) = &node.logging.file {
        config.logging.file = file.clone();
    }
    config.logging.fields = node.logging.fields.clone();
    if let Some(method) = &node.parametrisation_method {
        config.parametrisation = match method {
            ParametrisationNode::CompileTime => datamodel::ParametrisationMethod::CompileTime,
            ParametrisationNode::RunTime => datamodel::ParametrisationMethod::RunTime,
        };
    }
    if let Some(max) = node.maximum_inter_transitions {
        config.max_inter_transitions = max;
    }
    if let Some(require) = node.require_one_intra_transition_per_tick {
        config.require_one_intra_transition = require;
    }
    config
}

fn lower_network(name: &str, node: &NetworkNode) -> datamodel::Network {
    datamodel::Network {
        name: name.to_string(),
        inputs: lower_variables(&node.inputs, datamodel::Locality::Input),
        outputs: lower_variables(&node.outputs, datamodel::Locality::Output),
        definitions: node
            .definitions
            .iter()
            .map(|(def_name, def)| {
                let lowered = match def {
                    DefinitionNode::Automaton(a) => {
                        datamodel::Definition::Automaton(lower_automaton(def_name, a))
                    }
                    DefinitionNode::Network(n) => {
                        datamodel::Definition::Network(lower_network(def_name, n))
                    }
                };
                (def_name.clone(), lowered)
            })
            .collect(),
        instances: node
            .instances
            .iter()
            .map(|(inst_name, inst)| datamodel::Instance {
                name: inst_name.clone(),
                of: inst.of.clone(),
                parameters: inst
                    .parameters
                    .iter()
                    .map(|(param, f)| (param.clone(), formula_text(f)))
                    .collect(),
            })
            .collect(),
        mappings: node
            .mappings
            .iter()
            .map(|(dst, src)| datamodel::Mapping {
                dst: datamodel::Port::parse(dst),
                src: formula_text(src),
            })
            .collect(),
        codegen: lower_codegen(node.codegen_config.as_ref()),
    }
}

fn yaml_error(err: serde_yaml::Error) -> Error {
    let message = err.to_string();
    let code = if message.contains("unknown field") {
        ErrorCode::UnknownField
    } else {
        ErrorCode::YamlDeserialization
    };
    import_error(code, message)
}

/// Parse a HAML document (includes already spliced).
pub fn parse_haml(text: &str) -> Result<datamodel::Network> {
    let doc: HamlDocument = serde_yaml::from_str(text).map_err(yaml_error)?;

    let network = match &doc.system {
        Some(system) => lower_network(&doc.name, system),
        None => {
            let node = NetworkNode {
                inputs: doc.inputs,
                outputs: doc.outputs,
                definitions: doc.definitions,
                instances: doc.instances,
                mappings: doc.mappings,
                codegen_config: doc.codegen_config,
            };
            lower_network(&doc.name, &node)
        }
    };
    Ok(network)
}

/// Load a HAML document from disk, splicing `!include` directives
/// first.
pub fn open_haml(path: &Path) -> Result<datamodel::Network> {
    let mut stack = vec![];
    let text = splice_includes(path, &mut stack)?;
    parse_haml(&text)
}
