// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Importer for CellML-style biomedical models.
//!
//! Architecturally the same shape as the HAML importer: the XML is
//! read into a small document model, then converted into the engine's
//! raw IR.  Each component lowers to a one-location automaton:
//! `d x / d t` equations become flow entries, algebraic equalities
//! become location updates, `initial_value` becomes the default, and
//! connections become network mappings.
//!
//! The supported MathML subset matches the formula operator table;
//! `piecewise` is not supported and is reported as a typed error.

use std::fs;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::engine::ast::{print_eqn, BinaryOp, Expr, Loc, NaryOp, UnaryOp};
use crate::engine::builtins::BuiltinFn;
use crate::engine::common::{Error, ErrorCode, ErrorKind, Result};
use crate::engine::datamodel;

fn xml_error(details: String) -> Error {
    Error::new(ErrorKind::Import, ErrorCode::XmlDeserialization, Some(details))
}

#[derive(Debug, Clone, PartialEq)]
enum MathNode {
    /// `<apply>` with its operator name
    Op(String, Vec<MathNode>),
    /// operator marker like `<plus/>`, before it is folded into `Op`
    Sym(String),
    Ci(String),
    Cn(String, f64),
    True,
    False,
    /// `<bvar><ci>t</ci></bvar>`
    Bvar(String),
}

#[derive(Debug, Default)]
struct CVariable {
    name: String,
    initial: Option<String>,
    interface: Option<String>,
}

#[derive(Debug, Default)]
struct CComponent {
    name: String,
    variables: Vec<CVariable>,
    equations: Vec<MathNode>,
}

#[derive(Debug, Default)]
struct CConnection {
    component_1: String,
    component_2: String,
    variables: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct CModel {
    name: String,
    components: Vec<CComponent>,
    connections: Vec<CConnection>,
}

struct MathFrame {
    tag: String,
    children: Vec<MathNode>,
    text: String,
}

const OPERATOR_TAGS: &[&str] = &[
    "plus", "minus", "times", "divide", "power", "root", "exp", "ln", "sin", "cos", "tan",
    "abs", "floor", "ceiling", "eq", "neq", "lt", "leq", "gt", "geq", "and", "or", "not",
    "diff",
];

fn attr(e: &BytesStart, name: &str) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a.map_err(|err| xml_error(err.to_string()))?;
        if a.key.local_name().as_ref() == name.as_bytes() {
            let value = a
                .unescape_value()
                .map_err(|err| xml_error(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn require_attr(e: &BytesStart, name: &str, tag: &str) -> Result<String> {
    match attr(e, name)? {
        Some(value) => Ok(value),
        None => Err(xml_error(format!("<{}> without {}", tag, name))),
    }
}

struct CellmlParser {
    model: CModel,
    math_depth: usize,
    math_stack: Vec<MathFrame>,
    in_connection: bool,
}

impl CellmlParser {
    fn new() -> Self {
        CellmlParser {
            model: CModel::default(),
            math_depth: 0,
            math_stack: vec![],
            in_connection: false,
        }
    }

    fn current_component(&mut self) -> Result<&mut CComponent> {
        self.model
            .components
            .last_mut()
            .ok_or_else(|| xml_error("element outside a component".to_string()))
    }

    fn push_math_node(&mut self, node: MathNode) -> Result<()> {
        match self.math_stack.last_mut() {
            Some(frame) => {
                frame.children.push(node);
                Ok(())
            }
            None => Err(xml_error("math content outside <math>".to_string())),
        }
    }

    fn on_start(&mut self, tag: &str, e: &BytesStart) -> Result<()> {
        if self.math_depth > 0 {
            if tag == "piecewise" || tag == "piece" || tag == "otherwise" {
                return Err(xml_error("piecewise is not supported".to_string()));
            }
            self.math_stack.push(MathFrame {
                tag: tag.to_string(),
                children: vec![],
                text: String::new(),
            });
            self.math_depth += 1;
            return Ok(());
        }

        match tag {
            "model" => {
                self.model.name = require_attr(e, "name", "model")?;
            }
            "component" => {
                let name = require_attr(e, "name", "component")?;
                self.model.components.push(CComponent {
                    name,
                    ..CComponent::default()
                });
            }
            "variable" => {
                let variable = CVariable {
                    name: require_attr(e, "name", "variable")?,
                    initial: attr(e, "initial_value")?,
                    interface: attr(e, "public_interface")?,
                };
                self.current_component()?.variables.push(variable);
            }
            "connection" => {
                self.in_connection = true;
                self.model.connections.push(CConnection::default());
            }
            "map_components" => {
                if let Some(connection) = self.model.connections.last_mut() {
                    connection.component_1 = require_attr(e, "component_1", "map_components")?;
                    connection.component_2 = require_attr(e, "component_2", "map_components")?;
                }
            }
            "map_variables" => {
                if let Some(connection) = self.model.connections.last_mut() {
                    connection.variables.push((
                        require_attr(e, "variable_1", "map_variables")?,
                        require_attr(e, "variable_2", "map_variables")?,
                    ));
                }
            }
            "math" => {
                self.math_depth = 1;
                self.math_stack.push(MathFrame {
                    tag: "math".to_string(),
                    children: vec![],
                    text: String::new(),
                });
            }
            // units and documentation are skipped
            _ => {}
        }
        Ok(())
    }

    fn on_empty(&mut self, tag: &str, e: &BytesStart) -> Result<()> {
        if self.math_depth > 0 {
            let node = match tag {
                "true" => MathNode::True,
                "false" => MathNode::False,
                "degree" => return Ok(()),
                _ if OPERATOR_TAGS.contains(&tag) => MathNode::Sym(tag.to_string()),
                _ => {
                    return Err(xml_error(format!("unsupported math element <{}>", tag)));
                }
            };
            return self.push_math_node(node);
        }
        // empty elements outside math carry only attributes
        self.on_start(tag, e)?;
        if tag == "connection" {
            self.in_connection = false;
        }
        Ok(())
    }

    fn on_text(&mut self, text: &str) {
        if let Some(frame) = self.math_stack.last_mut() {
            frame.text.push_str(text);
        }
    }

    fn on_end(&mut self, tag: &str) -> Result<()> {
        if self.math_depth == 0 {
            if tag == "connection" {
                self.in_connection = false;
            }
            return Ok(());
        }

        let frame = match self.math_stack.pop() {
            Some(frame) => frame,
            None => return Err(xml_error(format!("unbalanced </{}>", tag))),
        };
        self.math_depth -= 1;

        if frame.tag == "math" {
            self.math_depth = 0;
            let equations = frame.children;
            self.current_component()?.equations.extend(equations);
            return Ok(());
        }

        let text = frame.text.trim().to_string();
        let node = match frame.tag.as_str() {
            "ci" => MathNode::Ci(text),
            "cn" => {
                let value: f64 = text
                    .parse()
                    .map_err(|_| xml_error(format!("bad <cn> value {:?}", text)))?;
                MathNode::Cn(text, value)
            }
            "apply" => {
                let mut children = frame.children;
                if children.is_empty() {
                    return Err(xml_error("empty <apply>".to_string()));
                }
                match children.remove(0) {
                    MathNode::Sym(op) => MathNode::Op(op, children),
                    other => {
                        return Err(xml_error(format!(
                            "<apply> must start with an operator, got {:?}",
                            other
                        )));
                    }
                }
            }
            "bvar" => match frame.children.first() {
                Some(MathNode::Ci(name)) => MathNode::Bvar(name.clone()),
                _ => return Err(xml_error("<bvar> must hold a <ci>".to_string())),
            },
            "degree" => {
                // only first derivatives are expressible
                if text != "1" && !text.is_empty() {
                    return Err(xml_error(format!("unsupported degree {}", text)));
                }
                return Ok(());
            }
            // operator written as <plus></plus>
            tag if OPERATOR_TAGS.contains(&tag) => MathNode::Sym(tag.to_string()),
            "true" => MathNode::True,
            "false" => MathNode::False,
            tag => {
                return Err(xml_error(format!("unsupported math element <{}>", tag)));
            }
        };
        self.push_math_node(node)
    }
}

fn dloc() -> Loc {
    Loc::default()
}

fn fold_binary(op: BinaryOp, args: Vec<Expr>) -> Result<Expr> {
    let mut iter = args.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| xml_error(format!("operator {:?} without operands", op)))?;
    Ok(iter.fold(first, |acc, next| {
        Expr::Op2(op, Box::new(acc), Box::new(next), dloc())
    }))
}

fn to_expr(node: &MathNode) -> Result<Expr> {
    let expr = match node {
        MathNode::Ci(name) => Expr::Var(name.clone(), dloc()),
        MathNode::Cn(text, value) => Expr::Const(text.clone(), *value, dloc()),
        MathNode::True => Expr::ConstBool(true, dloc()),
        MathNode::False => Expr::ConstBool(false, dloc()),
        MathNode::Bvar(name) => {
            return Err(xml_error(format!("<bvar> {} outside a derivative", name)));
        }
        MathNode::Sym(op) => {
            return Err(xml_error(format!("operator <{}> without <apply>", op)));
        }
        MathNode::Op(op, args) => {
            let exprs: Result<Vec<Expr>> = args.iter().map(to_expr).collect();
            let mut exprs = exprs?;
            let arity = exprs.len();

            fn unary(op: &str, mut exprs: Vec<Expr>) -> Result<Expr> {
                if exprs.len() != 1 {
                    return Err(xml_error(format!("{} takes one operand", op)));
                }
                let a = Box::new(exprs.remove(0));
                let expr = match op {
                    "root" => Expr::App(BuiltinFn::Sqrt(a), dloc()),
                    "exp" => Expr::App(BuiltinFn::Exp(a), dloc()),
                    "ln" => Expr::App(BuiltinFn::Ln(a), dloc()),
                    "sin" => Expr::App(BuiltinFn::Sin(a), dloc()),
                    "cos" => Expr::App(BuiltinFn::Cos(a), dloc()),
                    "tan" => Expr::App(BuiltinFn::Tan(a), dloc()),
                    "abs" => Expr::App(BuiltinFn::Abs(a), dloc()),
                    "floor" => Expr::App(BuiltinFn::Floor(a), dloc()),
                    "ceiling" => Expr::App(BuiltinFn::Ceil(a), dloc()),
                    "not" => Expr::Op1(UnaryOp::Not, a, dloc()),
                    _ => unreachable!(),
                };
                Ok(expr)
            }

            match op.as_str() {
                "plus" => fold_binary(BinaryOp::Add, exprs)?,
                "minus" => match arity {
                    1 => Expr::Op1(UnaryOp::Negative, Box::new(exprs.remove(0)), dloc()),
                    2 => fold_binary(BinaryOp::Sub, exprs)?,
                    _ => {
                        return Err(xml_error("minus takes one or two operands".to_string()));
                    }
                },
                "times" => fold_binary(BinaryOp::Mul, exprs)?,
                "divide" => {
                    if arity != 2 {
                        return Err(xml_error("divide takes two operands".to_string()));
                    }
                    fold_binary(BinaryOp::Div, exprs)?
                }
                "power" => {
                    if arity != 2 {
                        return Err(xml_error("power takes two operands".to_string()));
                    }
                    let b = exprs.remove(1);
                    let a = exprs.remove(0);
                    Expr::App(BuiltinFn::Pow(Box::new(a), Box::new(b)), dloc())
                }
                "root" | "exp" | "ln" | "sin" | "cos" | "tan" | "abs" | "floor"
                | "ceiling" | "not" => unary(op, exprs)?,
                "eq" => fold_binary(BinaryOp::Eq, exprs)?,
                "neq" => fold_binary(BinaryOp::Neq, exprs)?,
                "lt" => fold_binary(BinaryOp::Lt, exprs)?,
                "leq" => fold_binary(BinaryOp::Lte, exprs)?,
                "gt" => fold_binary(BinaryOp::Gt, exprs)?,
                "geq" => fold_binary(BinaryOp::Gte, exprs)?,
                "and" => match arity {
                    3.. => Expr::Nary(NaryOp::And, exprs, dloc()),
                    _ => fold_binary(BinaryOp::And, exprs)?,
                },
                "or" => match arity {
                    3.. => Expr::Nary(NaryOp::Or, exprs, dloc()),
                    _ => fold_binary(BinaryOp::Or, exprs)?,
                },
                other => {
                    return Err(xml_error(format!("unsupported operator <{}>", other)));
                }
            }
        }
    };
    Ok(expr)
}

fn lower_component(component: &CComponent) -> Result<datamodel::Automaton> {
    let mut variables = vec![];
    for var in component.variables.iter() {
        let locality = match var.interface.as_deref() {
            Some("in") => datamodel::Locality::Input,
            Some("out") => datamodel::Locality::Output,
            _ => datamodel::Locality::Internal,
        };
        variables.push(datamodel::Variable {
            name: var.name.clone(),
            var_type: datamodel::VarType::Real,
            locality,
            default: var.initial.clone(),
            delayable_by: None,
        });
    }

    let mut flows = vec![];
    let mut updates = vec![];
    for equation in component.equations.iter() {
        let (lhs, rhs) = match equation {
            MathNode::Op(op, args) if op == "eq" && args.len() == 2 => (&args[0], &args[1]),
            other => {
                return Err(xml_error(format!(
                    "{}: top-level math must be an equality, got {:?}",
                    component.name, other
                )));
            }
        };
        let rhs_text = print_eqn(&to_expr(rhs)?);
        match lhs {
            MathNode::Ci(target) => updates.push((target.clone(), rhs_text)),
            MathNode::Op(op, args) if op == "diff" => {
                let state = args.iter().find_map(|a| match a {
                    MathNode::Ci(name) => Some(name.clone()),
                    _ => None,
                });
                match state {
                    Some(state) => flows.push((state, rhs_text)),
                    None => {
                        return Err(xml_error(format!(
                            "{}: derivative without a state variable",
                            component.name
                        )));
                    }
                }
            }
            other => {
                return Err(xml_error(format!(
                    "{}: unsupported equation target {:?}",
                    component.name, other
                )));
            }
        }
    }

    Ok(datamodel::Automaton {
        name: component.name.clone(),
        variables,
        locations: vec![datamodel::Location {
            name: "main".to_string(),
            invariant: None,
            flows,
            updates,
            transitions: vec![],
        }],
        functions: vec![],
        initial: datamodel::Initial {
            location: "main".to_string(),
            valuations: vec![],
        },
    })
}

fn interface_of<'a>(model: &'a CModel, component: &str, variable: &str) -> Option<&'a str> {
    model
        .components
        .iter()
        .find(|c| c.name == component)?
        .variables
        .iter()
        .find(|v| v.name == variable)?
        .interface
        .as_deref()
}

fn lower_model(model: &CModel) -> Result<datamodel::Network> {
    let mut definitions = vec![];
    let mut instances = vec![];
    for component in model.components.iter() {
        definitions.push((
            component.name.clone(),
            datamodel::Definition::Automaton(lower_component(component)?),
        ));
        instances.push(datamodel::Instance {
            name: component.name.clone(),
            of: component.name.clone(),
            parameters: vec![],
        });
    }

    let mut mappings = vec![];
    for connection in model.connections.iter() {
        for (var_1, var_2) in connection.variables.iter() {
            let side_1 = interface_of(model, &connection.component_1, var_1);
            let side_2 = interface_of(model, &connection.component_2, var_2);
            let (dst_comp, dst_var, src_comp, src_var) = if side_1 == Some("in") {
                (&connection.component_1, var_1, &connection.component_2, var_2)
            } else if side_2 == Some("in") {
                (&connection.component_2, var_2, &connection.component_1, var_1)
            } else {
                return Err(Error::new(
                    ErrorKind::Import,
                    ErrorCode::UnresolvedMapping,
                    Some(format!(
                        "{}.{} <-> {}.{}",
                        connection.component_1, var_1, connection.component_2, var_2
                    )),
                ));
            };
            mappings.push(datamodel::Mapping {
                dst: datamodel::Port {
                    instance: Some(dst_comp.clone()),
                    variable: dst_var.clone(),
                },
                src: format!("{}.{}", src_comp, src_var),
            });
        }
    }

    Ok(datamodel::Network {
        name: model.name.clone(),
        inputs: vec![],
        outputs: vec![],
        definitions,
        instances,
        mappings,
        codegen: datamodel::CodegenConfig::default(),
    })
}

/// Parse a CellML-style document into the raw IR.
pub fn parse_cellml(text: &str) -> Result<datamodel::Network> {
    let mut reader = Reader::from_str(text);
    let mut parser = CellmlParser::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let tag = String::from_utf8_lossy(name.as_ref()).into_owned();
                parser.on_start(&tag, &e)?;
            }
            Ok(Event::Empty(e)) => {
                let name = e.local_name();
                let tag = String::from_utf8_lossy(name.as_ref()).into_owned();
                parser.on_empty(&tag, &e)?;
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|err| xml_error(err.to_string()))?;
                parser.on_text(&text);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                let tag = String::from_utf8_lossy(name.as_ref()).into_owned();
                parser.on_end(&tag)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(xml_error(err.to_string())),
        }
    }

    if parser.model.name.is_empty() {
        return Err(xml_error("document has no <model>".to_string()));
    }
    lower_model(&parser.model)
}

/// Load a CellML-style document from disk.
pub fn open_cellml(path: &Path) -> Result<datamodel::Network> {
    let text = fs::read_to_string(path).map_err(|err| {
        Error::new(
            ErrorKind::Import,
            ErrorCode::Io,
            Some(format!("{}: {}", path.display(), err)),
        )
    })?;
    parse_cellml(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::datamodel::{Definition, Locality};
    use crate::engine::Project;

    const PACEMAKER: &str = r#"<?xml version="1.0"?>
<model name="pacemaker" xmlns="http://www.cellml.org/cellml/1.0#">
  <component name="stimulator">
    <variable name="amplitude" public_interface="out" initial_value="0"/>
    <math xmlns="http://www.w3.org/1998/Math/MathML">
      <apply><eq/>
        <ci>amplitude</ci>
        <cn>2</cn>
      </apply>
    </math>
  </component>
  <component name="cell">
    <variable name="stimulus" public_interface="in"/>
    <variable name="voltage" public_interface="out" initial_value="0"/>
    <math xmlns="http://www.w3.org/1998/Math/MathML">
      <apply><eq/>
        <apply><diff/>
          <bvar><ci>t</ci></bvar>
          <ci>voltage</ci>
        </apply>
        <apply><minus/>
          <ci>stimulus</ci>
          <apply><times/>
            <ci>voltage</ci>
            <cn>0.5</cn>
          </apply>
        </apply>
      </apply>
    </math>
  </component>
  <connection>
    <map_components component_1="cell" component_2="stimulator"/>
    <map_variables variable_1="stimulus" variable_2="amplitude"/>
  </connection>
</model>
"#;

    #[test]
    fn test_components_become_automata() {
        let network = parse_cellml(PACEMAKER).unwrap();
        assert_eq!("pacemaker", network.name);
        assert_eq!(2, network.definitions.len());
        assert_eq!(2, network.instances.len());

        let cell = match network.get_definition("cell").unwrap() {
            Definition::Automaton(a) => a,
            Definition::Network(_) => panic!("expected automaton"),
        };
        assert_eq!(1, cell.locations.len());
        let main = &cell.locations[0];
        assert_eq!(
            vec![("voltage".to_string(), "stimulus - voltage * 0.5".to_string())],
            main.flows
        );

        let stim = cell.get_variable("stimulus").unwrap();
        assert_eq!(Locality::Input, stim.locality);
        let voltage = cell.get_variable("voltage").unwrap();
        assert_eq!(Locality::Output, voltage.locality);
        assert_eq!(Some("0".to_string()), voltage.default);

        let stimulator = match network.get_definition("stimulator").unwrap() {
            Definition::Automaton(a) => a,
            Definition::Network(_) => panic!("expected automaton"),
        };
        assert_eq!(
            vec![("amplitude".to_string(), "2".to_string())],
            stimulator.locations[0].updates
        );
    }

    #[test]
    fn test_connections_become_mappings() {
        let network = parse_cellml(PACEMAKER).unwrap();
        assert_eq!(1, network.mappings.len());
        let mapping = &network.mappings[0];
        assert_eq!("cell.stimulus", mapping.dst.to_string());
        assert_eq!("stimulator.amplitude", mapping.src);
    }

    #[test]
    fn test_imported_model_checks_clean() {
        let network = parse_cellml(PACEMAKER).unwrap();
        let project = Project::new(network);
        assert!(!project.has_errors(), "{:?}", project.all_errors());
    }

    #[test]
    fn test_piecewise_is_rejected() {
        let doc = r#"<?xml version="1.0"?>
<model name="bad">
  <component name="c">
    <variable name="x" public_interface="out"/>
    <math>
      <apply><eq/>
        <ci>x</ci>
        <piecewise>
          <piece><cn>1</cn><apply><gt/><ci>x</ci><cn>0</cn></apply></piece>
        </piecewise>
      </apply>
    </math>
  </component>
</model>
"#;
        let err = parse_cellml(doc).unwrap_err();
        assert_eq!(ErrorCode::XmlDeserialization, err.code);
        assert!(err.get_details().unwrap().contains("piecewise"));
    }
}
