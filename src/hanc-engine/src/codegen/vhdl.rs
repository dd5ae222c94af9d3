// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The RTL back-end: template-driven synchronous VHDL.
//!
//! Every automaton becomes one entity with a clocked process: ports
//! for the external inputs and outputs, signals for internals, a
//! state enumeration for locations, and an `_update` shadow variable
//! per written variable so one clock tick observes only the entry
//! valuation.  Reals lower to 32-bit signed Q16.16 fixed point;
//! parameters become integer generics carrying the raw fixed-point
//! value.  Delayable variables are rejected.

use std::collections::HashMap;

use minijinja::{context, Environment};
use serde::Serialize;

use crate::ast::{BinaryOp, Expr, NaryOp, UnaryOp};
use crate::codegen::util::{macro_case, mangle_ident, snake_case, to_fixed};
use crate::codegen::FileSet;
use crate::codegen_err;
use crate::common::{Ident, Result};
use crate::datamodel::{Definition, Locality, Network, VarType};
use crate::eval::Value;
use crate::model::{HAutomaton, HLocation};
use crate::parser;
use crate::project::{join_path, Project};

const ENTITY_TEMPLATE: &str = r#"library ieee;
use ieee.std_logic_1164.all;
use ieee.numeric_std.all;

use work.sim_support.all;

entity {{ name }} is
{%- if generics %}
    generic (
{%- for g in generics %}
        {{ g.name }} : integer := {{ g.default }}{% if not loop.last %};{% endif %}
{%- endfor %}
    );
{%- endif %}
    port (
        clk : in std_logic;
        rst : in std_logic{% for p in ports %};
        {{ p.name }} : {{ p.dir }} {{ p.ty }}{% endfor %}
    );
end entity {{ name }};

architecture behavioural of {{ name }} is
    type state_t is ({{ states }});
    signal state : state_t := {{ initial_state }};
{%- for s in signals %}
    signal {{ s.name }} : {{ s.ty }} := {{ s.init }};
{%- endfor %}
begin
{%- for a in output_assigns %}
    {{ a }}
{%- endfor %}

    step : process (clk)
{%- for v in shadows %}
        variable {{ v.name }}_update : {{ v.ty }};
{%- endfor %}
    begin
        if rising_edge(clk) then
            if rst = '1' then
                state <= {{ initial_state }};
{%- for r in resets %}
                {{ r }}
{%- endfor %}
            else
                case state is
{%- for arm in arms %}
                    when {{ arm.state }} =>
{%- for line in arm.lines %}
                        {{ line }}
{%- endfor %}
{%- endfor %}
                end case;
            end if;
        end if;
    end process step;
end architecture behavioural;
"#;

const SUPPORT_PACKAGE: &str = r#"library ieee;
use ieee.std_logic_1164.all;
use ieee.numeric_std.all;

package sim_support is
    constant STEP_SIZE_FP : signed(31 downto 0) := to_signed({{ step_size_fp }}, 32);
    function fixed_mul(a : signed(31 downto 0); b : signed(31 downto 0)) return signed;
    function fixed_div(a : signed(31 downto 0); b : signed(31 downto 0)) return signed;
end package sim_support;

package body sim_support is
    function fixed_mul(a : signed(31 downto 0); b : signed(31 downto 0)) return signed is
        variable wide : signed(63 downto 0);
    begin
        wide := a * b;
        return wide(47 downto 16);
    end function;

    function fixed_div(a : signed(31 downto 0); b : signed(31 downto 0)) return signed is
        variable wide : signed(63 downto 0);
    begin
        wide := resize(a, 64) sll 16;
        return resize(wide / resize(b, 64), 32);
    end function;
end package body sim_support;
"#;

#[derive(Serialize)]
struct GenericCtx {
    name: String,
    default: i32,
}

#[derive(Serialize)]
struct PortCtx {
    name: String,
    dir: &'static str,
    ty: &'static str,
}

#[derive(Serialize)]
struct SignalCtx {
    name: String,
    ty: &'static str,
    init: String,
}

#[derive(Serialize)]
struct ShadowCtx {
    name: String,
    ty: &'static str,
}

#[derive(Serialize)]
struct ArmCtx {
    state: String,
    lines: Vec<String>,
}

const SIGNED_32: &str = "signed(31 downto 0)";
const STD_LOGIC: &str = "std_logic";

fn vhdl_type(var_type: VarType) -> &'static str {
    match var_type {
        VarType::Boolean => STD_LOGIC,
        VarType::Real => SIGNED_32,
    }
}

fn vhdl_init(var_type: VarType) -> String {
    match var_type {
        VarType::Boolean => "'0'".to_string(),
        VarType::Real => "to_signed(0, 32)".to_string(),
    }
}

/// Lowering context: variable types, signal renames, and the set of
/// parameters that became generics.
struct VhdlCtx {
    types: HashMap<Ident, VarType>,
    renames: HashMap<Ident, String>,
    generics: HashMap<Ident, String>,
    site: String,
}

impl VhdlCtx {
    fn unsupported<T>(&self, what: &str) -> Result<T> {
        codegen_err!(UnsupportedInTarget, format!("{}: {}", self.site, what))
    }

    fn expr_type(&self, expr: &Expr) -> Result<VarType> {
        let funcs = HashMap::new();
        match crate::typing::result_type(expr, &self.types, &funcs) {
            Ok(ty) => Ok(ty),
            Err(err) => codegen_err!(Generic, format!("{}: {}", self.site, err)),
        }
    }
}

/// Lower a formula to VHDL text: a `signed(31 downto 0)` expression
/// for reals, a `boolean` expression for booleans.
fn lower_vhdl(expr: &Expr, ctx: &VhdlCtx) -> Result<String> {
    let text = match expr {
        Expr::Const(_, n, _) => format!("to_signed({}, 32)", to_fixed(*n)),
        Expr::ConstBool(true, _) => "true".to_string(),
        Expr::ConstBool(false, _) => "false".to_string(),
        Expr::Var(id, _) => {
            if let Some(generic) = ctx.generics.get(id) {
                return Ok(format!("to_signed({}, 32)", generic));
            }
            let name = ctx
                .renames
                .get(id)
                .cloned()
                .unwrap_or_else(|| mangle_ident(id));
            match ctx.types.get(id) {
                Some(VarType::Boolean) => format!("({} = '1')", name),
                _ => name,
            }
        }
        Expr::App(builtin, _) => {
            return ctx.unsupported(&format!("builtin {}", builtin.name()));
        }
        Expr::Call(func, _, _) => {
            return ctx.unsupported(&format!("function call {}", func));
        }
        Expr::Op1(op, l, _) => {
            let operand = lower_vhdl(l, ctx)?;
            match op {
                UnaryOp::Negative => format!("(-{})", operand),
                UnaryOp::Not => format!("(not {})", operand),
            }
        }
        Expr::Op2(op, l, r, _) => {
            let lt = lower_vhdl(l, ctx)?;
            let rt = lower_vhdl(r, ctx)?;
            match op {
                BinaryOp::Add => format!("({} + {})", lt, rt),
                BinaryOp::Sub => format!("({} - {})", lt, rt),
                BinaryOp::Mul => format!("fixed_mul({}, {})", lt, rt),
                BinaryOp::Div => format!("fixed_div({}, {})", lt, rt),
                BinaryOp::Exp => {
                    return ctx.unsupported("exponentiation");
                }
                BinaryOp::Lt => format!("({} < {})", lt, rt),
                BinaryOp::Lte => format!("({} <= {})", lt, rt),
                BinaryOp::Gt => format!("({} > {})", lt, rt),
                BinaryOp::Gte => format!("({} >= {})", lt, rt),
                BinaryOp::Eq => format!("({} = {})", lt, rt),
                BinaryOp::Neq => format!("({} /= {})", lt, rt),
                BinaryOp::And => format!("({} and {})", lt, rt),
                BinaryOp::Or => format!("({} or {})", lt, rt),
            }
        }
        Expr::Nary(op, args, _) => {
            let parts: Result<Vec<String>> = args.iter().map(|a| lower_vhdl(a, ctx)).collect();
            let joiner = match op {
                NaryOp::And => " and ",
                NaryOp::Or => " or ",
            };
            format!("({})", parts?.join(joiner))
        }
    };
    Ok(text)
}

/// One assignment into a shadow variable, converting booleans back
/// into `std_logic`.
fn shadow_assign(target: &str, expr: &Expr, ctx: &VhdlCtx) -> Result<String> {
    let text = lower_vhdl(expr, ctx)?;
    match ctx.expr_type(expr)? {
        VarType::Boolean => Ok(format!(
            "{}_update := '1' when {} else '0';",
            target, text
        )),
        VarType::Real => Ok(format!("{}_update := {};", target, text)),
    }
}

pub fn render(project: &Project, files: &mut FileSet) -> Result<()> {
    let cfg = project.config();
    let env = template_env()?;

    let support = env
        .get_template("support")
        .and_then(|t| t.render(context!(step_size_fp => to_fixed(cfg.step_size))));
    let support = match support {
        Ok(text) => text,
        Err(err) => {
            return codegen_err!(Generic, format!("support package: {}", err));
        }
    };
    files.push("sim_support.vhd", support);

    let mut sources = vec!["sim_support.vhd".to_string()];
    render_network(project, &project.datamodel, "", "", &env, files, &mut sources)?;

    files.push("Makefile", render_makefile(&sources));
    Ok(())
}

fn template_env() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    if let Err(err) = env.add_template("entity", ENTITY_TEMPLATE) {
        return codegen_err!(Generic, format!("entity template: {}", err));
    }
    if let Err(err) = env.add_template("support", SUPPORT_PACKAGE) {
        return codegen_err!(Generic, format!("support template: {}", err));
    }
    Ok(env)
}

fn render_network(
    project: &Project,
    network: &Network,
    def_path: &str,
    dir: &str,
    env: &Environment,
    files: &mut FileSet,
    sources: &mut Vec<String>,
) -> Result<()> {
    let mut has_nested = false;

    for (key, def) in network.definitions.iter() {
        match def {
            Definition::Automaton(_) => {
                let automaton = match project.automata.get(&join_path(def_path, key)) {
                    Some(automaton) => automaton,
                    None => continue,
                };
                let folder = snake_case(key);
                let file = format!("{}{}/{}.vhd", dir, folder, snake_case(key));
                let entity =
                    render_entity(automaton, &mangle_ident(&join_path(def_path, key)), env)?;
                sources.push(file.clone());
                files.push(file, entity);
            }
            Definition::Network(inner) => {
                has_nested = true;
                let folder = snake_case(key);
                render_network(
                    project,
                    inner,
                    &join_path(def_path, key),
                    &format!("{}{}/", dir, folder),
                    env,
                    files,
                    sources,
                )?;
            }
        }
    }

    // the structural toplevel wires automaton instances port to port;
    // hierarchical designs are flattened before reaching this point
    if def_path.is_empty() {
        if has_nested {
            return codegen_err!(
                UnsupportedInTarget,
                format!("{}: nested networks must be flattened for RTL", network.name)
            );
        }
        let file = format!("{}.vhd", snake_case(&network.name));
        let toplevel = render_toplevel(project, network, def_path)?;
        sources.push(file.clone());
        files.push(file, toplevel);
    }

    Ok(())
}

fn state_name(tn: &str, location: &str) -> String {
    format!("{}_{}", macro_case(tn), macro_case(location))
}

fn render_entity(automaton: &HAutomaton, tn: &str, env: &Environment) -> Result<String> {
    for var in automaton.variables.iter() {
        if var.delay_len.is_some() || var.delayable_by.is_some() {
            return codegen_err!(
                DelayUnsupported,
                format!("{}.{}", automaton.name, var.name)
            );
        }
    }

    let mut ctx = VhdlCtx {
        types: automaton.var_types(),
        renames: HashMap::new(),
        generics: HashMap::new(),
        site: automaton.name.clone(),
    };

    let mut generics: Vec<GenericCtx> = vec![];
    for var in automaton.variables_of(Locality::Parameter) {
        if var.var_type != VarType::Real {
            return codegen_err!(
                UnsupportedInTarget,
                format!("{}.{}: boolean parameter", automaton.name, var.name)
            );
        }
        let default = match &var.default {
            Some(expr) => match crate::eval::eval(expr, &crate::eval::Env::default()) {
                Ok(Value::Real(n)) => to_fixed(n),
                _ => 0,
            },
            None => 0,
        };
        let name = macro_case(&var.name);
        ctx.generics.insert(var.name.clone(), name.clone());
        generics.push(GenericCtx { name, default });
    }

    let mut ports: Vec<PortCtx> = vec![];
    for var in automaton.variables_of(Locality::Input) {
        ports.push(PortCtx {
            name: mangle_ident(&var.name),
            dir: "in",
            ty: vhdl_type(var.var_type),
        });
    }
    for var in automaton.variables_of(Locality::Output) {
        ports.push(PortCtx {
            name: mangle_ident(&var.name),
            dir: "out",
            ty: vhdl_type(var.var_type),
        });
    }

    // outputs are driven through internal shadows so the process can
    // read them back
    let mut signals: Vec<SignalCtx> = vec![];
    let mut output_assigns: Vec<String> = vec![];
    let mut resets: Vec<String> = vec![];
    for var in automaton.variables.iter() {
        match var.locality {
            Locality::Output => {
                let internal = format!("{}_int", mangle_ident(&var.name));
                output_assigns.push(format!("{} <= {};", mangle_ident(&var.name), internal));
                ctx.renames.insert(var.name.clone(), internal.clone());
                signals.push(SignalCtx {
                    name: internal,
                    ty: vhdl_type(var.var_type),
                    init: vhdl_init(var.var_type),
                });
            }
            Locality::Internal => {
                signals.push(SignalCtx {
                    name: mangle_ident(&var.name),
                    ty: vhdl_type(var.var_type),
                    init: vhdl_init(var.var_type),
                });
            }
            Locality::Input | Locality::Parameter => {}
        }
    }

    // reset re-applies defaults and initial valuations
    for var in automaton.variables.iter() {
        if matches!(var.locality, Locality::Input | Locality::Parameter) {
            continue;
        }
        let signal = ctx
            .renames
            .get(&var.name)
            .cloned()
            .unwrap_or_else(|| mangle_ident(&var.name));
        if let Some(default) = &var.default {
            let text = lower_vhdl(default, &ctx)?;
            match var.var_type {
                VarType::Boolean => {
                    resets.push(format!("{} <= '1' when {} else '0';", signal, text))
                }
                VarType::Real => resets.push(format!("{} <= {};", signal, text)),
            }
        } else {
            resets.push(format!("{} <= {};", signal, vhdl_init(var.var_type)));
        }
    }
    for (target, expr) in automaton.initial_valuations.iter() {
        if let Some(var) = automaton.get_variable(target) {
            let signal = ctx
                .renames
                .get(target)
                .cloned()
                .unwrap_or_else(|| mangle_ident(target));
            let text = lower_vhdl(expr, &ctx)?;
            match var.var_type {
                VarType::Boolean => {
                    resets.push(format!("{} <= '1' when {} else '0';", signal, text))
                }
                VarType::Real => resets.push(format!("{} <= {};", signal, text)),
            }
        }
    }

    // every variable written anywhere gets an `_update` shadow
    let mut shadows: Vec<ShadowCtx> = vec![];
    let mut written: Vec<&str> = vec![];
    for loc in automaton.locations.iter() {
        for (target, _) in loc.flows.iter().chain(loc.updates.iter()) {
            if !written.contains(&target.as_str()) {
                written.push(target);
            }
        }
        for t in loc.transitions.iter() {
            for (target, _) in t.updates.iter() {
                if !written.contains(&target.as_str()) {
                    written.push(target);
                }
            }
        }
    }
    for target in written.iter() {
        if let Some(var) = automaton.get_variable(target) {
            shadows.push(ShadowCtx {
                name: mangle_ident(target),
                ty: vhdl_type(var.var_type),
            });
        }
    }

    let mut arms: Vec<ArmCtx> = vec![];
    for loc in automaton.locations.iter() {
        arms.push(ArmCtx {
            state: state_name(tn, &loc.name),
            lines: render_arm(tn, loc, &ctx)?,
        });
    }

    let states: Vec<String> = automaton
        .locations
        .iter()
        .map(|loc| state_name(tn, &loc.name))
        .collect();

    let rendered = env.get_template("entity").and_then(|t| {
        t.render(context! {
            name => tn,
            generics => generics,
            ports => ports,
            signals => signals,
            states => states.join(", "),
            initial_state => state_name(tn, &automaton.initial_location),
            output_assigns => output_assigns,
            resets => resets,
            shadows => shadows,
            arms => arms,
        })
    });
    match rendered {
        Ok(text) => Ok(text),
        Err(err) => codegen_err!(Generic, format!("{}: {}", automaton.name, err)),
    }
}

fn commit_line(ctx: &VhdlCtx, target: &str) -> String {
    let signal = ctx
        .renames
        .get(target)
        .cloned()
        .unwrap_or_else(|| mangle_ident(target));
    format!("{} <= {}_update;", signal, mangle_ident(target))
}

fn render_arm(tn: &str, loc: &HLocation, ctx: &VhdlCtx) -> Result<Vec<String>> {
    let mut lines: Vec<String> = vec![];

    let mut intra: Vec<String> = vec![];
    let updated: Vec<&str> = loc.updates.iter().map(|(t, _)| t.as_str()).collect();
    for (target, expr) in loc.flows.iter() {
        if updated.contains(&target.as_str()) {
            continue;
        }
        let read = ctx
            .renames
            .get(target)
            .cloned()
            .unwrap_or_else(|| mangle_ident(target));
        let flow = lower_vhdl(expr, ctx)?;
        intra.push(format!(
            "{}_update := ({} + fixed_mul({}, STEP_SIZE_FP));",
            mangle_ident(target),
            read,
            flow
        ));
        intra.push(commit_line(ctx, target));
    }
    for (target, expr) in loc.updates.iter() {
        intra.push(shadow_assign(&mangle_ident(target), expr, ctx)?);
        intra.push(commit_line(ctx, target));
    }

    if loc.transitions.is_empty() {
        if intra.is_empty() {
            lines.push("null;".to_string());
        } else {
            lines.extend(intra);
        }
        return Ok(lines);
    }

    for (i, t) in loc.transitions.iter().enumerate() {
        let guard = lower_vhdl(&t.guard, ctx)?;
        let kw = if i == 0 { "if" } else { "elsif" };
        lines.push(format!("{} {} then", kw, guard));
        for (target, expr) in t.updates.iter() {
            lines.push(format!("    {}", shadow_assign(&mangle_ident(target), expr, ctx)?));
        }
        for (target, _) in t.updates.iter() {
            lines.push(format!("    {}", commit_line(ctx, target)));
        }
        lines.push(format!("    state <= {};", state_name(tn, &t.target)));
    }
    lines.push("else".to_string());
    if intra.is_empty() {
        lines.push("    null;".to_string());
    } else {
        for line in intra {
            lines.push(format!("    {}", line));
        }
    }
    lines.push("end if;".to_string());

    Ok(lines)
}

/// The structural toplevel: one component instantiation per instance,
/// wired port to port.  Only plain variable references and constants
/// are expressible as hardware nets.
fn render_toplevel(project: &Project, network: &Network, def_path: &str) -> Result<String> {
    let tn = mangle_ident(&network.name);

    let mut out = String::new();
    out.push_str("library ieee;\nuse ieee.std_logic_1164.all;\nuse ieee.numeric_std.all;\n\n");
    out.push_str("use work.sim_support.all;\n\n");
    out.push_str(&format!("entity {} is\n    port (\n", tn));
    out.push_str("        clk : in std_logic;\n        rst : in std_logic");
    for var in network.inputs.iter() {
        out.push_str(&format!(
            ";\n        {} : in {}",
            mangle_ident(&var.name),
            vhdl_type(var.var_type)
        ));
    }
    for var in network.outputs.iter() {
        out.push_str(&format!(
            ";\n        {} : out {}",
            mangle_ident(&var.name),
            vhdl_type(var.var_type)
        ));
    }
    out.push_str(&format!("\n    );\nend entity {};\n\n", tn));

    out.push_str(&format!("architecture structural of {} is\n", tn));

    // one signal per automaton output
    for instance in network.instances.iter() {
        if let Some(automaton) = project.automata.get(&join_path(def_path, &instance.of)) {
            for var in automaton.variables_of(Locality::Output) {
                out.push_str(&format!(
                    "    signal {}_{} : {};\n",
                    mangle_ident(&instance.name),
                    mangle_ident(&var.name),
                    vhdl_type(var.var_type)
                ));
            }
        }
    }
    out.push_str("begin\n");

    for instance in network.instances.iter() {
        let automaton = match project.automata.get(&join_path(def_path, &instance.of)) {
            Some(automaton) => automaton,
            None => continue,
        };
        let inst_label = format!("{}_i", mangle_ident(&instance.name));
        out.push_str(&format!(
            "\n    {} : entity work.{}\n",
            inst_label,
            mangle_ident(&instance.of)
        ));

        let params: Vec<(Ident, Value)> = project
            .resolved_params
            .get(&join_path(def_path, &instance.name))
            .cloned()
            .unwrap_or_default();
        if !params.is_empty() {
            let assigns: Result<Vec<String>> = params
                .iter()
                .map(|(name, value)| match value {
                    Value::Real(n) => Ok(format!("{} => {}", macro_case(name), to_fixed(*n))),
                    Value::Bool(_) => codegen_err!(
                        UnsupportedInTarget,
                        format!("{}.{}: boolean parameter", instance.name, name)
                    ),
                })
                .collect();
            out.push_str(&format!(
                "        generic map ({})\n",
                assigns?.join(", ")
            ));
        }

        out.push_str("        port map (\n            clk => clk,\n            rst => rst");
        for var in automaton.variables_of(Locality::Input) {
            let src = input_net(project, network, def_path, &instance.name, &var.name)?;
            out.push_str(&format!(
                ",\n            {} => {}",
                mangle_ident(&var.name),
                src
            ));
        }
        for var in automaton.variables_of(Locality::Output) {
            out.push_str(&format!(
                ",\n            {} => {}_{}",
                mangle_ident(&var.name),
                mangle_ident(&instance.name),
                mangle_ident(&var.name)
            ));
        }
        out.push_str("\n        );\n");
    }

    // network outputs
    for m in network.mappings.iter() {
        if m.dst.instance.is_some() {
            continue;
        }
        let src = net_for_src(network, &m.src, &m.dst.variable)?;
        out.push_str(&format!(
            "\n    {} <= {};\n",
            mangle_ident(&m.dst.variable),
            src
        ));
    }

    out.push_str("end architecture structural;\n");
    Ok(out)
}

fn input_net(
    project: &Project,
    network: &Network,
    def_path: &str,
    instance_name: &str,
    input: &str,
) -> Result<String> {
    let mapping = network.mappings.iter().find(|m| {
        m.dst.instance.as_deref() == Some(instance_name) && m.dst.variable == input
    });
    let mapping = match mapping {
        Some(mapping) => mapping,
        None => {
            // an undriven input idles at zero
            let ty = network
                .get_instance(instance_name)
                .and_then(|instance| {
                    project.automata.get(&join_path(def_path, &instance.of))
                })
                .and_then(|a| a.get_variable(input))
                .map(|v| v.var_type);
            return Ok(match ty {
                Some(VarType::Boolean) => "'0'".to_string(),
                _ => "to_signed(0, 32)".to_string(),
            });
        }
    };
    net_for_src(network, &mapping.src, input)
}

fn net_for_src(network: &Network, src: &str, site: &str) -> Result<String> {
    let expr = match parser::parse(src) {
        Ok(expr) => expr,
        Err(err) => {
            return codegen_err!(Generic, format!("{}: {}", site, err));
        }
    };
    let _ = network;
    match expr {
        // a top-level input keeps its port name; an instance output
        // maps onto its `inst_var` net
        Expr::Var(id, _) => Ok(mangle_ident(&id)),
        Expr::Const(_, n, _) => Ok(format!("to_signed({}, 32)", to_fixed(n))),
        Expr::ConstBool(true, _) => Ok("'1'".to_string()),
        Expr::ConstBool(false, _) => Ok("'0'".to_string()),
        _ => codegen_err!(
            UnsupportedInTarget,
            format!("{}: mapping formulas are not synthesizable", site)
        ),
    }
}

fn render_makefile(sources: &[String]) -> String {
    let mut m = String::new();
    m.push_str("GHDL ?= ghdl\nGHDLFLAGS ?= --std=08\n\n");
    m.push_str(&format!("SOURCES = {}\n\n", sources.join(" ")));
    m.push_str("analyse: $(SOURCES)\n\t$(GHDL) -a $(GHDLFLAGS) $(SOURCES)\n\n");
    m.push_str("clean:\n\trm -f work-obj08.cf\n\n");
    m.push_str(".PHONY: analyse clean\n");
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{render as render_tree, Language};
    use crate::datamodel::{
        Automaton, CodegenConfig, Initial, Instance, Location, Transition,
        Variable,
    };
    use crate::transform::{transform, TransformOptions};

    fn bouncer() -> Network {
        Network {
            name: "Bounce".to_string(),
            inputs: vec![],
            outputs: vec![],
            definitions: vec![(
                "Ball".to_string(),
                Definition::Automaton(Automaton {
                    name: "Ball".to_string(),
                    variables: vec![
                        {
                            let mut v = Variable::new("height", VarType::Real, Locality::Output);
                            v.default = Some("10".to_string());
                            v
                        },
                        {
                            let mut v =
                                Variable::new("rate", VarType::Real, Locality::Parameter);
                            v.default = Some("1".to_string());
                            v
                        },
                    ],
                    locations: vec![
                        Location {
                            name: "falling".to_string(),
                            invariant: Some("height >= 0".to_string()),
                            flows: vec![("height".to_string(), "-rate".to_string())],
                            updates: vec![],
                            transitions: vec![Transition {
                                target: "rising".to_string(),
                                guard: Some("height <= 0".to_string()),
                                updates: vec![],
                            }],
                        },
                        Location {
                            name: "rising".to_string(),
                            invariant: None,
                            flows: vec![("height".to_string(), "rate".to_string())],
                            updates: vec![],
                            transitions: vec![Transition {
                                target: "falling".to_string(),
                                guard: Some("height >= 10".to_string()),
                                updates: vec![],
                            }],
                        },
                    ],
                    functions: vec![],
                    initial: Initial {
                        location: "falling".to_string(),
                        valuations: vec![],
                    },
                }),
            )],
            instances: vec![Instance {
                name: "ball".to_string(),
                of: "Ball".to_string(),
                parameters: vec![("rate".to_string(), "2".to_string())],
            }],
            mappings: vec![],
            codegen: CodegenConfig::default(),
        }
    }

    fn prepared() -> Project {
        let mut project = Project::new(bouncer());
        assert!(!project.has_errors(), "{:?}", project.all_errors());
        transform(&mut project, &TransformOptions::default()).unwrap();
        project
    }

    #[test]
    fn test_entity_layout() {
        let project = prepared();
        let files = render_tree(&project, Language::Vhdl).unwrap();

        for path in ["sim_support.vhd", "ball/ball.vhd", "bounce.vhd", "Makefile"] {
            assert!(files.get(path).is_some(), "missing {}", path);
        }

        let entity = files.get("ball/ball.vhd").unwrap();
        assert!(entity.contains("entity Ball is"));
        assert!(entity.contains("height : out signed(31 downto 0)"));
        assert!(entity.contains("type state_t is (BALL_FALLING, BALL_RISING)"));
        assert!(entity.contains("signal state : state_t := BALL_FALLING;"));
        // shadow variable and commit
        assert!(entity.contains("variable height_update : signed(31 downto 0);"));
        assert!(entity.contains("height_int <= height_update;"));
        // parameters become integer generics with fixed-point defaults
        assert!(entity.contains("RATE : integer := 65536"));
        // euler step in fixed point
        assert!(entity.contains("fixed_mul((-to_signed(RATE, 32)), STEP_SIZE_FP)"));
    }

    #[test]
    fn test_fixed_point_constants() {
        let project = prepared();
        let files = render_tree(&project, Language::Vhdl).unwrap();

        // 0.001 * 2^16 rounds to 66
        let support = files.get("sim_support.vhd").unwrap();
        assert!(support.contains("to_signed(66, 32)"));

        // default height 10 -> 655360
        let entity = files.get("ball/ball.vhd").unwrap();
        assert!(entity.contains("to_signed(655360, 32)"));

        // the instance binding rate = 2 -> 131072 in the generic map
        let top = files.get("bounce.vhd").unwrap();
        assert!(top.contains("generic map (RATE => 131072)"));
    }

    #[test]
    fn test_delay_is_rejected() {
        let mut network = bouncer();
        if let Definition::Automaton(a) = &mut network.definitions[0].1 {
            a.variables[0].delayable_by = Some("0.005".to_string());
        }
        let mut project = Project::new(network);
        transform(&mut project, &TransformOptions::default()).unwrap();
        let err = render_tree(&project, Language::Vhdl).unwrap_err();
        assert_eq!(crate::common::ErrorCode::DelayUnsupported, err.code);
    }

    #[test]
    fn test_nested_networks_must_flatten() {
        let inner = bouncer();
        let network = Network {
            name: "outer".to_string(),
            inputs: vec![],
            outputs: vec![],
            definitions: vec![("Bounce".to_string(), Definition::Network(inner))],
            instances: vec![Instance {
                name: "b".to_string(),
                of: "Bounce".to_string(),
                parameters: vec![],
            }],
            mappings: vec![],
            codegen: CodegenConfig::default(),
        };
        let mut project = Project::new(network);
        transform(&mut project, &TransformOptions::default()).unwrap();
        let err = render_tree(&project, Language::Vhdl).unwrap_err();
        assert_eq!(crate::common::ErrorCode::UnsupportedInTarget, err.code);

        // flattening first makes it renderable
        let mut project = Project::new({
            let mut n = crate::transform::flatten_network(&{
                let inner = bouncer();
                Network {
                    name: "outer".to_string(),
                    inputs: vec![],
                    outputs: vec![],
                    definitions: vec![("Bounce".to_string(), Definition::Network(inner))],
                    instances: vec![Instance {
                        name: "b".to_string(),
                        of: "Bounce".to_string(),
                        parameters: vec![],
                    }],
                    mappings: vec![],
                    codegen: CodegenConfig::default(),
                }
            })
            .unwrap();
            n.name = "outer".to_string();
            n
        });
        transform(&mut project, &TransformOptions::default()).unwrap();
        assert!(render_tree(&project, Language::Vhdl).is_ok());
    }
}
