// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The C back-end: template-driven, like the RTL back-end.
//!
//! Every automaton definition becomes a header/body pair (one pair
//! per instance under compile-time parametrisation, with parameters
//! inlined as `#define`s); every network becomes mapping glue; the
//! root gains a `runnable.c` time loop, a `config.h`, and a Makefile.
//! Nested networks compile into their own `.a` archives.
//!
//! File skeletons are `minijinja` templates; the context carries the
//! pre-lowered statement lines.  Within one tick every right-hand
//! side reads the location's entry valuation: results are computed
//! into `*_update` shadows first and committed together at the end of
//! the phase.

use std::collections::BTreeSet;

use minijinja::{context, Environment};
use serde::Serialize;

use crate::ast::{Expr, Line, Program};
use crate::codegen::util::{
    c_type, indent_unit, lower_expr_c, macro_case, mangle_ident, snake_case, PrefixData,
};
use crate::codegen::FileSet;
use crate::codegen_err;
use crate::common::{Ident, Result};
use crate::datamodel::{
    CodegenConfig, Definition, Locality, Network, ParametrisationMethod, VarType,
};
use crate::eval::Value;
use crate::model::{HAutomaton, HFunction, HLocation, HVariable};
use crate::parser;
use crate::project::{join_path, logging_fields, Project};

const AUTOMATON_H_TEMPLATE: &str = r#"#ifndef {{ guard }}_H
#define {{ guard }}_H

#include <stdbool.h>
{% if defines %}
{%- for d in defines %}
{{ d }}
{%- endfor %}
{% endif %}
enum {{ type }}State {
{%- for s in states %}
{{ i1 }}{{ s }},
{%- endfor %}
};

typedef struct {
{{ i1 }}enum {{ type }}State state;
{%- for f in fields %}
{{ i1 }}{{ f }}
{%- endfor %}
} {{ type }};

void {{ type }}_init({{ type }} *me);
void {{ type }}_run({{ type }} *me);

#endif
"#;

const AUTOMATON_C_TEMPLATE: &str = r#"#include <math.h>
#include <string.h>

#include "../config.h"
#include "{{ header }}"
{% for f in functions %}
{{ f }}
{% endfor %}
void {{ type }}_init({{ type }} *me) {
{{ i1 }}memset(me, 0, sizeof(*me));
{%- for line in init_lines %}
{{ line }}
{%- endfor %}
{{ i1 }}me->state = {{ initial_state }};
}

void {{ type }}_run({{ type }} *me) {
{{ i1 }}bool transitioned = false;
{{ i1 }}unsigned int i;

{{ i1 }}for (i = 0; i < MAX_INTER_TRANSITIONS; i++) {
{{ i2 }}bool fired = false;

{{ i2 }}switch (me->state) {
{%- for arm in transition_arms %}
{{ i2 }}case {{ arm.state }}:
{%- for line in arm.lines %}
{{ line }}
{%- endfor %}
{{ i3 }}break;
{%- endfor %}
{{ i2 }}}

{{ i2 }}if (!fired) {
{{ i3 }}break;
{{ i2 }}}
{{ i2 }}transitioned = true;
{{ i1 }}}

{{ i1 }}if (!transitioned || REQUIRE_ONE_INTRA_TRANSITION) {
{{ i2 }}switch (me->state) {
{%- for arm in flow_arms %}
{{ i2 }}case {{ arm.state }}: {
{%- for line in arm.lines %}
{{ line }}
{%- endfor %}
{{ i3 }}break;
{{ i2 }}}
{%- endfor %}
{{ i2 }}}
{{ i1 }}}
}
"#;

const FUNCTION_TEMPLATE: &str = r#"static {{ ret }} {{ name }}({{ args }}) {
{%- for line in locals %}
{{ line }}
{%- endfor %}
{%- if locals %}
{% endif %}
{%- for line in body %}
{{ line }}
{%- endfor %}
}"#;

const GLUE_H_TEMPLATE: &str = r#"#ifndef {{ guard }}_H
#define {{ guard }}_H

#include <stdbool.h>
{% if includes %}
{%- for inc in includes %}
#include "{{ inc }}"
{%- endfor %}
{% endif %}
typedef struct {
{%- for f in fields %}
{{ i1 }}{{ f }}
{%- endfor %}
} {{ type }};

void {{ type }}_init({{ type }} *me);
void {{ type }}_run({{ type }} *me);

#endif
"#;

const GLUE_C_TEMPLATE: &str = r#"#include <string.h>

#include "config.h"
#include "{{ stem }}.h"

void {{ type }}_init({{ type }} *me) {
{{ i1 }}memset(me, 0, sizeof(*me));
{%- for line in init_lines %}
{{ line }}
{%- endfor %}
}

void {{ type }}_run({{ type }} *me) {
{%- for line in run_lines %}
{{ line }}
{%- endfor %}
}
"#;

const RUNNABLE_TEMPLATE: &str = r#"#include <stdio.h>

#include "config.h"
#include "{{ stem }}.h"

static {{ type }} net;

int main(void) {
{{ i1 }}const unsigned long steps = (unsigned long)(SIMULATION_TIME / STEP_SIZE + 0.5);
{{ i1 }}unsigned long i;

{{ i1 }}{{ type }}_init(&net);

#if LOGGING
{{ i1 }}FILE *log_file = fopen(LOGGING_FILE, "w");
{{ i1 }}if (log_file == NULL) {
{{ i2 }}return 1;
{{ i1 }}}
{{ i1 }}fprintf(log_file, "{{ csv_header }}\n");
#endif

{{ i1 }}for (i = 0; i <= steps; i++) {
#if LOGGING
{{ i2 }}if (i % LOGGING_EVERY == 0) {
{{ i3 }}fprintf(log_file, "{{ row_format }}\n", {{ row_args }});
{{ i2 }}}
#endif
{{ i2 }}{{ type }}_run(&net);
{{ i1 }}}

#if LOGGING
{{ i1 }}fclose(log_file);
#endif
{{ i1 }}return 0;
}
"#;

const CONFIG_TEMPLATE: &str = r#"#ifndef CONFIG_H
#define CONFIG_H

#define STEP_SIZE {{ step_size }}
#define SIMULATION_TIME {{ simulation_time }}
#define MAX_INTER_TRANSITIONS {{ max_inter_transitions }}u
#define REQUIRE_ONE_INTRA_TRANSITION {{ require_one_intra }}
#define LOGGING {{ logging }}
#define LOGGING_FILE "{{ logging_file }}"
#define LOGGING_EVERY {{ logging_every }}u

#endif
"#;

const MAKEFILE_TEMPLATE: &str = r#"CC ?= cc
CFLAGS ?= -O2 -Wall
{%- if is_root %}
LDLIBS = -lm
{%- endif %}

OBJS = {{ objs }}
{%- if libs %}
LIBS = {{ libs }}
{%- endif %}

{% if is_root -%}
runnable: $(OBJS){% if libs %} $(LIBS){% endif %}
	$(CC) $(CFLAGS) -o $@ $(OBJS){% if libs %} $(LIBS){% endif %} $(LDLIBS)
{%- else -%}
lib{{ stem }}.a: $(OBJS){% if libs %} $(LIBS){% endif %}
	ar rcs $@ $(OBJS)
{%- endif %}

%.o: %.c
	$(CC) $(CFLAGS) -c -o $@ $<
{% for child in children %}
{{ child.targets }}:
	$(MAKE) -C {{ child.dir }}
{% endfor %}
clean:
{%- if is_root %}
	rm -f runnable $(OBJS)
{%- else %}
	rm -f lib{{ stem }}.a $(OBJS)
{%- endif %}
{%- for child in children %}
	$(MAKE) -C {{ child.dir }} clean
{%- endfor %}

.PHONY: clean
"#;

#[derive(Serialize)]
struct ArmCtx {
    state: String,
    lines: Vec<String>,
}

#[derive(Serialize)]
struct ChildCtx {
    dir: String,
    targets: String,
}

fn template_env() -> Result<Environment<'static>> {
    let templates = [
        ("automaton_h", AUTOMATON_H_TEMPLATE),
        ("automaton_c", AUTOMATON_C_TEMPLATE),
        ("function", FUNCTION_TEMPLATE),
        ("glue_h", GLUE_H_TEMPLATE),
        ("glue_c", GLUE_C_TEMPLATE),
        ("runnable", RUNNABLE_TEMPLATE),
        ("config", CONFIG_TEMPLATE),
        ("makefile", MAKEFILE_TEMPLATE),
    ];
    let mut env = Environment::new();
    for (name, source) in templates {
        if let Err(err) = env.add_template(name, source) {
            return codegen_err!(Generic, format!("{} template: {}", name, err));
        }
    }
    Ok(env)
}

fn expand(
    env: &Environment,
    name: &str,
    site: &str,
    ctx: minijinja::Value,
) -> Result<String> {
    let rendered = env.get_template(name).and_then(|t| t.render(ctx));
    match rendered {
        Ok(text) => Ok(text),
        Err(err) => codegen_err!(Generic, format!("{}: {}", site, err)),
    }
}

struct Indents {
    i1: String,
    i2: String,
    i3: String,
    i4: String,
}

impl Indents {
    fn new(cfg: &CodegenConfig) -> Self {
        let unit = indent_unit(cfg.indent_size);
        Indents {
            i1: unit.clone(),
            i2: unit.repeat(2),
            i3: unit.repeat(3),
            i4: unit.repeat(4),
        }
    }
}

pub fn render(project: &Project, files: &mut FileSet) -> Result<()> {
    let env = template_env()?;
    render_network(project, &project.datamodel, "", "", &env, files, true)?;
    Ok(())
}

fn c_value(value: &Value) -> String {
    match value {
        Value::Real(n) => format!("{:?}", *n),
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
    }
}

fn c_float(n: f64) -> String {
    format!("{:?}", n)
}

/// What the back-end produced for one network directory, as seen by
/// its parent.
struct NetArtifacts {
    /// static libraries below this directory, relative to it
    libs: Vec<String>,
}

fn render_network(
    project: &Project,
    network: &Network,
    def_path: &str,
    dir: &str,
    env: &Environment,
    files: &mut FileSet,
    is_root: bool,
) -> Result<NetArtifacts> {
    let cfg = project.config();

    let stem = if is_root {
        snake_case(&network.name)
    } else {
        snake_case(def_path.rsplit('.').next().unwrap_or(&network.name))
    };
    let glue_type = if is_root {
        mangle_ident(&network.name)
    } else {
        mangle_ident(def_path)
    };

    let mut objs: Vec<String> = vec![];
    if is_root {
        objs.push("runnable.o".to_string());
    }
    objs.push(format!("{}.o", stem));

    let mut libs: Vec<String> = vec![];
    let mut children: Vec<ChildCtx> = vec![];

    for (key, def) in network.definitions.iter() {
        match def {
            Definition::Automaton(_) => {
                let automaton = match project.automata.get(&join_path(def_path, key)) {
                    Some(automaton) => automaton,
                    None => continue,
                };
                let folder = snake_case(key);
                match cfg.parametrisation {
                    ParametrisationMethod::RunTime => {
                        let tn = mangle_ident(&join_path(def_path, key));
                        let file = snake_case(key);
                        let (h, c) = render_automaton(
                            automaton,
                            &tn,
                            &format!("{}.h", file),
                            cfg,
                            None,
                            env,
                        )?;
                        files.push(format!("{}{}/{}.h", dir, folder, file), h);
                        files.push(format!("{}{}/{}.c", dir, folder, file), c);
                        objs.push(format!("{}/{}.o", folder, file));
                    }
                    ParametrisationMethod::CompileTime => {
                        for instance in network.instances.iter().filter(|i| &i.of == key) {
                            let tn = format!(
                                "{}_{}",
                                mangle_ident(&join_path(def_path, key)),
                                mangle_ident(&instance.name)
                            );
                            let inst_path = join_path(def_path, &instance.name);
                            let params = match project.resolved_params.get(&inst_path) {
                                Some(params) => params,
                                None => {
                                    return codegen_err!(
                                        Generic,
                                        format!("{}: parameters unresolved", inst_path)
                                    );
                                }
                            };
                            let file = snake_case(&instance.name);
                            let (h, c) = render_automaton(
                                automaton,
                                &tn,
                                &format!("{}.h", file),
                                cfg,
                                Some(params),
                                env,
                            )?;
                            files.push(format!("{}{}/{}.h", dir, folder, file), h);
                            files.push(format!("{}{}/{}.c", dir, folder, file), c);
                            objs.push(format!("{}/{}.o", folder, file));
                        }
                    }
                }
            }
            Definition::Network(inner) => {
                let folder = snake_case(key);
                let sub = render_network(
                    project,
                    inner,
                    &join_path(def_path, key),
                    &format!("{}{}/", dir, folder),
                    env,
                    files,
                    false,
                )?;
                let mut reachable = vec![format!("{}/lib{}.a", folder, folder)];
                reachable.extend(sub.libs.iter().map(|lib| format!("{}/{}", folder, lib)));
                libs.extend(reachable.clone());
                children.push(ChildCtx {
                    dir: folder,
                    targets: reachable.join(" "),
                });
            }
        }
    }

    let (glue_h, glue_c) = render_glue(project, network, def_path, &glue_type, &stem, cfg, env)?;
    files.push(format!("{}{}.h", dir, stem), glue_h);
    files.push(format!("{}{}.c", dir, stem), glue_c);

    files.push(format!("{}config.h", dir), render_config_h(cfg, env)?);

    if is_root {
        files.push(
            format!("{}runnable.c", dir),
            render_runnable(project, network, def_path, &glue_type, &stem, cfg, env)?,
        );
    }

    let makefile = expand(
        env,
        "makefile",
        &stem,
        context! {
            is_root => is_root,
            stem => stem,
            objs => objs.join(" "),
            libs => libs.join(" "),
            children => children,
        },
    )?;
    files.push(format!("{}Makefile", dir), makefile);

    Ok(NetArtifacts { libs })
}

fn var_read(prefix: &str, var: &HVariable) -> String {
    match var.delay_len {
        Some(_) => format!("{}{}_buf[{}{}_idx]", prefix, var.name, prefix, var.name),
        None => format!("{}{}", prefix, var.name),
    }
}

fn delayed_read(prefix: &str, var: &HVariable, slots: usize) -> String {
    format!(
        "{}{}_buf[({}{}_idx + 1u) % {}u]",
        prefix, var.name, prefix, var.name, slots
    )
}

fn automaton_pd(
    automaton: &HAutomaton,
    tn: &str,
    params: Option<&[(Ident, Value)]>,
) -> PrefixData {
    let mut pd = PrefixData::scoped("me->", &format!("{}_fn_", snake_case(tn)));
    for var in automaton.variables.iter() {
        if var.delay_len.is_some() {
            pd.substitutions
                .insert(var.name.clone(), var_read("me->", var));
        }
    }
    if let Some(params) = params {
        for (name, _) in params.iter() {
            pd.substitutions.insert(
                name.clone(),
                format!("{}_{}", macro_case(tn), macro_case(name)),
            );
        }
    }
    pd
}

fn state_name(tn: &str, location: &str) -> String {
    format!("{}_{}", macro_case(tn), macro_case(location))
}

fn commit_lines(lines: &mut Vec<String>, indent: &str, var: &HVariable) {
    match var.delay_len {
        Some(slots) => {
            lines.push(format!(
                "{}me->{}_idx = (me->{}_idx + 1u) % {}u;",
                indent, var.name, var.name, slots
            ));
            lines.push(format!(
                "{}me->{}_buf[me->{}_idx] = {}_update;",
                indent, var.name, var.name, var.name
            ));
        }
        None => {
            lines.push(format!("{}me->{} = {}_update;", indent, var.name, var.name));
        }
    }
}

/// Struct member declarations, grouped under locality comments.
fn struct_fields(automaton: &HAutomaton, compile_time: bool) -> Vec<String> {
    let groups: [(Locality, &str); 4] = [
        (Locality::Input, "external inputs"),
        (Locality::Output, "external outputs"),
        (Locality::Internal, "internals"),
        (Locality::Parameter, "parameters"),
    ];

    let mut fields = vec![];
    for (locality, label) in groups.iter() {
        if *locality == Locality::Parameter && compile_time {
            continue;
        }
        let vars: Vec<&HVariable> = automaton.variables_of(*locality).collect();
        if vars.is_empty() {
            continue;
        }
        fields.push(format!("/* {} */", label));
        for var in vars {
            match var.delay_len {
                Some(slots) => {
                    fields.push(format!("double {}_buf[{}];", var.name, slots));
                    fields.push(format!("unsigned int {}_idx;", var.name));
                }
                None => {
                    fields.push(format!("{} {};", c_type(var.var_type), var.name));
                }
            }
        }
    }
    fields
}

fn init_lines(
    automaton: &HAutomaton,
    pd: &PrefixData,
    compile_time: bool,
    ind: &Indents,
) -> Vec<String> {
    let mut lines = vec![];
    for var in automaton.variables.iter() {
        if compile_time && var.locality == Locality::Parameter {
            continue;
        }
        if let Some(default) = &var.default {
            let text = lower_expr_c(default, pd);
            match var.delay_len {
                Some(_) => lines.push(format!("{}me->{}_buf[0] = {};", ind.i1, var.name, text)),
                None => lines.push(format!("{}me->{} = {};", ind.i1, var.name, text)),
            }
        }
    }
    for (target, expr) in automaton.initial_valuations.iter() {
        let text = lower_expr_c(expr, pd);
        match automaton.get_variable(target).and_then(|v| v.delay_len) {
            Some(_) => lines.push(format!("{}me->{}_buf[0] = {};", ind.i1, target, text)),
            None => lines.push(format!("{}me->{} = {};", ind.i1, target, text)),
        }
    }
    lines
}

fn transition_arm(
    automaton: &HAutomaton,
    tn: &str,
    loc: &HLocation,
    pd: &PrefixData,
    ind: &Indents,
) -> ArmCtx {
    let mut lines = vec![];
    let mut first = true;
    for t in loc.transitions.iter() {
        let kw = if first { "if" } else { "else if" };
        first = false;
        lines.push(format!(
            "{}{} ({}) {{",
            ind.i3,
            kw,
            lower_expr_c(&t.guard, pd)
        ));
        for (target, expr) in t.updates.iter() {
            let ty = automaton
                .get_variable(target)
                .map(|v| c_type(v.var_type))
                .unwrap_or("double");
            lines.push(format!(
                "{}{} {}_update = {};",
                ind.i4,
                ty,
                target,
                lower_expr_c(expr, pd)
            ));
        }
        for (target, _) in t.updates.iter() {
            if let Some(var) = automaton.get_variable(target) {
                commit_lines(&mut lines, &ind.i4, var);
            }
        }
        lines.push(format!(
            "{}me->state = {};",
            ind.i4,
            state_name(tn, &t.target)
        ));
        lines.push(format!("{}fired = true;", ind.i4));
        lines.push(format!("{}}}", ind.i3));
    }
    ArmCtx {
        state: state_name(tn, &loc.name),
        lines,
    }
}

fn flow_arm(
    automaton: &HAutomaton,
    tn: &str,
    loc: &HLocation,
    pd: &PrefixData,
    ind: &Indents,
) -> ArmCtx {
    let mut lines = vec![];

    // the discrete update wins when a variable is both flowed and
    // updated: both right-hand sides read the entry valuation
    let updated: Vec<&str> = loc.updates.iter().map(|(t, _)| t.as_str()).collect();
    let mut committed: Vec<&HVariable> = vec![];

    for (target, expr) in loc.flows.iter() {
        if updated.contains(&target.as_str()) {
            continue;
        }
        let var = match automaton.get_variable(target) {
            Some(var) => var,
            None => continue,
        };
        lines.push(format!(
            "{}double {}_update = {} + ({}) * STEP_SIZE;",
            ind.i3,
            target,
            var_read("me->", var),
            lower_expr_c(expr, pd)
        ));
        committed.push(var);
    }
    for (target, expr) in loc.updates.iter() {
        let var = match automaton.get_variable(target) {
            Some(var) => var,
            None => continue,
        };
        lines.push(format!(
            "{}{} {}_update = {};",
            ind.i3,
            c_type(var.var_type),
            target,
            lower_expr_c(expr, pd)
        ));
        committed.push(var);
    }
    // an untouched delayed variable still pushes its current value so
    // delayed reads stay one slot per tick
    for var in automaton.variables.iter() {
        if var.delay_len.is_some() && !committed.iter().any(|v| v.name == var.name) {
            lines.push(format!(
                "{}double {}_update = {};",
                ind.i3,
                var.name,
                var_read("me->", var)
            ));
            committed.push(var);
        }
    }

    for var in committed {
        commit_lines(&mut lines, &ind.i3, var);
    }

    ArmCtx {
        state: state_name(tn, &loc.name),
        lines,
    }
}

fn render_automaton(
    automaton: &HAutomaton,
    tn: &str,
    header_file: &str,
    cfg: &CodegenConfig,
    params: Option<&[(Ident, Value)]>,
    env: &Environment,
) -> Result<(String, String)> {
    let ind = Indents::new(cfg);
    let pd = automaton_pd(automaton, tn, params);
    let compile_time = params.is_some();

    let mut defines: Vec<String> = vec![];
    if let Some(params) = params {
        for (name, value) in params.iter() {
            defines.push(format!(
                "#define {}_{} {}",
                macro_case(tn),
                macro_case(name),
                c_value(value)
            ));
        }
    }

    let states: Vec<String> = automaton
        .locations
        .iter()
        .map(|loc| state_name(tn, &loc.name))
        .collect();

    let h = expand(
        env,
        "automaton_h",
        tn,
        context! {
            guard => macro_case(tn),
            type => tn,
            i1 => ind.i1,
            defines => defines,
            states => states,
            fields => struct_fields(automaton, compile_time),
        },
    )?;

    let mut functions: Vec<String> = vec![];
    for func in automaton.functions.iter() {
        functions.push(render_function(tn, func, &ind, env)?);
    }

    let transition_arms: Vec<ArmCtx> = automaton
        .locations
        .iter()
        .map(|loc| transition_arm(automaton, tn, loc, &pd, &ind))
        .collect();
    let flow_arms: Vec<ArmCtx> = automaton
        .locations
        .iter()
        .map(|loc| flow_arm(automaton, tn, loc, &pd, &ind))
        .collect();

    let c = expand(
        env,
        "automaton_c",
        tn,
        context! {
            type => tn,
            header => header_file,
            i1 => ind.i1,
            i2 => ind.i2,
            i3 => ind.i3,
            functions => functions,
            init_lines => init_lines(automaton, &pd, compile_time, &ind),
            initial_state => state_name(tn, &automaton.initial_location),
            transition_arms => transition_arms,
            flow_arms => flow_arms,
        },
    )?;

    Ok((h, c))
}

fn program_lines(prog: &Program, pd: &PrefixData, unit: &str, depth: usize) -> Vec<String> {
    let indent = unit.repeat(depth);
    let mut out = vec![];
    for line in prog.lines.iter() {
        match line {
            Line::Stmt(e) => out.push(format!("{}{};", indent, lower_expr_c(e, pd))),
            Line::Assign(target, e) => {
                out.push(format!("{}{} = {};", indent, target, lower_expr_c(e, pd)))
            }
            Line::Return(e) => out.push(format!("{}return {};", indent, lower_expr_c(e, pd))),
            Line::If(cond, body) => {
                out.push(format!("{}if ({}) {{", indent, lower_expr_c(cond, pd)));
                out.extend(program_lines(body, pd, unit, depth + 1));
                out.push(format!("{}}}", indent));
            }
            Line::ElseIf(cond, body) => {
                out.push(format!("{}else if ({}) {{", indent, lower_expr_c(cond, pd)));
                out.extend(program_lines(body, pd, unit, depth + 1));
                out.push(format!("{}}}", indent));
            }
            Line::Else(body) => {
                out.push(format!("{}else {{", indent));
                out.extend(program_lines(body, pd, unit, depth + 1));
                out.push(format!("{}}}", indent));
            }
        }
    }
    out
}

fn render_function(
    tn: &str,
    func: &HFunction,
    ind: &Indents,
    env: &Environment,
) -> Result<String> {
    let ret = func.returns.map(c_type).unwrap_or("void");
    let fn_prefix = format!("{}_fn_", snake_case(tn));
    let args: Vec<String> = func
        .inputs
        .iter()
        .map(|(name, ty)| format!("{} {}", c_type(*ty), name))
        .collect();
    let args = if args.is_empty() {
        "void".to_string()
    } else {
        args.join(", ")
    };

    let mut locals: Vec<(&Ident, &VarType)> = func
        .locals
        .iter()
        .filter(|(name, _)| !func.inputs.iter().any(|(input, _)| &input == name))
        .collect();
    locals.sort_by_key(|(name, _)| name.as_str());
    let locals: Vec<String> = locals
        .iter()
        .map(|(name, ty)| format!("{}{} {};", ind.i1, c_type(**ty), name))
        .collect();

    let pd = PrefixData::scoped("", &fn_prefix);
    let name = format!("{}{}", fn_prefix, snake_case(&func.name));
    expand(
        env,
        "function",
        &name,
        context! {
            ret => ret,
            name => name,
            args => args,
            locals => locals,
            body => program_lines(&func.body, &pd, &ind.i1, 1),
        },
    )
}

/// The C type and header implementing an instance of this network.
fn instance_binding(
    network: &Network,
    def_path: &str,
    instance: &crate::datamodel::Instance,
    cfg: &CodegenConfig,
) -> Option<(String, String)> {
    match network.get_definition(&instance.of)? {
        Definition::Automaton(_) => {
            let folder = snake_case(&instance.of);
            match cfg.parametrisation {
                ParametrisationMethod::RunTime => Some((
                    mangle_ident(&join_path(def_path, &instance.of)),
                    format!("{}/{}.h", folder, snake_case(&instance.of)),
                )),
                ParametrisationMethod::CompileTime => Some((
                    format!(
                        "{}_{}",
                        mangle_ident(&join_path(def_path, &instance.of)),
                        mangle_ident(&instance.name)
                    ),
                    format!("{}/{}.h", folder, snake_case(&instance.name)),
                )),
            }
        }
        Definition::Network(_) => {
            let folder = snake_case(&instance.of);
            Some((
                mangle_ident(&join_path(def_path, &instance.of)),
                format!("{}/{}.h", folder, folder),
            ))
        }
    }
}

fn network_pd(project: &Project, network: &Network, def_path: &str) -> PrefixData {
    let mut pd = PrefixData::scoped("me->", "");
    for instance in network.instances.iter() {
        let field = mangle_ident(&instance.name);
        match network.get_definition(&instance.of) {
            Some(Definition::Automaton(_)) => {
                if let Some(a) = project.automata.get(&join_path(def_path, &instance.of)) {
                    for var in a.variables_of(Locality::Output) {
                        let access = match var.delay_len {
                            Some(slots) => {
                                delayed_read(&format!("me->{}.", field), var, slots)
                            }
                            None => format!("me->{}.{}", field, var.name),
                        };
                        pd.substitutions
                            .insert(format!("{}.{}", instance.name, var.name), access);
                    }
                }
            }
            Some(Definition::Network(inner)) => {
                for var in inner.outputs.iter() {
                    pd.substitutions.insert(
                        format!("{}.{}", instance.name, var.name),
                        format!("me->{}.{}", field, var.name),
                    );
                }
            }
            None => {}
        }
    }
    pd
}

fn instance_input_type(
    project: &Project,
    network: &Network,
    def_path: &str,
    instance_name: &str,
    var: &str,
) -> Option<VarType> {
    let instance = network.get_instance(instance_name)?;
    match network.get_definition(&instance.of)? {
        Definition::Automaton(_) => project
            .automata
            .get(&join_path(def_path, &instance.of))?
            .get_variable(var)
            .map(|v| v.var_type),
        Definition::Network(inner) => inner
            .inputs
            .iter()
            .find(|v| v.name == var)
            .map(|v| v.var_type),
    }
}

fn glue_fields(
    network: &Network,
    def_path: &str,
    cfg: &CodegenConfig,
) -> (Vec<String>, BTreeSet<String>) {
    let mut includes: BTreeSet<String> = BTreeSet::new();
    let mut fields: Vec<String> = vec![];

    if !network.inputs.is_empty() {
        fields.push("/* network inputs */".to_string());
        for var in network.inputs.iter() {
            fields.push(format!("{} {};", c_type(var.var_type), var.name));
        }
    }
    if !network.outputs.is_empty() {
        fields.push("/* network outputs */".to_string());
        for var in network.outputs.iter() {
            fields.push(format!("{} {};", c_type(var.var_type), var.name));
        }
    }
    for instance in network.instances.iter() {
        if let Some((tn, header)) = instance_binding(network, def_path, instance, cfg) {
            includes.insert(header);
            fields.push(format!("{} {};", tn, mangle_ident(&instance.name)));
        }
    }

    (fields, includes)
}

fn glue_init_lines(
    project: &Project,
    network: &Network,
    def_path: &str,
    cfg: &CodegenConfig,
    ind: &Indents,
) -> Vec<String> {
    let mut lines = vec![];
    for instance in network.instances.iter() {
        let (tn, field) = match instance_binding(network, def_path, instance, cfg) {
            Some((tn, _)) => (tn, mangle_ident(&instance.name)),
            None => continue,
        };
        lines.push(format!("{}{}_init(&me->{});", ind.i1, tn, field));
        if cfg.parametrisation == ParametrisationMethod::RunTime {
            if let Some(params) = project
                .resolved_params
                .get(&join_path(def_path, &instance.name))
            {
                for (name, value) in params.iter() {
                    lines.push(format!(
                        "{}me->{}.{} = {};",
                        ind.i1,
                        field,
                        name,
                        c_value(value)
                    ));
                }
            }
        }
    }
    lines
}

fn glue_run_lines(
    project: &Project,
    network: &Network,
    def_path: &str,
    cfg: &CodegenConfig,
    pd: &PrefixData,
    ind: &Indents,
) -> Result<Vec<String>> {
    let mut lines = vec![];

    // drive instance inputs from the mapping glue; shadows first so
    // every source reads this tick's entry valuation
    let input_mappings: Vec<_> = network
        .mappings
        .iter()
        .filter(|m| m.dst.instance.is_some())
        .collect();
    if !input_mappings.is_empty() {
        for m in input_mappings.iter() {
            let instance_name = m.dst.instance.as_deref().unwrap_or("");
            let ty =
                instance_input_type(project, network, def_path, instance_name, &m.dst.variable)
                    .map(c_type)
                    .unwrap_or("double");
            let expr = parse_mapping_src(network, &m.src)?;
            lines.push(format!(
                "{}{} {}_{}_update = {};",
                ind.i1,
                ty,
                mangle_ident(instance_name),
                m.dst.variable,
                lower_expr_c(&expr, pd)
            ));
        }
        for m in input_mappings.iter() {
            let field = mangle_ident(m.dst.instance.as_deref().unwrap_or(""));
            lines.push(format!(
                "{}me->{}.{} = {}_{}_update;",
                ind.i1, field, m.dst.variable, field, m.dst.variable
            ));
        }
        lines.push(String::new());
    }

    for instance in network.instances.iter() {
        if let Some((tn, _)) = instance_binding(network, def_path, instance, cfg) {
            lines.push(format!(
                "{}{}_run(&me->{});",
                ind.i1,
                tn,
                mangle_ident(&instance.name)
            ));
        }
    }

    let output_mappings: Vec<_> = network
        .mappings
        .iter()
        .filter(|m| m.dst.instance.is_none())
        .collect();
    if !output_mappings.is_empty() {
        lines.push(String::new());
        for m in output_mappings.iter() {
            let expr = parse_mapping_src(network, &m.src)?;
            lines.push(format!(
                "{}me->{} = {};",
                ind.i1,
                m.dst.variable,
                lower_expr_c(&expr, pd)
            ));
        }
    }

    Ok(lines)
}

fn render_glue(
    project: &Project,
    network: &Network,
    def_path: &str,
    glue_type: &str,
    stem: &str,
    cfg: &CodegenConfig,
    env: &Environment,
) -> Result<(String, String)> {
    let ind = Indents::new(cfg);
    let pd = network_pd(project, network, def_path);
    let (fields, includes) = glue_fields(network, def_path, cfg);

    let h = expand(
        env,
        "glue_h",
        stem,
        context! {
            guard => macro_case(stem),
            type => glue_type,
            i1 => ind.i1,
            includes => includes.iter().collect::<Vec<_>>(),
            fields => fields,
        },
    )?;

    let c = expand(
        env,
        "glue_c",
        stem,
        context! {
            stem => stem,
            type => glue_type,
            i1 => ind.i1,
            init_lines => glue_init_lines(project, network, def_path, cfg, &ind),
            run_lines => glue_run_lines(project, network, def_path, cfg, &pd, &ind)?,
        },
    )?;

    Ok((h, c))
}

fn parse_mapping_src(network: &Network, src: &str) -> Result<Expr> {
    match parser::parse(src) {
        Ok(expr) => Ok(expr),
        Err(err) => codegen_err!(Generic, format!("{}: {}: {}", network.name, src, err)),
    }
}

fn field_accessor(
    project: &Project,
    network: &Network,
    def_path: &str,
    field: &str,
) -> Option<String> {
    for instance in network.instances.iter() {
        let prefix = format!("{}.", instance.name);
        let var = match field.strip_prefix(&prefix) {
            Some(var) if !var.contains('.') => var,
            _ => continue,
        };
        let accessor = match network.get_definition(&instance.of)? {
            Definition::Automaton(_) => {
                let a = project.automata.get(&join_path(def_path, &instance.of))?;
                let v = a.get_variable(var)?;
                var_read(&format!("net.{}.", mangle_ident(&instance.name)), v)
            }
            Definition::Network(inner) => {
                inner.outputs.iter().find(|v| v.name == var)?;
                format!("net.{}.{}", mangle_ident(&instance.name), var)
            }
        };
        return Some(accessor);
    }
    None
}

fn render_runnable(
    project: &Project,
    network: &Network,
    def_path: &str,
    glue_type: &str,
    stem: &str,
    cfg: &CodegenConfig,
    env: &Environment,
) -> Result<String> {
    let ind = Indents::new(cfg);

    let fields = logging_fields(network);
    let mut accessors: Vec<String> = vec![];
    for field in fields.iter() {
        match field_accessor(project, network, def_path, field) {
            Some(accessor) => accessors.push(accessor),
            None => {
                return codegen_err!(Generic, format!("logging field {}", field));
            }
        }
    }

    let mut csv_header = String::from("time");
    for field in fields.iter() {
        csv_header.push(',');
        csv_header.push_str(field);
    }
    let mut row_format = String::from("%f");
    let mut row_args = String::from("i * STEP_SIZE");
    for accessor in accessors.iter() {
        row_format.push_str(",%f");
        row_args.push_str(&format!(", (double)({})", accessor));
    }

    expand(
        env,
        "runnable",
        stem,
        context! {
            stem => stem,
            type => glue_type,
            i1 => ind.i1,
            i2 => ind.i2,
            i3 => ind.i3,
            csv_header => csv_header,
            row_format => row_format,
            row_args => row_args,
        },
    )
}

fn render_config_h(cfg: &CodegenConfig, env: &Environment) -> Result<String> {
    let logging_every = (cfg.logging_interval() / cfg.step_size).round().max(1.0) as u64;

    expand(
        env,
        "config",
        "config.h",
        context! {
            step_size => c_float(cfg.step_size),
            simulation_time => c_float(cfg.simulation_time),
            max_inter_transitions => cfg.max_inter_transitions,
            require_one_intra => if cfg.require_one_intra_transition { 1 } else { 0 },
            logging => if cfg.logging.enabled { 1 } else { 0 },
            logging_file => cfg.logging.file,
            logging_every => logging_every,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{render as render_tree, Language};
    use crate::datamodel::{
        Automaton, Initial, Instance, Location, Mapping, Port, Transition, Variable,
    };
    use crate::transform::{transform, TransformOptions};

    fn train() -> Automaton {
        Automaton {
            name: "Train".to_string(),
            variables: vec![
                {
                    let mut v = Variable::new("pos", VarType::Real, Locality::Output);
                    v.default = Some("0".to_string());
                    v
                },
                {
                    let mut v =
                        Variable::new("trainSpeed", VarType::Real, Locality::Parameter);
                    v.default = Some("5".to_string());
                    v
                },
            ],
            locations: vec![Location {
                name: "moving".to_string(),
                invariant: Some("pos <= 25".to_string()),
                flows: vec![("pos".to_string(), "trainSpeed".to_string())],
                updates: vec![],
                transitions: vec![Transition {
                    target: "moving".to_string(),
                    guard: Some("pos >= 25".to_string()),
                    updates: vec![("pos".to_string(), "0".to_string())],
                }],
            }],
            functions: vec![],
            initial: Initial {
                location: "moving".to_string(),
                valuations: vec![("pos".to_string(), "0".to_string())],
            },
        }
    }

    fn gate() -> Automaton {
        Automaton {
            name: "Gate".to_string(),
            variables: vec![
                Variable::new("trainPos", VarType::Real, Locality::Input),
                {
                    let mut v = Variable::new("closed", VarType::Boolean, Locality::Output);
                    v.default = Some("false".to_string());
                    v
                },
            ],
            locations: vec![Location {
                name: "watching".to_string(),
                invariant: None,
                flows: vec![],
                updates: vec![(
                    "closed".to_string(),
                    "trainPos >= 20 && trainPos <= 25".to_string(),
                )],
                transitions: vec![],
            }],
            functions: vec![],
            initial: Initial {
                location: "watching".to_string(),
                valuations: vec![],
            },
        }
    }

    fn train_gate(parametrisation: ParametrisationMethod) -> Network {
        let mut codegen = CodegenConfig::default();
        codegen.simulation_time = 100.0;
        codegen.parametrisation = parametrisation;
        Network {
            name: "TrainGate".to_string(),
            inputs: vec![],
            outputs: vec![],
            definitions: vec![
                ("Train".to_string(), Definition::Automaton(train())),
                ("Gate".to_string(), Definition::Automaton(gate())),
            ],
            instances: vec![
                Instance {
                    name: "train".to_string(),
                    of: "Train".to_string(),
                    parameters: vec![("trainSpeed".to_string(), "10".to_string())],
                },
                Instance {
                    name: "gate".to_string(),
                    of: "Gate".to_string(),
                    parameters: vec![],
                },
            ],
            mappings: vec![Mapping {
                dst: Port::parse("gate.trainPos"),
                src: "train.pos".to_string(),
            }],
            codegen,
        }
    }

    fn prepared(parametrisation: ParametrisationMethod) -> Project {
        let mut project = Project::new(train_gate(parametrisation));
        assert!(!project.has_errors(), "{:?}", project.all_errors());
        transform(&mut project, &TransformOptions::default()).unwrap();
        project
    }

    #[test]
    fn test_run_time_layout() {
        let project = prepared(ParametrisationMethod::RunTime);
        let files = render_tree(&project, Language::C).unwrap();

        for path in [
            "config.h",
            "Makefile",
            "runnable.c",
            "train_gate.h",
            "train_gate.c",
            "train/train.h",
            "train/train.c",
            "gate/gate.h",
            "gate/gate.c",
        ] {
            assert!(files.get(path).is_some(), "missing {}", path);
        }

        // run-time parameters live in the struct and are set at init
        let header = files.get("train/train.h").unwrap();
        assert!(header.contains("double trainSpeed;"));
        let glue = files.get("train_gate.c").unwrap();
        assert!(glue.contains("me->train.trainSpeed = 10.0;"));

        // euler step against the configured step size
        let body = files.get("train/train.c").unwrap();
        assert!(body.contains("me->pos + (me->trainSpeed) * STEP_SIZE"));
        assert!(body.contains("me->state = TRAIN_MOVING;"));

        // mapping glue drives the gate input from the train output
        assert!(glue.contains("me->gate.trainPos = gate_trainPos_update;"));
    }

    #[test]
    fn test_compile_time_layout() {
        // a second Train instance shows the one-pair-per-instance layout
        let mut network = train_gate(ParametrisationMethod::CompileTime);
        network.instances.push(Instance {
            name: "local".to_string(),
            of: "Train".to_string(),
            parameters: vec![("trainSpeed".to_string(), "2".to_string())],
        });
        let mut project = Project::new(network);
        assert!(!project.has_errors(), "{:?}", project.all_errors());
        transform(&mut project, &TransformOptions::default()).unwrap();
        let files = render_tree(&project, Language::C).unwrap();

        // one source pair per instance, under a folder per definition
        for path in ["train/train.h", "train/train.c", "train/local.h", "train/local.c"] {
            assert!(files.get(path).is_some(), "missing {}", path);
        }

        // parameters are inlined as #defines; the struct carries none
        let header = files.get("train/train.h").unwrap();
        assert!(header.contains("#define TRAIN_TRAIN_TRAIN_SPEED 10.0"));
        assert!(!header.contains("double trainSpeed;"));
        let local = files.get("train/local.h").unwrap();
        assert!(local.contains("#define TRAIN_LOCAL_TRAIN_SPEED 2.0"));

        // each instance gets its own struct type
        assert!(header.contains("} Train_train;"));
        assert!(local.contains("} Train_local;"));
        let body = files.get("train/train.c").unwrap();
        assert!(body.contains("(TRAIN_TRAIN_TRAIN_SPEED) * STEP_SIZE"));
    }

    #[test]
    fn test_config_and_logging() {
        let project = prepared(ParametrisationMethod::RunTime);
        let files = render_tree(&project, Language::C).unwrap();

        let config = files.get("config.h").unwrap();
        assert!(config.contains("#define STEP_SIZE 0.001"));
        assert!(config.contains("#define SIMULATION_TIME 100.0"));
        assert!(config.contains("#define MAX_INTER_TRANSITIONS 1u"));
        assert!(config.contains("#define LOGGING 1"));
        assert!(config.contains("#define LOGGING_FILE \"out.csv\""));

        // default logging fields: every output of every instance, in
        // declaration order
        let runnable = files.get("runnable.c").unwrap();
        assert!(runnable.contains("\"time,train.pos,gate.closed\\n\""));
        assert!(runnable.contains("(double)(net.train.pos)"));
    }

    #[test]
    fn test_makefile() {
        let project = prepared(ParametrisationMethod::RunTime);
        let files = render_tree(&project, Language::C).unwrap();
        let makefile = files.get("Makefile").unwrap();
        assert!(makefile.contains("runnable: $(OBJS)"));
        assert!(makefile.contains("train/train.o"));
        assert!(makefile.contains("gate/gate.o"));
        assert!(makefile.contains("clean:"));
        assert!(makefile.contains("LDLIBS = -lm"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let project = prepared(ParametrisationMethod::RunTime);
        let first = render_tree(&project, Language::C).unwrap();
        let second = render_tree(&project, Language::C).unwrap();
        assert_eq!(first, second);
    }
}
