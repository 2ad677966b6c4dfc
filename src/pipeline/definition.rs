// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Pipeline definition files
//!
//! A YAML description of a pipeline expression plus its invocation options:
//!
//! ```yaml
//! name: count-sources
//! options:
//!   capture_stdout: true
//! pipeline:
//!   pipe:
//!     - stage: { program: grep, args: ["fn ", src], options: { r: true, include: "*.rs" } }
//!     - stage: { program: wc, options: { l: true } }
//! ```
//!
//! Loading only checks the schema. [`PipelineDefinition::to_node`] builds
//! the expression through the regular combinators, so every construction
//! check applies to definition files too.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::args::{ArgGroup, ArgValue, ArgumentSpec};
use crate::env::Environment;
use crate::errors::{ConstructionError, PipeshError, PipeshResult};
use crate::pipeline::executor::InvokeOptions;
use crate::pipeline::node::{PipelineNode, RedirectTarget, StreamKind};
use crate::pipeline::stage::Stage;

/// Pipeline definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Definition format version
    #[serde(default = "default_version")]
    pub version: String,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub options: OptionsDefinition,

    /// Environment overrides; `null` unsets a variable
    #[serde(default)]
    pub env: BTreeMap<String, Option<String>>,

    /// Argument specs by program name
    #[serde(default)]
    pub specs: HashMap<String, ArgumentSpec>,

    /// Node variants are written as single-key maps (`pipe: [...]`)
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub pipeline: NodeDefinition,
}

fn default_version() -> String {
    "1".to_string()
}

/// Invocation options as written in a definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsDefinition {
    pub share_signal_group: bool,
    pub poll_interval_ms: u64,
    pub timeout_ms: Option<u64>,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
    pub working_dir: Option<PathBuf>,
    /// Text written to the first stage's stdin
    pub input: Option<String>,
}

impl Default for OptionsDefinition {
    fn default() -> Self {
        Self {
            share_signal_group: false,
            poll_interval_ms: 50,
            timeout_ms: None,
            capture_stdout: false,
            capture_stderr: false,
            working_dir: None,
            input: None,
        }
    }
}

/// One node of the pipeline tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeDefinition {
    Stage(StageDefinition),
    /// Left to right: `a | b | c`
    Pipe(Vec<NodeDefinition>),
    /// Left to right: the stderr of each feeds the next
    ErrorPipe(Vec<NodeDefinition>),
    Redirect(RedirectDefinition),
    Suppress(Box<NodeDefinition>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    pub program: String,

    /// Positional arguments
    #[serde(default)]
    pub args: Vec<serde_yaml::Value>,

    /// Named options, encoded in the order written
    #[serde(default)]
    pub options: serde_yaml::Mapping,

    /// Literal argument text, split on whitespace
    #[serde(default)]
    pub literal: Option<String>,

    /// Argument spec for this stage only
    #[serde(default)]
    pub spec: Option<ArgumentSpec>,

    /// Extra exit codes treated as success; empty catches every exit code
    #[serde(default)]
    pub catch: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectDefinition {
    pub node: Box<NodeDefinition>,

    #[serde(default)]
    pub stream: StreamKind,

    /// File path; omitted means the null device
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub append: bool,
}

impl PipelineDefinition {
    /// Load a definition from a YAML file
    pub fn from_file(path: &Path) -> PipeshResult<Self> {
        if !path.exists() {
            return Err(PipeshError::DefinitionNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| PipeshError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_yaml(&content)
    }

    /// Parse a definition from a YAML string
    pub fn from_yaml(yaml: &str) -> PipeshResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Serialize the definition to YAML
    pub fn to_yaml(&self) -> PipeshResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Build the pipeline expression
    pub fn to_node(&self) -> PipeshResult<PipelineNode> {
        let specs: HashMap<&str, Arc<ArgumentSpec>> = self
            .specs
            .iter()
            .map(|(program, spec)| (program.as_str(), Arc::new(spec.clone())))
            .collect();
        build_node(&self.pipeline, &specs)
    }

    /// Invocation options described by the `options` and `env` sections
    pub fn invoke_options(&self) -> InvokeOptions {
        let options = &self.options;
        let mut env = Environment::new();
        for (name, value) in &self.env {
            match value {
                Some(value) => env.set(name, value),
                None => env.unset(name),
            }
        }

        InvokeOptions {
            share_signal_group: options.share_signal_group,
            poll_interval: Duration::from_millis(options.poll_interval_ms),
            timeout: options.timeout_ms.map(Duration::from_millis),
            capture_stdout: options.capture_stdout,
            capture_stderr: options.capture_stderr,
            working_dir: options.working_dir.clone(),
            env,
            input: options.input.clone().map(String::into_bytes),
            cancel: None,
        }
    }

    /// Programs named by the stages, in launch order
    pub fn programs(&self) -> Vec<&str> {
        let mut programs = Vec::new();
        collect_programs(&self.pipeline, &mut programs);
        programs
    }
}

fn collect_programs<'a>(node: &'a NodeDefinition, out: &mut Vec<&'a str>) {
    match node {
        NodeDefinition::Stage(stage) => out.push(&stage.program),
        NodeDefinition::Pipe(nodes) | NodeDefinition::ErrorPipe(nodes) => {
            for node in nodes {
                collect_programs(node, out);
            }
        }
        NodeDefinition::Redirect(redirect) => collect_programs(&redirect.node, out),
        NodeDefinition::Suppress(inner) => collect_programs(inner, out),
    }
}

fn build_node(node: &NodeDefinition, specs: &HashMap<&str, Arc<ArgumentSpec>>) -> PipeshResult<PipelineNode> {
    match node {
        NodeDefinition::Stage(stage) => Ok(build_stage(stage, specs)?.into()),
        NodeDefinition::Pipe(nodes) => fold_chain(nodes, specs, "pipe", |a, b| a.pipe(b)),
        NodeDefinition::ErrorPipe(nodes) => fold_chain(nodes, specs, "error_pipe", |a, b| a.error_pipe(b)),
        NodeDefinition::Redirect(redirect) => {
            let inner = build_node(&redirect.node, specs)?;
            let target = redirect
                .path
                .clone()
                .map_or(RedirectTarget::Null, RedirectTarget::Path);
            let node = match redirect.stream {
                StreamKind::Stdout => inner.redirect(target, redirect.append)?,
                StreamKind::Stderr => inner.redirect_stderr(target, redirect.append)?,
                StreamKind::Stdin => inner.redirect_stdin(target)?,
            };
            Ok(node)
        }
        NodeDefinition::Suppress(inner) => Ok(build_node(inner, specs)?.suppress()),
    }
}

fn fold_chain(
    nodes: &[NodeDefinition],
    specs: &HashMap<&str, Arc<ArgumentSpec>>,
    kind: &str,
    join: fn(PipelineNode, PipelineNode) -> Result<PipelineNode, ConstructionError>,
) -> PipeshResult<PipelineNode> {
    let mut nodes = nodes.iter();
    let first = nodes.next().ok_or_else(|| ConstructionError::InvalidDefinition {
        reason: format!("'{}' needs at least one node", kind),
        help: Some("List the stages to connect, left to right".into()),
    })?;

    let mut chain = build_node(first, specs)?;
    for node in nodes {
        chain = join(chain, build_node(node, specs)?)?;
    }
    Ok(chain)
}

fn build_stage(definition: &StageDefinition, specs: &HashMap<&str, Arc<ArgumentSpec>>) -> PipeshResult<Stage> {
    let mut stage = match (&definition.spec, specs.get(definition.program.as_str())) {
        (Some(spec), _) => Stage::with_spec(&definition.program, spec.clone()),
        (None, Some(shared)) => Stage::with_shared_spec(&definition.program, shared.clone()),
        (None, None) => Stage::new(&definition.program),
    };

    let mut group = ArgGroup::new();
    for (key, value) in &definition.options {
        let name = key.as_str().ok_or_else(|| invalid_value(&definition.program, "option names must be strings"))?;
        group = group.opt(name, arg_value(&definition.program, value)?);
    }
    for value in &definition.args {
        group = group.arg(arg_value(&definition.program, value)?);
    }
    if !group.is_empty() {
        stage = stage.call(group);
    }

    if let Some(literal) = &definition.literal {
        stage = stage.literal(literal);
    }
    if let Some(codes) = &definition.catch {
        stage = stage.catch(codes.iter().copied());
    }

    Ok(stage)
}

fn arg_value(program: &str, value: &serde_yaml::Value) -> PipeshResult<ArgValue> {
    use serde_yaml::Value;

    Ok(match value {
        Value::Null => ArgValue::Unset,
        Value::Bool(flag) => ArgValue::Flag(*flag),
        Value::Sequence(items) => ArgValue::Many(
            items
                .iter()
                .map(|item| scalar(item).ok_or_else(|| invalid_value(program, "list items must be scalars")))
                .collect::<PipeshResult<_>>()?,
        ),
        other => ArgValue::One(
            scalar(other).ok_or_else(|| invalid_value(program, "argument values must be scalars or lists"))?,
        ),
    })
}

fn scalar(value: &serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value;

    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn invalid_value(program: &str, reason: &str) -> PipeshError {
    ConstructionError::InvalidDefinition {
        reason: format!("stage '{}': {}", program, reason),
        help: None,
    }
    .into()
}
