// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Pipeline expressions
//!
//! Stages, the expression tree that connects them, execution planning and
//! invocation, plus the YAML definition format for whole pipelines.

mod definition;
mod executor;
mod node;
mod plan;
mod stage;

pub use definition::*;
pub use executor::{invoke, InvokeOptions, PipelineHandle};
pub use node::{PipelineNode, RedirectTarget, Redirection, StreamKind};
pub use plan::{plan, ExecutionPlan, PipeId, PlannedStage, Sink, Source};
pub use stage::Stage;
