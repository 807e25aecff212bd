//! Workflow Definition Module
//!
//! Provides data structures and utilities for declaring, parsing, and
//! validating action graphs.
//!
//! # Structure
//!
//! - [`model`]: Action declarations (ActionSpec, failure policies)
//! - [`parser`]: Source detection, YAML parsing and loading
//! - [`validator`]: Graph construction, cycle detection, topological order
//! - [`graph`]: The validated Workflow graph
//! - [`state`]: Node and run lifecycle states

pub mod graph;
pub mod model;
pub mod parser;
pub mod state;
pub mod validator;

pub use graph::Workflow;
pub use model::{ActionSpec, Dependency, FailurePolicy, OnFailure, Parameters};
pub use parser::{detect_source, load_workflow, loads, read_document, WorkflowDocument, WorkflowSource};
pub use state::{ActionNode, ActionState, RunState, TransitionError};
pub use validator::GraphBuilder;
