//! Workflow Execution Module
//!
//! Provides the core execution engine for running workflow actions,
//! including parallel scheduling, outcome propagation and cancellation.
//!
//! # Architecture
//!
//! - [`engine`]: Main execution engine orchestrating workflow runs
//! - [`action`]: Action contract and the supervisor around one execution
//! - [`registry`]: Action type lookup
//! - [`strategy`]: Dispatch strategies
//! - [`template`]: `@{...}` parameter rendering
//! - [`outcome`]: Published action outcomes
//! - [`report`]: Final run report

pub mod action;
pub mod engine;
pub mod outcome;
pub mod registry;
pub mod report;
pub mod strategy;
pub mod template;

pub use action::{Action, ActionContext, ActionHandle, LaunchOptions, TerminalResult};
pub use engine::Engine;
pub use outcome::{OutcomeStore, Outcomes};
pub use registry::{ActionRegistry, ActionRegistryBuilder};
pub use report::{ActionReport, RunReport};
pub use strategy::{FreeStrategy, SequentialStrategy, Strategy, StrategyKind};
pub use template::{RenderingMode, TemplateResolver};
