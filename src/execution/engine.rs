//! Workflow Execution Engine
//!
//! The engine orchestrates a run:
//! - Dependency-driven dispatch through a pluggable [`Strategy`]
//! - Template resolution against a snapshot of run state, right before start
//! - Skip propagation and fail-fast cancellation
//! - Completion handling through a single event channel
//!
//! All run state (node states, the outcome store, the in-flight set) is
//! owned by the run loop and mutated only there. Actions run as tokio tasks
//! and report back by sending one completion event each, which the loop
//! applies before it recomputes readiness.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use super::action::{ActionHandle, LaunchOptions, TerminalResult};
use super::outcome::OutcomeStore;
use super::registry::ActionRegistry;
use super::report::RunReport;
use super::strategy::{free_slots, Strategy};
use super::template::TemplateResolver;
use crate::config::RunConfig;
use crate::error::{ConfigurationError, EngineError};
use crate::workflow::{ActionNode, ActionState, FailurePolicy, OnFailure, RunState, Workflow};

/// Workflow execution engine.
///
/// Manages the complete lifecycle of a run from start to finish, handling
/// parallelization, failure policies and outcome propagation.
///
/// # Example
///
/// ```rust,no_run
/// use rustrunner::config::RunConfig;
/// use rustrunner::execution::{ActionRegistry, Engine};
/// use rustrunner::workflow::load_workflow;
///
/// #[tokio::main]
/// async fn main() -> Result<(), rustrunner::Error> {
///     let workflow = load_workflow("rustrunner.yml")?;
///     let config = RunConfig::default().with_max_parallel(4);
///     let engine = Engine::new(workflow, ActionRegistry::builtin(), config)?;
///
///     let report = engine.run().await?;
///     println!("{}", report.summary());
///     Ok(())
/// }
/// ```
pub struct Engine {
    workflow: Workflow,
    registry: ActionRegistry,
    config: RunConfig,
    strategy: Box<dyn Strategy>,
}

impl Engine {
    /// Creates an engine for a validated workflow.
    ///
    /// Every action type must be registered and accept its declared
    /// parameters; nothing runs otherwise.
    pub fn new(
        workflow: Workflow,
        registry: ActionRegistry,
        config: RunConfig,
    ) -> Result<Self, ConfigurationError> {
        for node in workflow.nodes() {
            let spec = node.spec();
            let action = registry.get(&spec.action_type).ok_or_else(|| {
                ConfigurationError::UnknownActionType {
                    action: spec.name.clone(),
                    action_type: spec.action_type.clone(),
                }
            })?;
            action
                .validate(&spec.parameters)
                .map_err(|reason| ConfigurationError::InvalidParameters {
                    action: spec.name.clone(),
                    reason,
                })?;
        }

        let strategy = config.strategy.build(config.max_parallel);

        Ok(Self {
            workflow,
            registry,
            config,
            strategy,
        })
    }

    /// Replaces the strategy chosen by the configuration.
    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Executes the workflow to completion.
    ///
    /// # Returns
    ///
    /// * `Ok(RunReport)` - The run finished; check [`RunReport::state`]
    /// * `Err(EngineError::InvariantViolation)` - The run was aborted; the
    ///   error carries the report captured at that point
    pub async fn run(self) -> Result<RunReport, EngineError> {
        RunLoop::new(self).execute().await
    }
}

/// Terminal result of one dispatched action.
struct Completion {
    index: usize,
    result: TerminalResult,
}

/// Description of a broken engine invariant.
type Violation = String;

/// Mutable state of one run.
struct RunLoop {
    workflow: Workflow,
    registry: ActionRegistry,
    config: RunConfig,
    strategy: Box<dyn Strategy>,
    outcomes: OutcomeStore,
    /// Per node, dependencies that have not satisfied it yet
    waiting: Vec<usize>,
    /// PENDING nodes with nothing left to wait for
    ready: BTreeSet<usize>,
    /// SCHEDULED or RUNNING nodes and their cancellation tokens
    in_flight: HashMap<usize, CancellationToken>,
    /// Set once fail-fast triggers; nothing new is dispatched afterwards
    halted: bool,
    state: RunState,
    tx: UnboundedSender<Completion>,
    rx: UnboundedReceiver<Completion>,
}

impl RunLoop {
    fn new(engine: Engine) -> Self {
        let Engine {
            workflow,
            registry,
            config,
            strategy,
        } = engine;
        let (tx, rx) = unbounded_channel();

        let waiting: Vec<usize> = (0..workflow.len())
            .map(|i| workflow.dependencies(i).len())
            .collect();
        let ready = (0..workflow.len()).filter(|&i| waiting[i] == 0).collect();

        Self {
            workflow,
            registry,
            config,
            strategy,
            outcomes: OutcomeStore::new(),
            waiting,
            ready,
            in_flight: HashMap::new(),
            halted: false,
            state: RunState::Initializing,
            tx,
            rx,
        }
    }

    async fn execute(mut self) -> Result<RunReport, EngineError> {
        let started_at = Utc::now();
        self.state = RunState::Running;

        info!(
            "Starting run of {} actions (strategy: {}, max concurrency: {}, failure policy: {}, outcomes: {})",
            self.workflow.len(),
            self.strategy.name(),
            match self.strategy.max_concurrency() {
                0 => "unbounded".to_string(),
                n => n.to_string(),
            },
            self.config.failure_policy,
            self.config.rendering,
        );

        match self.drive().await {
            Ok(()) => {
                let failed = self
                    .workflow
                    .nodes()
                    .iter()
                    .any(|n| matches!(n.state(), ActionState::Failed | ActionState::Cancelled));
                self.state = if failed {
                    RunState::Failed
                } else {
                    RunState::Completed
                };

                info!("Run {}: {:?}", self.state, self.workflow.state_counts());
                Ok(RunReport::capture(
                    &self.workflow,
                    self.state,
                    started_at,
                    Utc::now(),
                ))
            }
            Err(reason) => {
                error!("Aborting run: {}", reason);
                self.abort().await;
                self.state = RunState::Failed;

                let report = RunReport::capture(&self.workflow, self.state, started_at, Utc::now());
                Err(EngineError::InvariantViolation {
                    reason,
                    report: Box::new(report),
                })
            }
        }
    }

    /// Main loop: dispatch what is ready, then block on the next completion.
    async fn drive(&mut self) -> Result<(), Violation> {
        loop {
            let progressed = if self.halted {
                0
            } else {
                self.dispatch_ready()?
            };

            if self.in_flight.is_empty() {
                let unfinished = self.unfinished();
                if unfinished.is_empty() {
                    return Ok(());
                }
                if progressed > 0 {
                    continue;
                }
                return Err(format!(
                    "Run stalled: nothing in flight but actions remain unfinished: {}",
                    unfinished.join(", ")
                ));
            }

            let completion = self
                .rx
                .recv()
                .await
                .ok_or_else(|| "Completion channel closed".to_string())?;
            self.complete(completion)?;
        }
    }

    fn node(&self, index: usize) -> Result<&ActionNode, Violation> {
        self.workflow
            .node(index)
            .ok_or_else(|| format!("Unknown action index {}", index))
    }

    fn node_mut(&mut self, index: usize) -> Result<&mut ActionNode, Violation> {
        self.workflow
            .node_mut(index)
            .ok_or_else(|| format!("Unknown action index {}", index))
    }

    /// Names of nodes that have not reached a terminal state.
    fn unfinished(&self) -> Vec<String> {
        self.workflow
            .nodes()
            .iter()
            .filter(|n| !n.state().is_terminal())
            .map(|n| n.name().to_string())
            .collect()
    }

    /// Whether a terminal dependency lets one of its dependents run.
    fn satisfies(&self, dependency: usize, dependent: usize) -> bool {
        self.workflow.node(dependency).is_some_and(|node| match node.state() {
            ActionState::Succeeded => true,
            ActionState::Failed => {
                node.spec().on_failure == Some(OnFailure::Continue)
                    && !self.workflow.is_strict(dependent, dependency)
            }
            _ => false,
        })
    }

    /// Updates the dependents of a node that just reached a terminal state.
    ///
    /// A dependent it satisfies has one dependency less to wait for and
    /// becomes ready at zero. A dependent it blocks is SKIPPED, which in
    /// turn settles that node's own dependents.
    fn settle(&mut self, origin: usize) -> Result<(), Violation> {
        let mut finished = vec![origin];

        while let Some(index) = finished.pop() {
            self.ready.remove(&index);

            for dependent in self.workflow.dependents(index).to_vec() {
                if self.node(dependent)?.state() != ActionState::Pending {
                    continue;
                }

                if self.satisfies(index, dependent) {
                    let remaining = match self.waiting.get_mut(dependent) {
                        Some(waiting) if *waiting > 0 => {
                            *waiting -= 1;
                            *waiting
                        }
                        _ => {
                            return Err(format!(
                                "Action #{} satisfied more often than it has dependencies",
                                dependent
                            ))
                        }
                    };
                    if remaining == 0 {
                        self.ready.insert(dependent);
                    }
                    continue;
                }

                let dep_node = self.node(index)?;
                info!(
                    "Skipping action '{}': dependency '{}' is {}",
                    self.node(dependent)?.name(),
                    dep_node.name(),
                    dep_node.state()
                );
                self.node_mut(dependent)?
                    .transition(ActionState::Skipped)
                    .map_err(|e| e.to_string())?;
                finished.push(dependent);
            }
        }

        Ok(())
    }

    /// PENDING nodes whose dependencies all satisfy, in declaration order.
    fn ready_set(&self) -> Vec<usize> {
        self.ready.iter().copied().collect()
    }

    /// Asks the strategy for a batch and dispatches it.
    fn dispatch_ready(&mut self) -> Result<usize, Violation> {
        let ready = self.ready_set();
        if ready.is_empty() {
            return Ok(0);
        }

        let running = self.in_flight.len();
        let slots = free_slots(self.strategy.max_concurrency(), running);
        if slots == 0 {
            return Ok(0);
        }

        let batch = self.strategy.select_next_batch(&ready, running);
        check_batch(self.strategy.name(), &ready, &batch, slots)?;
        debug!(
            "Ready: {:?}, running: {}, selected: {:?}",
            ready, running, batch
        );

        let mut progressed = 0;
        for index in batch {
            if self.halted {
                break;
            }
            self.dispatch(index)?;
            progressed += 1;
        }
        Ok(progressed)
    }

    /// Resolves parameters and starts one action, or fails it in place.
    fn dispatch(&mut self, index: usize) -> Result<(), Violation> {
        self.ready.remove(&index);

        let resolved = {
            let node = self.node(index)?;
            TemplateResolver::new(&self.workflow, &self.outcomes, self.config.rendering)
                .resolve_parameters(&node.spec().parameters)
        };

        let parameters = match resolved {
            Ok(parameters) => parameters,
            Err(e) => {
                error!(
                    "Action '{}' failed before start: {}",
                    self.node(index)?.name(),
                    e
                );
                self.node_mut(index)?.fail(e).map_err(|e| e.to_string())?;
                self.settle(index)?;
                return self.apply_failure_policy(index);
            }
        };

        let (name, action_type, timeout) = {
            let spec = self.node(index)?.spec();
            (
                spec.name.clone(),
                spec.action_type.clone(),
                spec.timeout.or(self.config.action_timeout),
            )
        };
        let action = self
            .registry
            .get(&action_type)
            .ok_or_else(|| format!("Action type '{}' is not registered", action_type))?;

        let node = self.node_mut(index)?;
        node.transition(ActionState::Scheduled)
            .map_err(|e| e.to_string())?;
        node.transition(ActionState::Running)
            .map_err(|e| e.to_string())?;

        info!("Starting action '{}' ({})", name, action_type);

        let handle = ActionHandle::start(
            action,
            name,
            parameters,
            LaunchOptions {
                timeout,
                yield_function: self.config.yield_function,
            },
        );
        self.in_flight.insert(index, handle.token().clone());

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = handle.wait().await;
            if tx.send(Completion { index, result }).is_err() {
                debug!("Run loop gone, dropping completion of action #{}", index);
            }
        });

        Ok(())
    }

    /// Applies one completion event.
    fn complete(&mut self, completion: Completion) -> Result<(), Violation> {
        let Completion { index, result } = completion;
        let tracked = self.in_flight.remove(&index).is_some();
        if !tracked || !self.node(index)?.state().is_in_flight() {
            return Err(format!(
                "Completion received for action #{} which is not in flight",
                index
            ));
        }
        let name = self.node(index)?.name().to_string();

        match result {
            TerminalResult::Succeeded(outcomes) => {
                self.outcomes
                    .publish(&name, outcomes.clone())
                    .map_err(|e| e.to_string())?;
                self.node_mut(index)?
                    .succeed(outcomes)
                    .map_err(|e| e.to_string())?;
                info!("Action '{}' succeeded", name);
                self.settle(index)?;
            }
            TerminalResult::Failed(e) => {
                error!("Action '{}' failed: {}", name, e);
                self.node_mut(index)?.fail(e).map_err(|e| e.to_string())?;
                self.settle(index)?;
                self.apply_failure_policy(index)?;
            }
            TerminalResult::Cancelled => {
                warn!("Action '{}' cancelled", name);
                self.node_mut(index)?.cancel().map_err(|e| e.to_string())?;
                self.settle(index)?;
            }
        }
        Ok(())
    }

    /// Reacts to a FAILED node according to its override or the run policy.
    fn apply_failure_policy(&mut self, index: usize) -> Result<(), Violation> {
        let policy = match self.node(index)?.spec().on_failure {
            Some(on_failure) => on_failure.policy(),
            None => Some(self.config.failure_policy),
        };

        match policy {
            Some(FailurePolicy::FailFast) => self.fail_fast(index),
            Some(FailurePolicy::BestEffort) => Ok(()),
            None => {
                info!(
                    "Action '{}' failed with on_failure: continue, dependents still run",
                    self.node(index)?.name()
                );
                Ok(())
            }
        }
    }

    /// Stops dispatching, cancels in-flight actions and settles the rest.
    ///
    /// Pending nodes downstream of `origin` become SKIPPED, every other
    /// pending node becomes CANCELLED.
    fn fail_fast(&mut self, origin: usize) -> Result<(), Violation> {
        if self.halted {
            return Ok(());
        }
        self.halted = true;

        warn!(
            "Fail-fast triggered by '{}': cancelling {} running actions",
            self.node(origin)?.name(),
            self.in_flight.len()
        );
        for token in self.in_flight.values() {
            token.cancel();
        }

        let downstream: BTreeSet<usize> = self.workflow.downstream_of(origin);
        for index in 0..self.workflow.len() {
            let node = self.node_mut(index)?;
            if node.state() != ActionState::Pending {
                continue;
            }
            let settled = if downstream.contains(&index) {
                node.transition(ActionState::Skipped)
            } else {
                node.cancel()
            };
            settled.map_err(|e| e.to_string())?;
        }
        self.ready.clear();
        Ok(())
    }

    /// Cancels everything and waits for in-flight actions to wind down.
    async fn abort(&mut self) {
        self.halted = true;
        for token in self.in_flight.values() {
            token.cancel();
        }

        while !self.in_flight.is_empty() {
            let Some(Completion { index, result }) = self.rx.recv().await else {
                break;
            };
            self.in_flight.remove(&index);
            let Some(node) = self.workflow.node_mut(index) else {
                continue;
            };
            let recorded = match result {
                TerminalResult::Succeeded(outcomes) => node.succeed(outcomes),
                TerminalResult::Failed(e) => node.fail(e),
                TerminalResult::Cancelled => node.cancel(),
            };
            if let Err(e) = recorded {
                warn!("While aborting: {}", e);
            }
        }

        for index in 0..self.workflow.len() {
            if let Some(node) = self.workflow.node_mut(index) {
                if node.state() == ActionState::Pending {
                    if let Err(e) = node.cancel() {
                        warn!("While aborting: {}", e);
                    }
                }
            }
        }
    }
}

/// Rejects strategy selections outside the ready set or the free slots.
fn check_batch(
    strategy: &str,
    ready: &[usize],
    batch: &[usize],
    slots: usize,
) -> Result<(), Violation> {
    if batch.len() > slots {
        return Err(format!(
            "Strategy '{}' selected {} actions with only {} free slots",
            strategy,
            batch.len(),
            slots
        ));
    }

    let mut seen = BTreeSet::new();
    for index in batch {
        if !ready.contains(index) {
            return Err(format!(
                "Strategy '{}' selected action #{} which is not ready",
                strategy, index
            ));
        }
        if !seen.insert(index) {
            return Err(format!(
                "Strategy '{}' selected action #{} twice",
                strategy, index
            ));
        }
    }
    Ok(())
}
