//! Job definitions: a named, immutable graph of steps and deciders with
//! transition rules, assembled through a builder at process configuration
//! time.

use super::flow::FlowDefinition;
use super::listener::JobListener;
use super::step::{StepRunner, TaskletStep};
use super::traits::{Decider, Tasklet};
use crate::error::{BatchError, Result};
use crate::model::ExitStatus;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One node of the job graph.
#[derive(Clone)]
pub enum Node {
    /// A step with a durable step execution record (tasklet, chunk-oriented,
    /// or partitioned).
    Step(Arc<dyn StepRunner>),
    /// A side-effect-free branching node; produces an exit status but no
    /// execution record.
    Decider(Arc<dyn Decider>),
}

/// A named, immutable job graph. Built once at configuration time and looked
/// up by name through the [`JobRegistry`](crate::job::JobRegistry).
pub struct JobDefinition {
    name: String,
    start: String,
    nodes: HashMap<String, Node>,
    flow: FlowDefinition,
    listeners: Vec<Arc<dyn JobListener>>,
}

impl JobDefinition {
    pub fn builder(name: impl Into<String>) -> JobDefinitionBuilder {
        JobDefinitionBuilder {
            name: name.into(),
            start: None,
            nodes: HashMap::new(),
            order: Vec::new(),
            flow: FlowDefinition::new(),
            listeners: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_node(&self) -> &str {
        &self.start
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn flow(&self) -> &FlowDefinition {
        &self.flow
    }

    pub fn listeners(&self) -> &[Arc<dyn JobListener>] {
        &self.listeners
    }
}

// Nodes and listeners are trait objects, so Debug is by hand: the graph
// shape, not its behavior.
impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        nodes.sort_unstable();
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("nodes", &nodes)
            .finish_non_exhaustive()
    }
}

/// Builder mirroring the fluent step/transition wiring jobs are declared
/// with. The first node added becomes the start node unless
/// [`start`](JobDefinitionBuilder::start) overrides it.
pub struct JobDefinitionBuilder {
    name: String,
    start: Option<String>,
    nodes: HashMap<String, Node>,
    order: Vec<String>,
    flow: FlowDefinition,
    listeners: Vec<Arc<dyn JobListener>>,
}

impl JobDefinitionBuilder {
    pub fn step(mut self, name: impl Into<String>, runner: Arc<dyn StepRunner>) -> Self {
        let name = name.into();
        self.order.push(name.clone());
        self.nodes.insert(name, Node::Step(runner));
        self
    }

    pub fn tasklet(self, name: impl Into<String>, tasklet: Arc<dyn Tasklet>) -> Self {
        self.step(name, Arc::new(TaskletStep::new(tasklet)))
    }

    pub fn decider(mut self, name: impl Into<String>, decider: Arc<dyn Decider>) -> Self {
        let name = name.into();
        self.order.push(name.clone());
        self.nodes.insert(name, Node::Decider(decider));
        self
    }

    pub fn start(mut self, name: impl Into<String>) -> Self {
        self.start = Some(name.into());
        self
    }

    /// Add a transition rule `(from, on) -> to`.
    pub fn transition(
        mut self,
        from: impl Into<String>,
        on: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.flow.add_rule(from, on, to);
        self
    }

    /// Linear shorthand: route `from` to `to` on COMPLETED.
    pub fn next(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transition(from, ExitStatus::COMPLETED, to)
    }

    pub fn listener(mut self, listener: Arc<dyn JobListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validate the graph and freeze it. Rejects empty jobs, unknown start
    /// nodes, and transition rules referencing undeclared nodes.
    pub fn build(self) -> Result<JobDefinition> {
        let start = match self.start {
            Some(start) => start,
            None => self
                .order
                .first()
                .cloned()
                .ok_or_else(|| BatchError::Configuration(format!("job '{}' has no nodes", self.name)))?,
        };

        if !self.nodes.contains_key(&start) {
            return Err(BatchError::Configuration(format!(
                "job '{}': start node '{start}' is not declared",
                self.name
            )));
        }

        for rule in self.flow.rules() {
            if !self.nodes.contains_key(&rule.from) {
                return Err(BatchError::Configuration(format!(
                    "job '{}': transition from undeclared node '{}'",
                    self.name, rule.from
                )));
            }
            if !self.nodes.contains_key(&rule.to) {
                return Err(BatchError::Configuration(format!(
                    "job '{}': transition to undeclared node '{}'",
                    self.name, rule.to
                )));
            }
        }

        Ok(JobDefinition {
            name: self.name,
            start,
            nodes: self.nodes,
            flow: self.flow,
            listeners: self.listeners,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionContext, JobExecution};
    use async_trait::async_trait;

    struct NoopTasklet;

    #[async_trait]
    impl Tasklet for NoopTasklet {
        async fn execute(
            &self,
            _execution: &JobExecution,
            _context: &mut ExecutionContext,
        ) -> Result<ExitStatus> {
            Ok(ExitStatus::completed())
        }
    }

    #[test]
    fn test_first_node_becomes_start() {
        let job = JobDefinition::builder("cleanupJob")
            .tasklet("cleanup", Arc::new(NoopTasklet))
            .tasklet("notify", Arc::new(NoopTasklet))
            .next("cleanup", "notify")
            .build()
            .unwrap();

        assert_eq!(job.start_node(), "cleanup");
        assert!(matches!(job.node("notify"), Some(Node::Step(_))));
    }

    #[test]
    fn test_debug_shows_graph_shape() {
        let job = JobDefinition::builder("cleanupJob")
            .tasklet("cleanup", Arc::new(NoopTasklet))
            .build()
            .unwrap();
        let rendered = format!("{job:?}");
        assert!(rendered.contains("cleanupJob"));
        assert!(rendered.contains("cleanup"));
    }

    #[test]
    fn test_empty_job_is_rejected() {
        let err = JobDefinition::builder("emptyJob").build().unwrap_err();
        assert!(matches!(err, BatchError::Configuration(_)));
    }

    #[test]
    fn test_transition_to_undeclared_node_is_rejected() {
        let err = JobDefinition::builder("brokenJob")
            .tasklet("onlyStep", Arc::new(NoopTasklet))
            .transition("onlyStep", "FAILED", "missingStep")
            .build()
            .unwrap_err();
        assert!(matches!(err, BatchError::Configuration(_)));
        assert!(err.to_string().contains("missingStep"));
    }
}
