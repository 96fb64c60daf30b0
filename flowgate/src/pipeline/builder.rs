//! Pipeline builder with build-time validation.

use super::{FailurePolicy, Pipeline, RetryPolicy, StageSpec};
use crate::admission::{AdmissionPool, DEFAULT_ADMISSION_CAPACITY};
use crate::context::StageContext;
use crate::errors::{ConfigError, CycleError, WorkError};
use crate::stages::Stage;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Builder for assembling a validated [`Pipeline`].
///
/// Stages may be added in any order; a stage is allowed to name dependencies
/// that are only added later. All validation happens in [`build`], which
/// rejects empty pipelines, duplicate names, self-dependencies, unknown
/// dependency names, a zero admission capacity and dependency cycles.
///
/// [`build`]: PipelineBuilder::build
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// Stage specifications in insertion order.
    specs: Vec<StageSpec>,
    /// Explicit admission capacity, if configured.
    capacity: Option<usize>,
    /// Externally shared admission pool, if configured.
    pool: Option<Arc<AdmissionPool>>,
    /// Retry policy for stages without an override.
    default_retry: RetryPolicy,
    /// What happens to in-flight stages after the first failure.
    failure_policy: FailurePolicy,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            specs: Vec::new(),
            capacity: None,
            pool: None,
            default_retry: RetryPolicy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Adds a stage with the given dependencies.
    #[must_use]
    pub fn stage(self, name: impl Into<String>, work: Arc<dyn Stage>, dependencies: &[&str]) -> Self {
        let spec = StageSpec::new(name, work).with_dependencies(dependencies.iter().copied());
        self.add_stage_spec(spec)
    }

    /// Adds a stage whose work is a plain closure.
    #[must_use]
    pub fn stage_fn<F>(self, name: impl Into<String>, func: F, dependencies: &[&str]) -> Self
    where
        F: Fn(&StageContext) -> Result<Value, WorkError> + Send + Sync + 'static,
    {
        let spec = StageSpec::from_fn(name, func).with_dependencies(dependencies.iter().copied());
        self.add_stage_spec(spec)
    }

    /// Adds a fully specified stage.
    #[must_use]
    pub fn add_stage_spec(mut self, spec: StageSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Sets the admission capacity; the pool is created by [`build`].
    ///
    /// Overrides any pool given via [`with_admission_pool`].
    ///
    /// [`build`]: PipelineBuilder::build
    /// [`with_admission_pool`]: PipelineBuilder::with_admission_pool
    #[must_use]
    pub fn with_admission_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self.pool = None;
        self
    }

    /// Uses an existing admission pool, letting several pipelines share one
    /// concurrency budget. Overrides any capacity given via
    /// [`with_admission_capacity`](PipelineBuilder::with_admission_capacity).
    #[must_use]
    pub fn with_admission_pool(mut self, pool: Arc<AdmissionPool>) -> Self {
        self.pool = Some(pool);
        self.capacity = None;
        self
    }

    /// Sets the retry policy applied to stages without their own override.
    #[must_use]
    pub const fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    /// Sets the failure policy for in-flight stages after the first failure.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages added so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.specs.len()
    }

    /// Validates the stage graph and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the pipeline is empty, a stage name is
    /// duplicated, a stage depends on itself or on an unknown stage, the
    /// admission capacity is zero, or the dependency graph contains a cycle.
    pub fn build(self) -> Result<Pipeline, ConfigError> {
        if self.specs.is_empty() {
            return Err(ConfigError::new("pipeline has no stages"));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for spec in &self.specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(
                    ConfigError::new(format!("duplicate stage name '{}'", spec.name))
                        .with_stages(vec![spec.name.clone()]),
                );
            }
        }

        for spec in &self.specs {
            if spec.depends_on_self() {
                return Err(
                    ConfigError::new(format!("stage '{}' depends on itself", spec.name))
                        .with_stages(vec![spec.name.clone()]),
                );
            }
            for dep in &spec.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(ConfigError::new(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        spec.name, dep
                    ))
                    .with_stages(vec![spec.name.clone(), dep.clone()]));
                }
            }
        }

        if self.capacity == Some(0) {
            return Err(ConfigError::new("admission capacity must be at least 1"));
        }

        self.detect_cycles()?;

        let execution_order = self.topological_order();
        debug_assert_eq!(execution_order.len(), self.specs.len());

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for spec in &self.specs {
            for dep in &spec.dependencies {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(spec.name.clone());
            }
        }

        let pool = match (self.pool, self.capacity) {
            (Some(pool), _) => pool,
            (None, Some(capacity)) => Arc::new(AdmissionPool::new(capacity)),
            (None, None) => Arc::new(AdmissionPool::new(DEFAULT_ADMISSION_CAPACITY)),
        };

        let stages: HashMap<String, Arc<StageSpec>> = self
            .specs
            .into_iter()
            .map(|spec| (spec.name.clone(), Arc::new(spec)))
            .collect();

        Ok(Pipeline {
            name: self.name,
            stages,
            execution_order,
            dependents,
            pool,
            default_retry: self.default_retry,
            failure_policy: self.failure_policy,
        })
    }

    /// Detects cycles in the dependency graph.
    fn detect_cycles(&self) -> Result<(), CycleError> {
        let by_name: HashMap<&str, &StageSpec> = self
            .specs
            .iter()
            .map(|spec| (spec.name.as_str(), spec))
            .collect();

        let mut visited = HashSet::new();
        let mut in_stack = HashSet::new();
        let mut path = Vec::new();

        for spec in &self.specs {
            if !visited.contains(spec.name.as_str()) {
                if let Some(cycle) =
                    dfs_cycle(spec.name.as_str(), &by_name, &mut visited, &mut in_stack, &mut path)
                {
                    return Err(CycleError::new(cycle));
                }
            }
        }

        Ok(())
    }

    /// Computes a deterministic topological order.
    ///
    /// Stages become ready in builder insertion order, so independent stages
    /// keep their relative order across runs. Assumes cycles were already
    /// rejected.
    fn topological_order(&self) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = self
            .specs
            .iter()
            .map(|spec| (spec.name.as_str(), spec.dependencies.len()))
            .collect();

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for spec in &self.specs {
            for dep in &spec.dependencies {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(spec.name.as_str());
            }
        }

        let mut ready: VecDeque<&str> = self
            .specs
            .iter()
            .filter(|spec| spec.dependencies.is_empty())
            .map(|spec| spec.name.as_str())
            .collect();

        let mut order = Vec::with_capacity(self.specs.len());
        while let Some(name) = ready.pop_front() {
            order.push(name.to_string());
            if let Some(children) = dependents.get(name) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push_back(child);
                        }
                    }
                }
            }
        }

        order
    }
}

fn dfs_cycle<'a>(
    node: &'a str,
    by_name: &HashMap<&'a str, &'a StageSpec>,
    visited: &mut HashSet<&'a str>,
    in_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    in_stack.insert(node);
    path.push(node);

    if let Some(spec) = by_name.get(node) {
        for dep in &spec.dependencies {
            if !visited.contains(dep.as_str()) {
                if let Some(cycle) = dfs_cycle(dep, by_name, visited, in_stack, path) {
                    return Some(cycle);
                }
            } else if in_stack.contains(dep.as_str()) {
                let start = path.iter().position(|name| *name == dep).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|name| (*name).to_string()).collect();
                cycle.push(dep.clone());
                return Some(cycle);
            }
        }
    }

    path.pop();
    in_stack.remove(node);
    None
}
