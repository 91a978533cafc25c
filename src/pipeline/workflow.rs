// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Sequencing stages into one run.
//!
//! A [`Workflow`] runs its steps strictly in order. Each step receives the
//! raw reply of every earlier step in its params, under that step's output
//! key. The first step that produces nothing aborts the run with
//! [`ForgeError::StageFailed`] naming it; later steps never run.

use crate::llm::cost::CostTracker;
use crate::pipeline::events::TaskEvent;
use crate::pipeline::files::PullRequestDraft;
use crate::pipeline::stage::{Stage, StageExecutor, StageRequest, StageResult};
use crate::pipeline::stages::{
    AggregatorStage, ChunkAnalysisStage, CodingStage, PlannerStage, SpecificationsStage,
};
use crate::utils::error::ForgeError;
use crate::utils::formatting::{format_cost, format_duration};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::{Duration, Instant};

/// A stage as the workflow sees it: typed output erased to JSON.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &str;
    fn output_key(&self) -> &str;
    async fn run(
        &self,
        executor: &StageExecutor,
        request: &StageRequest,
    ) -> Result<StageResult<Value>, ForgeError>;
}

/// Runs the wrapped stage once.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleShot<S>(pub S);

#[async_trait]
impl<S: Stage> PipelineStage for SingleShot<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn output_key(&self) -> &str {
        self.0.output_key()
    }

    async fn run(
        &self,
        executor: &StageExecutor,
        request: &StageRequest,
    ) -> Result<StageResult<Value>, ForgeError> {
        let result = executor.process(&self.0, request).await?;
        Ok(result.map(to_value))
    }
}

/// Runs the wrapped stage over every chunk and merges the results: raw
/// replies joined by newlines, tokens and cost summed, decoded values
/// collected into an array. Fails only when no chunk succeeded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Chunked<S>(pub S);

#[async_trait]
impl<S: Stage> PipelineStage for Chunked<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn output_key(&self) -> &str {
        self.0.output_key()
    }

    async fn run(
        &self,
        executor: &StageExecutor,
        request: &StageRequest,
    ) -> Result<StageResult<Value>, ForgeError> {
        let results = executor.process_in_chunks(&self.0, request).await?;
        merge_chunks(self.0.name(), results)
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Option<Value> {
    serde_json::to_value(value)
        .inspect_err(|e| tracing::warn!("Failed to convert stage output: {}", e))
        .ok()
}

fn merge_chunks<T: serde::Serialize>(
    stage: &str,
    results: Vec<StageResult<T>>,
) -> Result<StageResult<Value>, ForgeError> {
    if results.is_empty() {
        return Err(ForgeError::EmptyResponse {
            stage: stage.to_string(),
        });
    }

    let mut texts = Vec::with_capacity(results.len());
    let mut values = Vec::with_capacity(results.len());
    let mut merged = StageResult {
        response: None,
        response_str: String::new(),
        input_tokens: 0,
        output_tokens: 0,
        cost: 0.0,
        calculated_tokens: 0,
    };

    for result in results {
        merged.input_tokens += result.input_tokens;
        merged.output_tokens += result.output_tokens;
        merged.cost += result.cost;
        merged.calculated_tokens += result.calculated_tokens;
        if let Some(value) = result.response.and_then(to_value) {
            values.push(value);
        }
        texts.push(result.response_str);
    }

    merged.response_str = texts.join("\n");
    merged.response = Some(Value::Array(values));
    Ok(merged)
}

/// Outcome of one stage inside a finished run.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: String,
    pub result: StageResult<Value>,
}

#[derive(Debug)]
pub struct WorkflowReport {
    pub task_id: String,
    pub model: String,
    pub stages: Vec<StageOutcome>,
    pub costs: CostTracker,
    pub elapsed: Duration,
}

impl WorkflowReport {
    pub fn stage(&self, name: &str) -> Option<&StageResult<Value>> {
        self.stages
            .iter()
            .find(|outcome| outcome.stage == name)
            .map(|outcome| &outcome.result)
    }

    pub fn last(&self) -> Option<&StageResult<Value>> {
        self.stages.last().map(|outcome| &outcome.result)
    }

    /// Decoded output of `stage` as `T`, if it decoded at all.
    pub fn output_as<T: DeserializeOwned>(&self, stage: &str) -> Option<T> {
        let value = self.stage(stage)?.response.clone()?;
        serde_json::from_value(value)
            .inspect_err(|e| tracing::warn!(stage, "Stage output has an unexpected shape: {}", e))
            .ok()
    }

    /// The change set of a code generation run.
    pub fn pull_request_draft(&self) -> Option<PullRequestDraft> {
        self.output_as(CodingStage.name())
    }

    pub fn total_cost(&self) -> f64 {
        self.costs.total_cost()
    }
}

pub struct Workflow {
    name: String,
    executor: StageExecutor,
    steps: Vec<Box<dyn PipelineStage>>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish_non_exhaustive()
    }
}

impl Workflow {
    pub fn new(name: impl Into<String>, executor: StageExecutor) -> Self {
        Self {
            name: name.into(),
            executor,
            steps: Vec::new(),
        }
    }

    /// Specifications, then an implementation plan, then the code.
    pub fn code_generation(executor: StageExecutor) -> Self {
        Self::new("code_generation", executor)
            .then(SingleShot(SpecificationsStage))
            .then(SingleShot(PlannerStage))
            .then(SingleShot(CodingStage))
    }

    /// Analysis of every chunk, then one aggregated analysis.
    pub fn codebase_analysis(executor: StageExecutor) -> Self {
        Self::new("codebase_analysis", executor)
            .then(Chunked(ChunkAnalysisStage))
            .then(SingleShot(AggregatorStage))
    }

    pub fn then(mut self, step: impl PipelineStage + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executor(&self) -> &StageExecutor {
        &self.executor
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Run every step in order.
    ///
    /// # Errors
    ///
    /// `StageFailed` naming the first step that produced no result.
    pub async fn run(&self, request: StageRequest) -> Result<WorkflowReport, ForgeError> {
        let started = Instant::now();
        let sink = self.executor.progress();
        let task_id = request.task_id.clone();

        tracing::info!(
            task_id = %task_id,
            workflow = %self.name,
            model = %request.model,
            files = request.files.len(),
            "Starting workflow"
        );
        sink.publish(
            &task_id,
            TaskEvent::Start {
                message: format!(
                    "Running {} with {} ({} stages, {} files)",
                    self.name,
                    request.model,
                    self.steps.len(),
                    request.files.len()
                ),
            },
        );

        let mut request = request;
        let mut costs = CostTracker::new();
        let mut stages = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let name = step.name().to_string();
            sink.publish(
                &task_id,
                TaskEvent::Progress {
                    message: format!("Running {}", name),
                },
            );

            let result = match step.run(&self.executor, &request).await {
                Ok(result) => result,
                Err(err) => {
                    let err = ForgeError::stage_failed(&name, err);
                    tracing::error!(task_id = %task_id, stage = %name, "Workflow aborted: {}", err);
                    sink.publish(
                        &task_id,
                        TaskEvent::Failed {
                            stage: Some(name),
                            message: err.to_string(),
                        },
                    );
                    return Err(err);
                }
            };

            costs.add_operation(&name, result.input_tokens, result.output_tokens, result.cost);
            tracing::info!(
                task_id = %task_id,
                stage = %name,
                estimated_tokens = result.calculated_tokens,
                input_tokens = result.input_tokens,
                output_tokens = result.output_tokens,
                cost = %format_cost(result.cost),
                "Stage finished"
            );
            sink.publish(
                &task_id,
                TaskEvent::Complete {
                    stage: name.clone(),
                    output: result.response_str.clone(),
                    estimated_tokens: result.calculated_tokens,
                    input_tokens: result.input_tokens,
                    output_tokens: result.output_tokens,
                    cost: result.cost,
                    total_cost: costs.total_cost(),
                },
            );

            request
                .params
                .insert(step.output_key().to_string(), result.response_str.clone());
            stages.push(StageOutcome {
                stage: name,
                result,
            });
        }

        let elapsed = started.elapsed();
        tracing::info!(
            task_id = %task_id,
            workflow = %self.name,
            total_cost = %format_cost(costs.total_cost()),
            elapsed = %format_duration(elapsed),
            "Workflow finished"
        );
        sink.publish(
            &task_id,
            TaskEvent::Finished {
                total_cost: costs.total_cost(),
                elapsed: format_duration(elapsed),
                elapsed_ms: elapsed.as_millis() as u64,
            },
        );

        Ok(WorkflowReport {
            task_id,
            model: request.model,
            stages,
            costs,
            elapsed,
        })
    }
}
