//! Chain execution engine: the sequential step loop.
//!
//! Each prompt step is rendered against the variables produced so far, sent to
//! the [`Generator`], and its text stored under the step's output name. The
//! first failure aborts the run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;

use chainflow_parse::{render, PromptStep};
use chainflow_types::{seed_variables, ChainflowError, Result, UsageStats, Variables};

use crate::events::{ProgressObserver, StepEvent};
use crate::generator::{Generation, GenerationRequest, Generator};
use crate::inputs::{declared_inputs, first_unresolved, InputMode};

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo-16k";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Generation settings applied to every step of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub verbose: bool,
    pub step_timeout: Option<Duration>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            verbose: false,
            step_timeout: None,
        }
    }
}

/// Lifecycle of the most recent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running { step: String },
    Completed { steps: usize },
    Failed { step: String, error: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed { .. } | RunState::Failed { .. })
    }
}

/// The result of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: String,
    /// The seed plus one entry per executed step.
    pub variables: Variables,
    pub stats: UsageStats,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// ChainEngine
// ---------------------------------------------------------------------------

pub struct ChainEngine {
    generator: Arc<dyn Generator>,
    params: GenerationParams,
    input_mode: InputMode,
    observers: Vec<Box<dyn ProgressObserver>>,
    state: watch::Sender<RunState>,
}

impl ChainEngine {
    pub fn new(generator: impl Generator + 'static, params: GenerationParams) -> Self {
        Self::from_shared(Arc::new(generator), params)
    }

    /// Build around a generator the caller keeps a handle to.
    pub fn from_shared(generator: Arc<dyn Generator>, params: GenerationParams) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            generator,
            params,
            input_mode: InputMode::default(),
            observers: Vec::new(),
            state,
        }
    }

    pub fn with_observer(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn with_input_mode(mut self, mode: InputMode) -> Self {
        self.input_mode = mode;
        self
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    /// Follow state transitions from another task.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    fn notify(&self, event: StepEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    /// Record a failure in the run state only. Observers see no step event.
    fn fail_run(&self, step: &str, error: ChainflowError) -> ChainflowError {
        tracing::error!(step, error = %error, "Chain run failed");
        self.state.send_replace(RunState::Failed {
            step: step.to_string(),
            error: error.to_string(),
        });
        error
    }

    /// Fail a step that has already been announced with `Started`.
    fn fail_step(&self, step: &str, error: ChainflowError) -> ChainflowError {
        self.notify(StepEvent::Failed {
            step: step.to_string(),
            error: error.to_string(),
        });
        self.fail_run(step, error)
    }

    async fn execute_step(&self, step: &PromptStep, variables: &Variables) -> Result<Generation> {
        let prompt = render(&step.template, variables).map_err(|e| e.for_step(&step.output))?;
        tracing::debug!(step = %step.output, prompt_chars = prompt.len(), "Rendered prompt");

        let request = GenerationRequest {
            step: step.output.clone(),
            model: self.params.model.clone(),
            temperature: self.params.temperature,
            stream: self.params.verbose,
        };

        let call = self.generator.generate(&prompt, &request);
        match self.params.step_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                ChainflowError::StepTimeout {
                    step: step.output.clone(),
                    timeout_ms: limit.as_millis() as u64,
                }
            })?,
            None => call.await,
        }
    }

    /// Execute `steps` in order starting from `{"seed": seed}`.
    pub async fn run(&self, seed: &str, steps: &[PromptStep]) -> Result<RunOutput> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut variables = seed_variables(seed);
        let mut stats = UsageStats::default();

        let inputs = declared_inputs(steps, self.input_mode);
        tracing::info!(
            run_id = %run_id,
            steps = steps.len(),
            model = %self.params.model,
            temperature = self.params.temperature,
            "Starting chain run"
        );
        tracing::debug!(?inputs, mode = ?self.input_mode, "Declared chain inputs");

        if self.input_mode == InputMode::Closure {
            if let Some((step, variable)) = first_unresolved(steps, &variables) {
                let err = ChainflowError::MissingVariable {
                    step: step.output.clone(),
                    variable: variable.to_string(),
                };
                return Err(self.fail_run(&step.output, err));
            }
        }

        let total = steps.len();
        for (index, step) in steps.iter().enumerate() {
            self.state.send_replace(RunState::Running {
                step: step.output.clone(),
            });
            self.notify(StepEvent::Started {
                step: step.output.clone(),
                index,
                total,
            });
            tracing::info!(step = %step.output, index, total, "Running step");

            let step_started = Instant::now();
            let generation = match self.execute_step(step, &variables).await {
                Ok(generation) => generation,
                Err(e) => return Err(self.fail_step(&step.output, e)),
            };

            stats.record(&generation.usage);
            variables.insert(step.output.clone(), generation.text);

            let duration_ms = step_started.elapsed().as_millis() as u64;
            tracing::info!(
                step = %step.output,
                tokens = generation.usage.total_tokens(),
                duration_ms,
                "Step completed"
            );
            self.notify(StepEvent::Completed {
                step: step.output.clone(),
                usage: generation.usage,
                duration_ms,
            });
        }

        self.state.send_replace(RunState::Completed { steps: total });
        let duration = started.elapsed();
        tracing::info!(
            run_id = %run_id,
            total_tokens = stats.total_tokens,
            cost_usd = stats.total_cost_usd,
            duration_ms = duration.as_millis() as u64,
            "Chain run completed"
        );

        Ok(RunOutput {
            run_id,
            variables,
            stats,
            duration,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
