//! 単一ステップの実行
//!
//! # 責務
//!
//! - アダプターへの入力 [`AgentInput`] を組み立てる
//! - タイムアウト付きでアダプターを呼び出す（試行ごとに `tokio::time::timeout`）
//! - 失敗時のリトライ（試行間に待機を挟む）
//! - あらゆる失敗を [`StepResult`] に正規化する
//!
//! [`StepExecutor::execute`] はエラーを返しません。タイムアウト、アダプターのエラー、
//! アダプターが報告した失敗、パニックはすべて `Failed` の結果として記録されます。

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::context::ExecutionContext;
use super::result::{StepError, StepErrorKind, StepOutcome, StepResult};
use crate::agent::{AgentAdapter, AgentInput, AgentOutput, StepConfig};
use crate::config::StepSpec;
use crate::error::AgentError;
use crate::provider::TokenUsage;

/// リトライ前の待機時間
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// アダプターに結び付けられたステップ
#[derive(Clone)]
pub struct BoundStep<'a> {
    pub spec: &'a StepSpec,
    pub adapter: Arc<dyn AgentAdapter>,
}

/// ステップ実行の結果
///
/// 成功した場合はコンテキストに取り込むためのアダプター出力を持ちます。
#[derive(Debug)]
pub struct StepExecution {
    pub result: StepResult,
    pub output: Option<AgentOutput>,
}

/// ステップ実行器
#[derive(Debug, Clone)]
pub struct StepExecutor {
    default_timeout: Duration,
    retry_delay: Duration,
}

impl StepExecutor {
    /// # 引数
    ///
    /// * `default_timeout` - ステップで上書きされていない場合のタイムアウト
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// ステップの実効タイムアウト
    pub fn timeout_for(&self, spec: &StepSpec) -> Duration {
        spec.overrides().timeout.unwrap_or(self.default_timeout)
    }

    /// ステップを実行する
    ///
    /// リトライ回数が設定されている場合、失敗した試行を最大その回数だけやり直します。
    /// 最後の試行の結果がステップの結果になります。
    pub async fn execute(
        &self,
        step: &BoundStep<'_>,
        task: &str,
        context: &ExecutionContext,
    ) -> StepExecution {
        let spec = step.spec;
        let timeout = self.timeout_for(spec);
        let max_retries = spec.overrides().retry_count.unwrap_or(0);

        let started_at = Utc::now();
        let start = Instant::now();
        let mut token_usage = TokenUsage::default();
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;
            let input = self.build_input(spec, task, context, timeout);

            let attempt = run_attempt(step.adapter.clone(), input, timeout).await;
            let attempt = match attempt {
                Ok(output) => {
                    token_usage = token_usage + output.token_usage;
                    if output.success {
                        Ok(output)
                    } else {
                        let message = output
                            .error
                            .clone()
                            .unwrap_or_else(|| "agent reported failure".to_string());
                        Err(StepError::new(StepErrorKind::Execution, message))
                    }
                }
                Err(AttemptError::Timeout) => Err(StepError::timeout(spec.id(), timeout)),
                Err(AttemptError::Agent(err)) => Err(classify_agent_error(err)),
                Err(AttemptError::Panicked(message)) => Err(StepError::new(
                    StepErrorKind::Internal,
                    format!("adapter panicked: {}", message),
                )),
                Err(AttemptError::Aborted) => Err(StepError::new(
                    StepErrorKind::Internal,
                    "adapter task was cancelled",
                )),
            };

            match attempt {
                Ok(output) => break Ok(output),
                Err(error) if attempts <= max_retries => {
                    warn!(
                        step = %spec.id(),
                        attempt = attempts,
                        max_retries,
                        error = %error,
                        "step attempt failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(error) => break Err(error),
            }
        };

        let duration = start.elapsed();
        let ended_at = Utc::now();

        let mut result = StepResult {
            step_id: spec.id().to_string(),
            agent: spec.agent().clone(),
            outcome: StepOutcome::Success,
            output: None,
            error: None,
            skip_reason: None,
            started_at,
            ended_at,
            duration,
            attempts,
            token_usage,
        };

        match outcome {
            Ok(output) => {
                debug!(step = %spec.id(), attempts, ?duration, "step succeeded");
                result.output = Some(output.output.clone());
                StepExecution {
                    result,
                    output: Some(output),
                }
            }
            Err(error) => {
                result.outcome = StepOutcome::Failed;
                result.error = Some(error);
                StepExecution {
                    result,
                    output: None,
                }
            }
        }
    }

    fn build_input(
        &self,
        spec: &StepSpec,
        task: &str,
        context: &ExecutionContext,
        timeout: Duration,
    ) -> AgentInput {
        let mut focus_keys: Vec<String> = spec.inputs().to_vec();
        for alias in spec.context_mapping().values() {
            if !focus_keys.contains(alias) {
                focus_keys.push(alias.clone());
            }
        }

        AgentInput {
            task: task.to_string(),
            step_id: spec.id().to_string(),
            agent: spec.agent().clone(),
            description: spec.description().to_string(),
            context: context.view_for(spec),
            focus_keys,
            config: StepConfig {
                model: spec.overrides().model.clone(),
                timeout,
            },
        }
    }
}

/// 1回の試行の失敗
enum AttemptError {
    Timeout,
    Agent(AgentError),
    Panicked(String),
    Aborted,
}

/// アダプターを別タスクで実行し、パニックとタイムアウトを捕捉する
async fn run_attempt(
    adapter: Arc<dyn AgentAdapter>,
    input: AgentInput,
    timeout: Duration,
) -> Result<AgentOutput, AttemptError> {
    let mut handle = tokio::spawn(async move { adapter.run(input).await });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(output))) => Ok(output),
        Ok(Ok(Err(err))) => Err(AttemptError::Agent(err)),
        Ok(Err(join_err)) if join_err.is_panic() => {
            Err(AttemptError::Panicked(panic_message(join_err.into_panic())))
        }
        Ok(Err(_)) => Err(AttemptError::Aborted),
        Err(_) => {
            handle.abort();
            Err(AttemptError::Timeout)
        }
    }
}

fn classify_agent_error(err: AgentError) -> StepError {
    match err {
        AgentError::Provider(e) => StepError::new(StepErrorKind::Provider, e.to_string()),
        other => StepError::new(StepErrorKind::Execution, other.to_string()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
