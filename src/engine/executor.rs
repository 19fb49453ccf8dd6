//! ワークフロー実行エンジン
//!
//! # 責務
//!
//! このモジュールは、ワークフローの実行を制御する [`WorkflowExecutor`] を提供します。
//! ワークフロー定義を受け取り、依存関係の順にステップを1つずつ実行し、
//! ステップ間でコンテキストを受け渡します。
//!
//! # 実行フロー
//!
//! 1. 準備（[`WorkflowExecutor::prepare`]）
//!    - 実行順序の決定（循環・未知の依存先の検出）
//!    - 入力キーの検査
//!    - 各ステップとアダプターの結び付け
//! 2. コンテキストの初期化（タスクと初期値）
//! 3. 実行順に各ステップを処理
//!    - キャンセル要求 → 残りすべて `Cancelled` でスキップ
//!    - 依存先の失敗 → `FailedDependency` でスキップ
//!    - 依存先のスキップ → `DependencySkipped` でスキップ
//!    - 条件不成立 → `ConditionNotMet` でスキップ
//!    - それ以外は実行し、成功したら出力をコンテキストに取り込む
//! 4. 結果の集計（[`aggregator::build`](super::aggregator::build)）
//!
//! 準備段階のエラーは [`WorkflowError`] として返され、ステップは1つも実行されません。
//! 実行が始まった後の失敗はすべて [`WorkflowResult`] に記録されます。
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use local_agents::agent::AdapterRegistry;
//! use local_agents::config::{Settings, WorkflowCatalog};
//! use local_agents::engine::WorkflowExecutor;
//! use local_agents::provider::create_provider;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::default();
//!     let registry = AdapterRegistry::from_settings(&settings, create_provider(&settings));
//!     let executor = WorkflowExecutor::new(registry, settings.engine_config());
//!
//!     let catalog = WorkflowCatalog::builtin();
//!     let workflow = catalog.get("bug-fix")?;
//!     let result = executor.run(workflow, "fix the login crash", BTreeMap::new()).await?;
//!
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::aggregator::{self, RunTiming};
use super::context::{ExecutionContext, TASK_KEY};
use super::resolver;
use super::result::{RunState, SkipReason, StepOutcome, StepResult, WorkflowResult};
use super::step::{BoundStep, StepExecutor};
use crate::agent::AdapterRegistry;
use crate::config::{StepSpec, WorkflowDefinition};
use crate::error::WorkflowError;

/// ステップ失敗時の方針
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// 最初の失敗で残りのステップをすべて中断する
    #[default]
    FailFast,
    /// 失敗したステップに（推移的に）依存するステップだけをスキップし、残りは続行する
    Continue,
}

/// エンジン設定
///
/// 実行器に値として渡されます。エンジンがグローバルな設定を読むことはありません。
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub failure_policy: FailurePolicy,
    /// ステップで上書きされていない場合のタイムアウト
    pub default_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::FailFast,
            default_timeout: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// 実行準備の済んだワークフロー
///
/// ステップは実行順に並び、それぞれアダプターに結び付けられています。
pub struct PreparedWorkflow<'a> {
    definition: &'a WorkflowDefinition,
    steps: Vec<BoundStep<'a>>,
}

impl<'a> PreparedWorkflow<'a> {
    pub fn definition(&self) -> &'a WorkflowDefinition {
        self.definition
    }

    /// 実行順のステップID
    pub fn order(&self) -> Vec<&'a str> {
        self.steps.iter().map(|s| s.spec.id()).collect()
    }
}

/// ワークフロー実行エンジン
///
/// # 例
///
/// ```rust
/// use local_agents::agent::AdapterRegistry;
/// use local_agents::engine::{EngineConfig, FailurePolicy, WorkflowExecutor};
///
/// let executor = WorkflowExecutor::new(
///     AdapterRegistry::new(),
///     EngineConfig::default().with_failure_policy(FailurePolicy::Continue),
/// );
/// assert_eq!(executor.config().failure_policy, FailurePolicy::Continue);
/// ```
pub struct WorkflowExecutor {
    registry: AdapterRegistry,
    config: EngineConfig,
    step_executor: StepExecutor,
    cancellation: CancellationToken,
}

impl WorkflowExecutor {
    /// 新しい実行器を生成
    ///
    /// # 引数
    ///
    /// * `registry` - エージェント種別とアダプターの対応表
    /// * `config` - エンジン設定
    pub fn new(registry: AdapterRegistry, config: EngineConfig) -> Self {
        let step_executor = StepExecutor::new(config.default_timeout);
        Self {
            registry,
            config,
            step_executor,
            cancellation: CancellationToken::new(),
        }
    }

    /// キャンセル用のトークンを設定
    ///
    /// キャンセルはステップの間でだけ確認されます。実行中のステップは最後まで実行されます。
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// リトライ前の待機時間を変更
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.step_executor = self.step_executor.with_retry_delay(delay);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// この実行器のキャンセル用トークン
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// ワークフローを実行できる状態にする
    ///
    /// # 戻り値
    ///
    /// * `Err(WorkflowError::Cycle)` / `Err(WorkflowError::UnknownDependency)` - 依存関係が不正
    /// * `Err(WorkflowError::MissingInput)` - 入力キーの供給元がない
    /// * `Err(WorkflowError::UnknownAgentKind)` - アダプターが登録されていない種別がある
    pub fn prepare<'a>(
        &self,
        definition: &'a WorkflowDefinition,
        seed_keys: &BTreeSet<String>,
    ) -> Result<PreparedWorkflow<'a>, WorkflowError> {
        let order = resolver::resolve_indices(definition.steps())?;
        resolver::validate_inputs(definition.steps(), seed_keys)?;

        let steps = order
            .into_iter()
            .map(|i| {
                let spec = &definition.steps()[i];
                let adapter = self.registry.get(spec.agent()).ok_or_else(|| {
                    WorkflowError::UnknownAgentKind {
                        step: spec.id().to_string(),
                        kind: spec.agent().to_string(),
                    }
                })?;
                Ok(BoundStep { spec, adapter })
            })
            .collect::<Result<Vec<_>, WorkflowError>>()?;

        Ok(PreparedWorkflow { definition, steps })
    }

    /// ワークフローを実行
    ///
    /// # 引数
    ///
    /// * `definition` - 実行するワークフロー
    /// * `task` - タスクの説明（コンテキストの `task` に格納される）
    /// * `seed` - 初期コンテキスト
    ///
    /// # 戻り値
    ///
    /// * `Ok(WorkflowResult)` - 実行が始まった場合（ステップの失敗を含む）
    /// * `Err(WorkflowError)` - 準備段階で検出された構成エラー
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        task: &str,
        seed: BTreeMap<String, Value>,
    ) -> Result<WorkflowResult, WorkflowError> {
        let mut seed_keys: BTreeSet<String> = seed.keys().cloned().collect();
        seed_keys.insert(TASK_KEY.to_string());

        let prepared = self.prepare(definition, &seed_keys)?;
        Ok(self.run_prepared(&prepared, task, seed).await)
    }

    /// 準備済みのワークフローを実行
    pub async fn run_prepared(
        &self,
        prepared: &PreparedWorkflow<'_>,
        task: &str,
        seed: BTreeMap<String, Value>,
    ) -> WorkflowResult {
        let definition = prepared.definition;
        let mut state = RunState::NotStarted;
        let mut context = ExecutionContext::seed(task, seed);

        let started_at = Utc::now();
        let start = Instant::now();
        transition(definition.name(), &mut state, RunState::Running);
        info!(
            workflow = %definition.name(),
            steps = prepared.steps.len(),
            policy = ?self.config.failure_policy,
            "workflow started"
        );

        let mut results: Vec<StepResult> = Vec::with_capacity(prepared.steps.len());
        let mut by_id: HashMap<&str, usize> = HashMap::new();
        let mut halt: Option<SkipReason> = None;

        for bound in &prepared.steps {
            let spec = bound.spec;

            if halt.is_none() && self.cancellation.is_cancelled() {
                warn!(workflow = %definition.name(), step = %spec.id(), "cancellation requested");
                halt = Some(SkipReason::Cancelled);
            }

            let skip = match &halt {
                Some(reason) => Some(reason.clone()),
                None => skip_reason(spec, &results, &by_id, &context),
            };

            let result = match skip {
                Some(reason) => {
                    info!(step = %spec.id(), reason = %reason, "step skipped");
                    StepResult::skipped(spec.id(), spec.agent().clone(), reason)
                }
                None => {
                    info!(step = %spec.id(), agent = %spec.agent(), "step started");
                    let execution = self.step_executor.execute(bound, task, &context).await;

                    if let Some(output) = &execution.output {
                        context.merge_output(spec.id(), output);
                    }

                    let result = execution.result;
                    match &result.error {
                        None => info!(
                            step = %spec.id(),
                            duration_ms = result.duration.as_millis() as u64,
                            "step finished"
                        ),
                        Some(error) => {
                            warn!(step = %spec.id(), error = %error, "step failed");
                            if self.config.failure_policy == FailurePolicy::FailFast {
                                halt = Some(SkipReason::Aborted {
                                    failed_step: spec.id().to_string(),
                                });
                            }
                        }
                    }
                    result
                }
            };

            by_id.insert(spec.id(), results.len());
            results.push(result);
        }

        let final_state = if halt.is_some() {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        transition(definition.name(), &mut state, final_state);

        let timing = RunTiming {
            started_at,
            ended_at: Utc::now(),
            total_duration: start.elapsed(),
        };
        let result = aggregator::build(
            definition.name(),
            task,
            results,
            context.into_snapshot(),
            halt.as_ref(),
            timing,
        );

        info!(
            workflow = %definition.name(),
            state = %result.state,
            success = result.success,
            "{}",
            result.summary()
        );
        result
    }
}

/// 状態遷移（終端状態からは遷移しない）
fn transition(workflow: &str, state: &mut RunState, next: RunState) {
    if state.is_terminal() {
        return;
    }
    tracing::debug!(workflow, from = %state, to = %next, "run state changed");
    *state = next;
}

/// 依存先と条件からスキップ理由を決める
fn skip_reason(
    spec: &StepSpec,
    results: &[StepResult],
    by_id: &HashMap<&str, usize>,
    context: &ExecutionContext,
) -> Option<SkipReason> {
    let deps: Vec<&StepResult> = spec
        .dependencies()
        .iter()
        .filter_map(|dep| by_id.get(dep.as_str()).map(|&i| &results[i]))
        .collect();

    // 失敗の根本原因を優先
    for dep in &deps {
        match (&dep.outcome, &dep.skip_reason) {
            (StepOutcome::Failed, _) => {
                return Some(SkipReason::FailedDependency {
                    root: dep.step_id.clone(),
                });
            }
            (StepOutcome::Skipped, Some(SkipReason::FailedDependency { root })) => {
                return Some(SkipReason::FailedDependency { root: root.clone() });
            }
            (StepOutcome::Skipped, Some(reason)) if reason.forces_failure() => {
                return Some(SkipReason::FailedDependency {
                    root: dep.step_id.clone(),
                });
            }
            _ => {}
        }
    }

    if let Some(dep) = deps.iter().find(|d| d.is_skipped()) {
        return Some(SkipReason::DependencySkipped {
            dependency: dep.step_id.clone(),
        });
    }

    match spec.condition() {
        Some(condition) if !condition.evaluate(context.values()) => {
            Some(SkipReason::ConditionNotMet {
                condition: condition.to_string(),
            })
        }
        _ => None,
    }
}
