//! ワークフロー実行結果の型定義
//!
//! # 責務
//!
//! - ステップ実行結果 [`StepResult`] の型定義
//! - ワークフロー実行結果 [`WorkflowResult`] の型定義
//! - 実行状態 [`RunState`]、ステップの結末 [`StepOutcome`] とスキップ理由 [`SkipReason`]
//! - ステップ失敗の分類 [`StepError`] / [`StepErrorKind`]
//!
//! 集計と表示用のビュー（`summary`、`to_json` など）は
//! [`aggregator`](super::aggregator) にあります。
//!
//! # 使用例
//!
//! ```rust,no_run
//! use local_agents::engine::{StepOutcome, WorkflowResult};
//!
//! fn handle_result(result: &WorkflowResult) {
//!     println!("{}", result.summary());
//!
//!     for step in &result.steps {
//!         if step.outcome == StepOutcome::Failed {
//!             println!("  {} failed: {:?}", step.step_id, step.error);
//!         }
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;

use super::context::ContextSnapshot;
use crate::config::AgentKind;
use crate::provider::TokenUsage;

/// ワークフロー実行の状態
///
/// `NotStarted → Running → {Completed, Aborted}` の順にだけ遷移します。
/// 終端状態（`Completed` / `Aborted`）から再開することはありません。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Running,
    /// 全ステップが終端状態に達した（失敗を含んでもよい）
    Completed,
    /// 失敗またはキャンセルにより残りのステップが実行されなかった
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::NotStarted => "not_started",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// ステップの結末
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failed,
    Skipped,
}

/// ステップがスキップされた理由
///
/// エラーではありません。ただし `FailedDependency` / `Aborted` / `Cancelled` は
/// ワークフロー全体を不成功にします（[`SkipReason::forces_failure`]）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// 依存先（推移的）が失敗した。`root` は最初に失敗したステップ
    FailedDependency { root: String },
    /// 依存先が条件不成立などでスキップされた
    DependencySkipped { dependency: String },
    /// 実行条件が偽だった
    ConditionNotMet { condition: String },
    /// fail-fast により中断された
    Aborted { failed_step: String },
    /// キャンセル要求により実行されなかった
    Cancelled,
}

impl SkipReason {
    /// ワークフローの成功判定を失敗にするスキップか
    pub fn forces_failure(&self) -> bool {
        matches!(
            self,
            SkipReason::FailedDependency { .. } | SkipReason::Aborted { .. } | SkipReason::Cancelled
        )
    }

    /// 実行全体を中断させたスキップか
    pub fn aborts_run(&self) -> bool {
        matches!(self, SkipReason::Aborted { .. } | SkipReason::Cancelled)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::FailedDependency { root } => write!(f, "dependency '{}' failed", root),
            SkipReason::DependencySkipped { dependency } => {
                write!(f, "dependency '{}' was skipped", dependency)
            }
            SkipReason::ConditionNotMet { condition } => {
                write!(f, "condition not met: {}", condition)
            }
            SkipReason::Aborted { failed_step } => {
                write!(f, "aborted after '{}' failed", failed_step)
            }
            SkipReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// ステップ失敗の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// タイムアウト
    Timeout,
    /// アダプターが失敗を報告した、または実行エラーを返した
    Execution,
    /// 推論サービスとの通信エラー
    Provider,
    /// アダプター内部のパニック等
    Internal,
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepErrorKind::Timeout => "timeout",
            StepErrorKind::Execution => "execution",
            StepErrorKind::Provider => "provider",
            StepErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// 失敗したステップのエラー
///
/// 例外として伝播せず [`StepResult::error`] に記録されます。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{kind}: {message}")]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// タイムアウトエラー
    pub fn timeout(step_id: &str, timeout: Duration) -> Self {
        Self::new(
            StepErrorKind::Timeout,
            format!(
                "ステップ '{}' が {}秒以内に完了しませんでした",
                step_id,
                timeout.as_secs_f64()
            ),
        )
    }
}

/// ステップ実行結果
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub agent: AgentKind,
    pub outcome: StepOutcome,

    /// 主出力（成功時のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// 失敗時のエラー
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,

    /// スキップ時の理由
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,

    /// 実行時間（秒として出力）
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,

    /// 試行回数（スキップ時は 0）
    pub attempts: u32,

    pub token_usage: TokenUsage,
}

impl StepResult {
    /// スキップされたステップの結果
    ///
    /// 開始・終了時刻はスキップを決定した時刻、実行時間は 0 になります。
    pub fn skipped(step_id: impl Into<String>, agent: AgentKind, reason: SkipReason) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            agent,
            outcome: StepOutcome::Skipped,
            output: None,
            error: None,
            skip_reason: Some(reason),
            started_at: now,
            ended_at: now,
            duration: Duration::ZERO,
            attempts: 0,
            token_usage: TokenUsage::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StepOutcome::Success
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == StepOutcome::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.outcome == StepOutcome::Skipped
    }

    /// ワークフローを不成功にするスキップか
    pub fn is_forced_skip(&self) -> bool {
        self.skip_reason.as_ref().is_some_and(SkipReason::forces_failure)
    }
}

/// ワークフロー実行結果
///
/// 実行が始まったワークフローは、失敗やキャンセルがあっても必ずこの形で報告されます。
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub workflow_name: String,
    pub task: String,

    /// 終端状態
    pub state: RunState,

    /// 全体の成否
    ///
    /// 失敗したステップも、`FailedDependency` / `Aborted` / `Cancelled` による
    /// スキップもない場合に `true`。
    pub success: bool,

    /// 実行順のステップ結果
    pub steps: Vec<StepResult>,

    pub total_steps: usize,
    /// 成功したステップ数
    pub completed_steps: usize,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,

    #[serde(rename = "total_duration_secs", serialize_with = "serialize_secs")]
    pub total_duration: Duration,

    pub token_usage: TokenUsage,

    /// 中断時の理由
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// 最終コンテキスト
    pub context: ContextSnapshot,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
