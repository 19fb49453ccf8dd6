//! 実行結果の集計
//!
//! # 責務
//!
//! - ステップ結果の列から [`WorkflowResult`] を組み立てる（成否、終端状態、中断理由）
//! - 結果のビュー: 成功・失敗・スキップしたステップ、1行サマリー、JSON、Markdown レポート

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::context::ContextSnapshot;
use super::result::{RunState, SkipReason, StepOutcome, StepResult, WorkflowResult};
use crate::provider::TokenUsage;

/// 実行の時刻と所要時間
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunTiming {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// 実行全体の所要時間（単調時計で計測したもの）
    pub total_duration: Duration,
}

/// ステップ結果から実行結果を組み立てる
///
/// - `success`: 失敗したステップも、強制スキップ（`FailedDependency` / `Aborted` / `Cancelled`）もない
/// - `state`: 実行器が中断した（`halt` がある）場合は `Aborted`、なければ `Completed`
/// - `error`: 中断した場合の理由
///
/// 最後のステップが fail-fast で失敗した場合はスキップされたステップが残らないため、
/// 終端状態はステップ結果からではなく `halt` から決めます。
///
/// # 引数
///
/// * `halt` - 実行器が残りのステップを打ち切った理由
/// * `timing` - 開始・終了時刻と所要時間
pub fn build(
    workflow_name: &str,
    task: &str,
    steps: Vec<StepResult>,
    context: ContextSnapshot,
    halt: Option<&SkipReason>,
    timing: RunTiming,
) -> WorkflowResult {
    let success = steps.iter().all(|s| !s.is_failed() && !s.is_forced_skip());
    let completed_steps = steps.iter().filter(|s| s.is_success()).count();
    let token_usage: TokenUsage = steps.iter().map(|s| s.token_usage).sum();

    let (state, error) = match halt {
        Some(SkipReason::Aborted { failed_step }) => {
            let detail = steps
                .iter()
                .find(|s| &s.step_id == failed_step)
                .and_then(|s| s.error.as_ref())
                .map(|e| format!(": {}", e))
                .unwrap_or_default();
            (
                RunState::Aborted,
                Some(format!(
                    "ステップ '{}' が失敗したため中断しました{}",
                    failed_step, detail
                )),
            )
        }
        Some(_) => (
            RunState::Aborted,
            Some("キャンセルされたため中断しました".to_string()),
        ),
        None => (RunState::Completed, None),
    };

    WorkflowResult {
        workflow_name: workflow_name.to_string(),
        task: task.to_string(),
        state,
        success,
        total_steps: steps.len(),
        completed_steps,
        steps,
        started_at: timing.started_at,
        ended_at: timing.ended_at,
        total_duration: timing.total_duration,
        token_usage,
        error,
        context,
    }
}

impl WorkflowResult {
    /// 成功したステップ（実行順）
    pub fn successful_steps(&self) -> Vec<&StepResult> {
        self.steps_with(StepOutcome::Success)
    }

    /// 失敗したステップ（実行順）
    pub fn failed_steps(&self) -> Vec<&StepResult> {
        self.steps_with(StepOutcome::Failed)
    }

    /// スキップされたステップ（実行順）
    pub fn skipped_steps(&self) -> Vec<&StepResult> {
        self.steps_with(StepOutcome::Skipped)
    }

    fn steps_with(&self, outcome: StepOutcome) -> Vec<&StepResult> {
        self.steps.iter().filter(|s| s.outcome == outcome).collect()
    }

    /// IDでステップ結果を検索
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == id)
    }

    /// 1行のサマリー
    ///
    /// 例: `3/4 steps completed in 42.1s; failed at 'test'`
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{}/{} steps completed in {:.1}s",
            self.completed_steps,
            self.total_steps,
            self.total_duration.as_secs_f64()
        );

        let failed: Vec<String> = self
            .failed_steps()
            .iter()
            .map(|s| format!("'{}'", s.step_id))
            .collect();
        if !failed.is_empty() {
            let _ = write!(summary, "; failed at {}", failed.join(", "));
        }

        let cancelled = self
            .steps
            .iter()
            .any(|s| s.skip_reason == Some(SkipReason::Cancelled));
        if cancelled {
            summary.push_str("; cancelled");
        }

        summary
    }

    /// 整形済み JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// プリミティブ（文字列、数値、真偽値、null、配列、オブジェクト）だけの入れ子
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Markdown 形式のレポート
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# {} Workflow Summary", title_case(&self.workflow_name));
        let _ = writeln!(md);
        let _ = writeln!(md, "**Task**: {}", self.task);
        let _ = writeln!(
            md,
            "**Completion**: {}/{} steps successful",
            self.completed_steps, self.total_steps
        );
        let _ = writeln!(md, "**Duration**: {:.1}s", self.total_duration.as_secs_f64());
        let _ = writeln!(md);

        if self.success {
            let _ = writeln!(md, "✅ **Status**: Workflow completed successfully");
        } else {
            let failures = self.failed_steps().len();
            let _ = writeln!(
                md,
                "⚠️ **Status**: Workflow {} with {} failure(s)",
                self.state, failures
            );
            if let Some(error) = &self.error {
                let _ = writeln!(md, "\n> {}", error);
            }
        }

        let _ = writeln!(md, "\n## Step Results");
        for (i, step) in self.steps.iter().enumerate() {
            let (icon, note) = match step.outcome {
                StepOutcome::Success => ("✅", format!("{:.1}s", step.duration.as_secs_f64())),
                StepOutcome::Failed => (
                    "❌",
                    step.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                ),
                StepOutcome::Skipped => (
                    "⏭️",
                    step.skip_reason
                        .as_ref()
                        .map(|r| format!("skipped: {}", r))
                        .unwrap_or_default(),
                ),
            };
            let _ = writeln!(md, "{}. {} `{}` ({} agent) - {}", i + 1, icon, step.step_id, step.agent, note);
        }

        md
    }
}

/// `bug-fix` -> `Bug-Fix`
fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_word_start = true;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.push(c);
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}
