//! 実行結果のファイル出力
//!
//! 出力ディレクトリに次のファイルを書き込みます。
//!
//! - `<workflow>_summary.md` - Markdown 形式のレポート
//! - `step_<n>_<step_id>.txt` - 成功したステップの出力（`n` は実行順、1始まり）
//! - `<workflow>_result.json` - 実行結果の JSON（要求された場合のみ）

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::engine::WorkflowResult;

/// 書き込んだファイルの一覧
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFiles {
    pub summary: PathBuf,
    pub steps: Vec<PathBuf>,
    pub json: Option<PathBuf>,
}

impl ReportFiles {
    /// すべてのパス（サマリー、ステップ出力、JSON の順）
    pub fn all(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.summary.as_path())
            .chain(self.steps.iter().map(PathBuf::as_path))
            .chain(self.json.as_deref())
    }
}

/// 実行結果を出力ディレクトリに書き込む
///
/// ディレクトリが存在しない場合は作成します。同名のファイルは上書きされます。
///
/// # 引数
///
/// * `result` - 実行結果
/// * `dir` - 出力ディレクトリ
/// * `with_json` - `<workflow>_result.json` も書き込むか
pub fn write_report(
    result: &WorkflowResult,
    dir: impl AsRef<Path>,
    with_json: bool,
) -> io::Result<ReportFiles> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let name = file_stem(&result.workflow_name);
    let summary = dir.join(format!("{}_summary.md", name));
    fs::write(&summary, result.to_markdown())?;
    debug!(path = %summary.display(), "summary written");

    let mut steps = Vec::new();
    for (i, step) in result.steps.iter().enumerate() {
        let Some(output) = step.output.as_deref().filter(|_| step.is_success()) else {
            continue;
        };
        if output.is_empty() {
            continue;
        }
        let path = dir.join(format!("step_{}_{}.txt", i + 1, file_stem(&step.step_id)));
        fs::write(&path, output)?;
        steps.push(path);
    }

    let json = if with_json {
        let path = dir.join(format!("{}_result.json", name));
        let body = result.to_json().map_err(io::Error::other)?;
        fs::write(&path, body)?;
        Some(path)
    } else {
        None
    };

    Ok(ReportFiles {
        summary,
        steps,
        json,
    })
}

/// 名前をファイル名に使える文字（`[A-Za-z0-9_-]`）だけにする
///
/// それ以外の文字は `_` に置き換えるため、区切り文字や `..` で
/// 出力ディレクトリの外に書き込むことはない。
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "workflow".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;

    use crate::config::AgentKind;
    use crate::engine::aggregator::{self, RunTiming};
    use crate::engine::{ContextSnapshot, SkipReason, StepError, StepErrorKind, StepOutcome, StepResult};

    fn sample() -> WorkflowResult {
        let mut plan = StepResult::skipped("plan", AgentKind::Plan, SkipReason::Cancelled);
        plan.outcome = StepOutcome::Success;
        plan.skip_reason = None;
        plan.output = Some("1. write code".to_string());

        let mut code = StepResult::skipped("code", AgentKind::Code, SkipReason::Cancelled);
        code.outcome = StepOutcome::Failed;
        code.skip_reason = None;
        code.output = Some("partial".to_string());
        code.error = Some(StepError::new(StepErrorKind::Execution, "boom"));

        let test = StepResult::skipped(
            "test",
            AgentKind::Test,
            SkipReason::Aborted {
                failed_step: "code".to_string(),
            },
        );

        let now = Utc::now();
        aggregator::build(
            "bug-fix",
            "fix the crash",
            vec![plan, code, test],
            ContextSnapshot::default(),
            Some(&SkipReason::Aborted {
                failed_step: "code".to_string(),
            }),
            RunTiming {
                started_at: now,
                ended_at: now,
                total_duration: Duration::from_secs(3),
            },
        )
    }

    /// 成功したステップの出力だけが書き込まれる
    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out");

        let files = write_report(&sample(), &out, false).unwrap();

        assert_eq!(files.summary, out.join("bug-fix_summary.md"));
        assert_eq!(files.steps, vec![out.join("step_1_plan.txt")]);
        assert!(files.json.is_none());

        let summary = fs::read_to_string(&files.summary).unwrap();
        assert!(summary.starts_with("# Bug-Fix Workflow Summary"));
        assert_eq!(fs::read_to_string(&files.steps[0]).unwrap(), "1. write code");
        assert!(!out.join("step_2_code.txt").exists());
    }

    #[test]
    fn test_write_report_with_json() {
        let dir = tempfile::tempdir().unwrap();

        let files = write_report(&sample(), dir.path(), true).unwrap();

        let path = files.json.clone().unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["state"], "aborted");
        assert_eq!(value["steps"][2]["skip_reason"]["reason"], "aborted");
        assert_eq!(files.all().count(), 3);
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("bug-fix"), "bug-fix");
        assert_eq!(file_stem("../x"), "___x");
        assert_eq!(file_stem("a/b"), "a_b");
        assert_eq!(file_stem(""), "workflow");
    }

    /// 区切り文字を含むワークフロー名でも出力ディレクトリ内に書き込む
    #[test]
    fn test_write_report_stays_in_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let mut result = sample();
        result.workflow_name = "../escape".to_string();

        let files = write_report(&result, &out, true).unwrap();

        assert_eq!(files.summary, out.join("___escape_summary.md"));
        assert_eq!(files.json, Some(out.join("___escape_result.json")));
        assert!(files.all().all(|p| p.parent() == Some(out.as_path())));
        assert!(!dir.path().join("escape_summary.md").exists());
    }
}
