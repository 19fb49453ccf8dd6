//! ワークフロー実行のシナリオテスト
//!
//! 推論サービスの代わりにスクリプト化したアダプターを登録し、
//! 公開APIだけを使って実行エンジンの振る舞いを確認します。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use local_agents::agent::{AdapterRegistry, AgentAdapter, AgentInput, AgentOutput};
use local_agents::config::{AgentKind, StepSpec, WorkflowCatalog, WorkflowDefinition};
use local_agents::engine::{
    EngineConfig, FailurePolicy, RunState, SkipReason, StepErrorKind, StepOutcome, WorkflowExecutor,
};
use local_agents::error::{AgentError, WorkflowError};

/// ステップごとの振る舞い
#[derive(Clone)]
enum Script {
    Reply(&'static str),
    ReplyWith(&'static str, &'static str, &'static str),
    Fail(&'static str),
    Sleep(Duration),
    Cancel(CancellationToken),
}

/// ステップIDで振る舞いを切り替えるアダプター
///
/// 呼び出されたステップIDを順に記録します。
#[derive(Clone, Default)]
struct Scripted {
    scripts: Arc<HashMap<String, Script>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Scripted {
    fn new(scripts: impl IntoIterator<Item = (&'static str, Script)>) -> Self {
        Self {
            scripts: Arc::new(
                scripts
                    .into_iter()
                    .map(|(id, s)| (id.to_string(), s))
                    .collect(),
            ),
            calls: Arc::default(),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// 組み込みの4種別と `custom:lint` に自身を登録した登録簿
    fn registry(&self) -> AdapterRegistry {
        let adapter: Arc<dyn AgentAdapter> = Arc::new(self.clone());
        AgentKind::BUILTIN
            .into_iter()
            .chain([AgentKind::Custom("lint".to_string())])
            .fold(AdapterRegistry::new(), |registry, kind| {
                registry.with(kind, adapter.clone())
            })
    }
}

#[async_trait]
impl AgentAdapter for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
        self.calls.lock().unwrap().push(input.step_id.clone());

        match self.scripts.get(&input.step_id).cloned() {
            Some(Script::Reply(text)) => Ok(AgentOutput::success(text)),
            Some(Script::ReplyWith(text, key, value)) => {
                Ok(AgentOutput::success(text).with_artifact(key, value))
            }
            Some(Script::Fail(message)) => Ok(AgentOutput::failure(message)),
            Some(Script::Sleep(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(AgentOutput::success("late"))
            }
            Some(Script::Cancel(token)) => {
                token.cancel();
                Ok(AgentOutput::success("cancelled the run"))
            }
            None => Ok(AgentOutput::success(format!("{} done", input.step_id))),
        }
    }
}

fn executor(adapter: &Scripted, policy: FailurePolicy) -> WorkflowExecutor {
    WorkflowExecutor::new(
        adapter.registry(),
        EngineConfig::default().with_failure_policy(policy),
    )
    .with_retry_delay(Duration::ZERO)
}

fn outcomes(result: &local_agents::engine::WorkflowResult) -> Vec<(&str, StepOutcome)> {
    result
        .steps
        .iter()
        .map(|s| (s.step_id.as_str(), s.outcome))
        .collect()
}

/// 組み込みの bug-fix ワークフローがすべて成功する
#[tokio::test]
async fn test_bug_fix_workflow_succeeds() {
    let adapter = Scripted::new([
        ("plan", Script::Reply("1. reproduce 2. fix null check")),
        ("code", Script::Reply("if user.is_none() { return }")),
        ("test", Script::Reply("test_login_without_user passes")),
    ]);
    let catalog = WorkflowCatalog::builtin();
    let workflow = catalog.get("bug-fix").unwrap();

    let result = executor(&adapter, FailurePolicy::FailFast)
        .run(workflow, "fix the login crash", BTreeMap::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.completed_steps, 3);
    assert_eq!(result.total_steps, 3);
    assert!(result.summary().starts_with("3/3 steps completed in "));
    assert_eq!(adapter.calls(), ["plan", "code", "test"]);

    // エイリアスと主出力がコンテキストに残る
    assert_eq!(
        result.context.get("plan_output"),
        Some(&json!("1. reproduce 2. fix null check"))
    );
    assert_eq!(
        result.context.get("latest_output"),
        Some(&json!("test_login_without_user passes"))
    );
    assert_eq!(result.context.get("task"), Some(&json!("fix the login crash")));
}

/// タイムアウトしたステップは失敗として記録され、後続は中断される
#[tokio::test(start_paused = true)]
async fn test_step_timeout_aborts_run() {
    let adapter = Scripted::new([("code", Script::Sleep(Duration::from_secs(120)))]);
    let workflow = WorkflowDefinition::new(
        "bug-fix",
        vec![
            StepSpec::new("plan", AgentKind::Plan),
            StepSpec::new("code", AgentKind::Code)
                .depends_on(["plan"])
                .with_timeout(Duration::from_secs(30)),
            StepSpec::new("test", AgentKind::Test).depends_on(["code"]),
        ],
    )
    .unwrap();

    let result = executor(&adapter, FailurePolicy::FailFast)
        .run(&workflow, "fix the login crash", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(
        outcomes(&result),
        [
            ("plan", StepOutcome::Success),
            ("code", StepOutcome::Failed),
            ("test", StepOutcome::Skipped),
        ]
    );
    assert_eq!(result.state, RunState::Aborted);
    assert!(!result.success);

    let code = result.step("code").unwrap();
    assert_eq!(code.error.as_ref().unwrap().kind, StepErrorKind::Timeout);
    assert!(code.duration >= Duration::from_secs(30));
    assert!(code.duration < Duration::from_secs(31));
    assert_eq!(
        result.step("test").unwrap().skip_reason,
        Some(SkipReason::Aborted {
            failed_step: "code".to_string()
        })
    );
    assert_eq!(result.summary(), "1/3 steps completed in 30.0s; failed at 'code'");
}

/// fail-fast では依存関係のないステップも実行されない
#[tokio::test]
async fn test_fail_fast_stops_everything() {
    let adapter = Scripted::new([("lint", Script::Fail("3 warnings"))]);
    let workflow = WorkflowDefinition::new(
        "lint-then-plan",
        vec![
            StepSpec::new("lint", AgentKind::Custom("lint".to_string())),
            StepSpec::new("plan", AgentKind::Plan),
            StepSpec::new("code", AgentKind::Code).depends_on(["plan"]),
        ],
    )
    .unwrap();

    let result = executor(&adapter, FailurePolicy::FailFast)
        .run(&workflow, "t", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(adapter.calls(), ["lint"]);
    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(result.failed_steps().len(), 1);
    assert_eq!(result.skipped_steps().len(), 2);
    assert!(result.error.as_deref().unwrap().contains("lint"));
}

/// continue 方針では失敗に依存しないステップだけが続行される
#[tokio::test]
async fn test_continue_policy_skips_transitive_dependents() {
    let adapter = Scripted::new([("code", Script::Fail("compile error"))]);
    let workflow = WorkflowDefinition::new(
        "feature",
        vec![
            StepSpec::new("plan", AgentKind::Plan),
            StepSpec::new("code", AgentKind::Code).depends_on(["plan"]),
            StepSpec::new("test", AgentKind::Test).depends_on(["code"]),
            StepSpec::new("review", AgentKind::Review).depends_on(["test"]),
            StepSpec::new("lint", AgentKind::Custom("lint".to_string())).depends_on(["plan"]),
        ],
    )
    .unwrap();

    let result = executor(&adapter, FailurePolicy::Continue)
        .run(&workflow, "t", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(adapter.calls(), ["plan", "code", "lint"]);
    assert_eq!(result.state, RunState::Completed);
    assert!(!result.success);
    assert_eq!(
        outcomes(&result),
        [
            ("plan", StepOutcome::Success),
            ("code", StepOutcome::Failed),
            ("test", StepOutcome::Skipped),
            ("review", StepOutcome::Skipped),
            ("lint", StepOutcome::Success),
        ]
    );

    // 推移的な依存先でも根本原因は code
    let failed_code = Some(SkipReason::FailedDependency {
        root: "code".to_string(),
    });
    assert_eq!(result.step("test").unwrap().skip_reason, failed_code);
    assert_eq!(result.step("review").unwrap().skip_reason, failed_code);
    assert_eq!(result.summary().split("; ").nth(1), Some("failed at 'code'"));
}

/// 同じキーへの書き込みは後勝ち
#[tokio::test]
async fn test_context_last_writer_wins() {
    let adapter = Scripted::new([
        ("first", Script::ReplyWith("a", "verdict", "needs work")),
        ("second", Script::ReplyWith("b", "verdict", "approved")),
    ]);
    let workflow = WorkflowDefinition::new(
        "reviews",
        vec![
            StepSpec::new("first", AgentKind::Review).with_outputs(["verdict"]),
            StepSpec::new("second", AgentKind::Review)
                .depends_on(["first"])
                .with_inputs(["verdict"])
                .with_outputs(["verdict"]),
        ],
    )
    .unwrap();

    let result = executor(&adapter, FailurePolicy::FailFast)
        .run(&workflow, "t", BTreeMap::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.context.get("verdict"), Some(&json!("approved")));
    assert_eq!(result.context.get("first_output"), Some(&json!("a")));
    assert_eq!(result.context.get("latest_output"), Some(&json!("b")));
}

/// 循環（自己依存を含む）はステップを1つも実行せずに報告される
#[tokio::test]
async fn test_cycles_rejected_before_any_step() {
    let adapter = Scripted::default();
    let exec = executor(&adapter, FailurePolicy::FailFast);

    let cycle = WorkflowDefinition::new(
        "cycle",
        vec![
            StepSpec::new("plan", AgentKind::Plan),
            StepSpec::new("code", AgentKind::Code).depends_on(["plan", "test"]),
            StepSpec::new("test", AgentKind::Test).depends_on(["code"]),
        ],
    )
    .unwrap();
    match exec.run(&cycle, "t", BTreeMap::new()).await {
        Err(WorkflowError::Cycle { steps }) => assert_eq!(steps, ["code", "test"]),
        other => panic!("Expected Cycle, got {:?}", other.map(|r| r.state)),
    }

    let self_dep = WorkflowDefinition::new(
        "self",
        vec![StepSpec::new("review", AgentKind::Review).depends_on(["review"])],
    )
    .unwrap();
    match exec.run(&self_dep, "t", BTreeMap::new()).await {
        Err(WorkflowError::Cycle { steps }) => assert_eq!(steps, ["review"]),
        other => panic!("Expected Cycle, got {:?}", other.map(|r| r.state)),
    }

    assert!(adapter.calls().is_empty());
}

/// 入力キーの供給元がなければ実行前にエラーになる
#[tokio::test]
async fn test_missing_input_rejected_before_any_step() {
    let adapter = Scripted::default();
    let workflow = WorkflowDefinition::new(
        "w",
        vec![
            StepSpec::new("plan", AgentKind::Plan),
            StepSpec::new("review", AgentKind::Review).with_inputs(["file_content"]),
        ],
    )
    .unwrap();

    let result = executor(&adapter, FailurePolicy::FailFast)
        .run(&workflow, "t", BTreeMap::new())
        .await;
    assert!(matches!(
        result,
        Err(WorkflowError::MissingInput { ref step, ref key }) if step == "review" && key == "file_content"
    ));
    assert!(adapter.calls().is_empty());

    // 初期値として与えれば実行できる
    let seed = BTreeMap::from([("file_content".to_string(), json!("fn main() {}"))]);
    let result = executor(&adapter, FailurePolicy::FailFast)
        .run(&workflow, "t", seed)
        .await
        .unwrap();
    assert!(result.success);
}

/// 同じ定義からは常に同じ順序で実行される
#[tokio::test]
async fn test_execution_order_is_deterministic() {
    let workflow = WorkflowDefinition::new(
        "fan-out",
        vec![
            StepSpec::new("review", AgentKind::Review).depends_on(["plan"]),
            StepSpec::new("lint", AgentKind::Custom("lint".to_string())),
            StepSpec::new("plan", AgentKind::Plan),
            StepSpec::new("test", AgentKind::Test).depends_on(["plan"]),
        ],
    )
    .unwrap();

    for _ in 0..5 {
        let adapter = Scripted::default();
        let result = executor(&adapter, FailurePolicy::FailFast)
            .run(&workflow, "t", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(adapter.calls(), ["lint", "plan", "review", "test"]);
        assert!(result.success);
    }
}

/// 実行中のキャンセルは現在のステップの完了後に反映される
#[tokio::test]
async fn test_cancellation_between_steps() {
    let token = CancellationToken::new();
    let adapter = Scripted::new([("plan", Script::Cancel(token.clone()))]);
    let workflow =
        WorkflowDefinition::linear("chain", [AgentKind::Plan, AgentKind::Code, AgentKind::Test])
            .unwrap();

    let result = executor(&adapter, FailurePolicy::Continue)
        .with_cancellation(token)
        .run(&workflow, "t", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(adapter.calls(), ["plan"]);
    assert_eq!(result.state, RunState::Aborted);
    assert!(!result.success);
    assert_eq!(result.step("plan").unwrap().outcome, StepOutcome::Success);
    for id in ["code", "test"] {
        assert_eq!(
            result.step(id).unwrap().skip_reason,
            Some(SkipReason::Cancelled)
        );
    }
    assert!(result.summary().ends_with("; cancelled"));
}

/// 失敗した試行はリトライされ、試行回数が記録される
#[tokio::test]
async fn test_retry_records_attempts() {
    let adapter = Scripted::new([("code", Script::Fail("flaky"))]);
    let workflow = WorkflowDefinition::new(
        "w",
        vec![StepSpec::new("code", AgentKind::Code).with_retry_count(2)],
    )
    .unwrap();

    let result = executor(&adapter, FailurePolicy::FailFast)
        .run(&workflow, "t", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(adapter.calls(), ["code", "code", "code"]);
    let code = result.step("code").unwrap();
    assert_eq!(code.attempts, 3);
    assert_eq!(code.error.as_ref().unwrap().kind, StepErrorKind::Execution);
    assert_eq!(code.error.as_ref().unwrap().message, "flaky");
}

/// 最後のステップが fail-fast で失敗しても実行状態とエラーが一致する
#[tokio::test]
async fn test_last_step_failure_aborts_run() {
    let adapter = Scripted::new([("test", Script::Fail("2 tests failed"))]);
    let catalog = WorkflowCatalog::builtin();
    let workflow = catalog.get("bug-fix").unwrap();

    let result = executor(&adapter, FailurePolicy::FailFast)
        .run(workflow, "fix the login crash", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(adapter.calls(), ["plan", "code", "test"]);
    assert!(!result.success);
    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(result.completed_steps, 2);
    assert!(result.skipped_steps().is_empty());
    assert_eq!(
        result.error.as_deref(),
        Some("ステップ 'test' が失敗したため中断しました: execution: 2 tests failed")
    );
    assert!(result.summary().ends_with("; failed at 'test'"));
}

/// 単一ステップのワークフローが失敗した場合
#[tokio::test]
async fn test_single_step_failure_aborts_run() {
    let adapter = Scripted::new([("review", Script::Fail("model unavailable"))]);
    let workflow = WorkflowDefinition::linear("review-only", [AgentKind::Review]).unwrap();

    let result = executor(&adapter, FailurePolicy::FailFast)
        .run(&workflow, "t", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(result.completed_steps, 0);
    assert_eq!(result.total_steps, 1);
    assert_eq!(
        result.error.as_deref(),
        Some("ステップ 'review' が失敗したため中断しました: execution: model unavailable")
    );
}

/// 先頭のステップが失敗すると依存の連鎖はすべて中断としてスキップされる
#[tokio::test]
async fn test_fail_fast_chain_root_failure() {
    let adapter = Scripted::new([("a", Script::Fail("boom"))]);
    let workflow = WorkflowDefinition::new(
        "chain",
        vec![
            StepSpec::new("a", AgentKind::Plan),
            StepSpec::new("b", AgentKind::Code).depends_on(["a"]),
            StepSpec::new("c", AgentKind::Test).depends_on(["b"]),
        ],
    )
    .unwrap();

    let result = executor(&adapter, FailurePolicy::FailFast)
        .run(&workflow, "t", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(adapter.calls(), ["a"]);
    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(result.completed_steps, 0);
    assert_eq!(result.failed_steps().len(), 1);
    let aborted = Some(SkipReason::Aborted {
        failed_step: "a".to_string(),
    });
    assert_eq!(result.step("b").unwrap().skip_reason, aborted);
    assert_eq!(result.step("c").unwrap().skip_reason, aborted);
    assert_eq!(
        result.error.as_deref(),
        Some("ステップ 'a' が失敗したため中断しました: execution: boom")
    );
}
