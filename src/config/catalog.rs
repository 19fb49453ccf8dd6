//! ワークフローの登録簿
//!
//! # 責務
//!
//! 名前からワークフロー定義を引けるようにする。
//!
//! - 組み込みワークフロー: `feature-dev`, `bug-fix`, `code-review`, `refactor`
//! - 設定ファイルの `[workflows]` に書かれた直列ワークフロー（同名の組み込みを上書き）
//! - 任意の [`WorkflowDefinition`] の追加登録（TOML ファイル由来など）

use std::collections::BTreeMap;

use super::settings::Settings;
use super::step::{AgentKind, StepSpec};
use super::workflow::WorkflowDefinition;
use crate::error::{ConfigError, WorkflowError};

/// 名前つきワークフロー定義の集合
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: BTreeMap<String, WorkflowDefinition>,
}

impl WorkflowCatalog {
    /// 空の登録簿
    pub fn new() -> Self {
        Self::default()
    }

    /// 組み込みワークフローを登録した登録簿
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for workflow in builtin_workflows() {
            catalog.insert(workflow);
        }
        catalog
    }

    /// 組み込みワークフローに設定ファイルのワークフローを重ねた登録簿
    pub fn with_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut catalog = Self::builtin();
        for (name, chain) in &settings.workflows {
            let kinds = chain
                .iter()
                .map(|entry| {
                    entry
                        .parse::<AgentKind>()
                        .map_err(|e| ConfigError::Validation(format!("workflows.{}: {}", name, e)))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let workflow = WorkflowDefinition::linear(name.as_str(), kinds)?
                .with_description(format!("Configured chain: {}", chain.join(" -> ")));
            catalog.insert(workflow);
        }
        Ok(catalog)
    }

    /// ワークフローを登録（同名があれば置き換え）
    pub fn insert(&mut self, workflow: WorkflowDefinition) {
        if self.workflows.contains_key(workflow.name()) {
            tracing::debug!(workflow = %workflow.name(), "replacing registered workflow");
        }
        self.workflows.insert(workflow.name().to_string(), workflow);
    }

    /// 名前でワークフローを取得
    pub fn get(&self, name: &str) -> Result<&WorkflowDefinition, WorkflowError> {
        self.workflows
            .get(name)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(name.to_string()))
    }

    /// 登録済みのワークフロー名（辞書順）
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(String::as_str)
    }

    /// 登録済みのワークフロー（名前の辞書順）
    pub fn iter(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.workflows.values()
    }
}

/// 組み込みワークフロー定義
///
/// 定数データから組み立てるため構築は失敗しない。
fn builtin_workflows() -> Vec<WorkflowDefinition> {
    let feature_dev = vec![
        StepSpec::new("plan", AgentKind::Plan).with_description("Create implementation plan"),
        StepSpec::new("code", AgentKind::Code)
            .with_description("Generate code implementation")
            .depends_on(["plan"])
            .map_context("plan_output", "implementation_plan"),
        StepSpec::new("test", AgentKind::Test)
            .with_description("Create and run tests")
            .depends_on(["code"])
            .map_context("code_output", "code_to_test"),
        StepSpec::new("review", AgentKind::Review)
            .with_description("Review implementation")
            .depends_on(["code"])
            .map_context("code_output", "code_to_review"),
    ];

    let bug_fix = vec![
        StepSpec::new("plan", AgentKind::Plan).with_description("Analyze bug and create fix plan"),
        StepSpec::new("code", AgentKind::Code)
            .with_description("Implement bug fix")
            .depends_on(["plan"])
            .map_context("plan_output", "fix_plan"),
        StepSpec::new("test", AgentKind::Test)
            .with_description("Test bug fix")
            .depends_on(["code"])
            .map_context("code_output", "fixed_code"),
    ];

    let code_review = vec![
        StepSpec::new("review", AgentKind::Review).with_description("Comprehensive code review"),
    ];

    let refactor = vec![
        StepSpec::new("plan", AgentKind::Plan).with_description("Create refactoring plan"),
        StepSpec::new("code", AgentKind::Code)
            .with_description("Implement refactoring")
            .depends_on(["plan"])
            .map_context("plan_output", "refactor_plan"),
        StepSpec::new("test", AgentKind::Test)
            .with_description("Test refactored code")
            .depends_on(["code"])
            .map_context("code_output", "refactored_code"),
        StepSpec::new("review", AgentKind::Review)
            .with_description("Review refactored implementation")
            .depends_on(["code"])
            .map_context("code_output", "code_to_review"),
    ];

    [
        ("feature-dev", "Plan, implement, test and review a new feature", feature_dev),
        ("bug-fix", "Analyze a bug, implement the fix and test it", bug_fix),
        ("code-review", "Comprehensive review of existing code", code_review),
        ("refactor", "Plan, implement, test and review a refactoring", refactor),
    ]
    .into_iter()
    .filter_map(|(name, description, steps)| {
        WorkflowDefinition::new(name, steps)
            .ok()
            .map(|w| w.with_description(description))
    })
    .collect()
}
