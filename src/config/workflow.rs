//! Workflow 定義の読み込みと管理を行うモジュール
//!
//! # 責務
//!
//! このモジュールは、エージェントの連鎖を TOML 形式で定義し、
//! それを Rust の型として扱うための機能を提供します。
//!
//! ## 主な機能
//!
//! - **TOML パース**: TOML ファイルを読み込み、[`WorkflowDefinition`] に変換
//! - **ワークフロー定義**: 計画→実装→テスト のような開発フローを
//!   依存関係つきのステップとして表現
//! - **メタデータ管理**: ワークフロー名、説明、バージョンを保持
//!
//! 依存グラフの妥当性（循環、未知の依存先）はここでは検査しません。
//! 実行前に [`crate::engine::resolver`] が検査します。
//!
//! ## 使用例
//!
//! ```toml
//! [workflow]
//! name = "bug-fix"
//! description = "Analyze and fix a bug"
//!
//! [[steps]]
//! id = "plan"
//! agent = "plan"
//!
//! [[steps]]
//! id = "code"
//! agent = "code"
//! depends_on = ["plan"]
//! timeout = 600
//!
//! [steps.context_mapping]
//! plan_output = "fix_plan"
//! ```

use std::collections::HashSet;
use std::path::Path;

use super::dto::{WorkflowDto, WorkflowMetadataDto};
use super::step::{AgentKind, StepSpec};
use crate::error::{ConfigError, WorkflowError};

/// ワークフロー定義（ドメインモデル）
///
/// 名前つきのステップ列です。ステップの宣言順は実行順の同点解消に使われます。
/// 構築時に名前が空でないこと、ステップIDが一意であることが保証されます。
///
/// ## DTO との違い
///
/// - [`WorkflowDto`]: TOML デシリアライズ専用、バリデーション前の生データ
/// - [`WorkflowDefinition`]: バリデーション済み、ドメインロジックを持つ
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    name: String,
    description: Option<String>,
    version: Option<String>,
    steps: Vec<StepSpec>,
}

impl WorkflowDefinition {
    /// ステップ列からワークフローを生成
    ///
    /// # 戻り値
    ///
    /// * `Err(ConfigError::Validation)` - 名前が空、ステップが空、またはステップIDが重複している場合
    pub fn new(name: impl Into<String>, steps: Vec<StepSpec>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::Validation("ワークフロー名が空です".to_string()));
        }
        if steps.is_empty() {
            return Err(ConfigError::Validation(format!(
                "ワークフロー '{}' にステップがありません",
                name
            )));
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.id()) {
                return Err(ConfigError::Validation(format!(
                    "ワークフロー '{}' でステップID '{}' が重複しています",
                    name,
                    step.id()
                )));
            }
        }

        Ok(Self {
            name,
            description: None,
            version: None,
            steps,
        })
    }

    /// エージェント種別の並びから直列のワークフローを生成
    ///
    /// 各ステップは直前のステップに依存します。
    /// ステップIDはエージェント種別名で、同じ種別が再登場した場合は `code_2` のように番号が付きます。
    ///
    /// # 例
    ///
    /// ```
    /// use local_agents::config::{AgentKind, WorkflowDefinition};
    ///
    /// let workflow = WorkflowDefinition::linear(
    ///     "chain",
    ///     [AgentKind::Plan, AgentKind::Code, AgentKind::Code],
    /// ).unwrap();
    ///
    /// let ids: Vec<&str> = workflow.steps().iter().map(|s| s.id()).collect();
    /// assert_eq!(ids, ["plan", "code", "code_2"]);
    /// ```
    pub fn linear(
        name: impl Into<String>,
        kinds: impl IntoIterator<Item = AgentKind>,
    ) -> Result<Self, ConfigError> {
        let mut steps: Vec<StepSpec> = Vec::new();
        let mut used = HashSet::new();

        for kind in kinds {
            let base = kind.default_step_id().to_string();
            let mut id = base.clone();
            let mut n = 2;
            while used.contains(&id) {
                id = format!("{}_{}", base, n);
                n += 1;
            }
            used.insert(id.clone());

            let mut step = StepSpec::new(id, kind);
            if let Some(prev) = steps.last() {
                step = step.depends_on([prev.id()]);
            }
            steps.push(step);
        }

        Self::new(name, steps)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// TOML ファイルからワークフローを読み込む
    ///
    /// # 処理フロー
    ///
    /// 1. ファイル読み込み
    /// 2. TOML デシリアライズ → [`WorkflowDto`]
    /// 3. バリデーション & 変換 → [`WorkflowDefinition`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::from)?;
        Self::from_toml(&content)
    }

    /// TOML 文字列からワークフローを読み込む
    ///
    /// # 戻り値
    ///
    /// * `Err(WorkflowError::UnknownAgentKind)` - エージェント種別を解釈できない場合
    /// * `Err(WorkflowError::Config)` - パースまたはバリデーションに失敗した場合
    pub fn from_toml(toml: &str) -> Result<Self, WorkflowError> {
        let dto: WorkflowDto = toml::from_str(toml).map_err(ConfigError::from)?;
        Self::try_from(dto)
    }

    /// ワークフローを TOML 文字列に変換
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let dto = WorkflowDto::from(self.clone());
        Ok(toml::to_string_pretty(&dto)?)
    }

    /// ワークフローを TOML ファイルに保存
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// 宣言順のステップ
    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    /// IDでステップを検索
    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id() == id)
    }
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// # 処理フロー
///
/// 1. ステップの変換（`WorkflowStepDto` → `StepSpec`）
/// 2. `WorkflowDefinition::new` によるバリデーション
/// 3. メタデータの設定
impl TryFrom<WorkflowDto> for WorkflowDefinition {
    type Error = WorkflowError;

    fn try_from(dto: WorkflowDto) -> Result<Self, Self::Error> {
        let steps = dto
            .steps
            .into_iter()
            .map(StepSpec::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let mut workflow = WorkflowDefinition::new(dto.workflow.name, steps)?;
        workflow.description = dto.workflow.description;
        workflow.version = dto.workflow.version;
        Ok(workflow)
    }
}

/// ドメインモデルから DTO への変換（書き込み方向）
impl From<WorkflowDefinition> for WorkflowDto {
    fn from(workflow: WorkflowDefinition) -> Self {
        WorkflowDto {
            workflow: WorkflowMetadataDto {
                name: workflow.name,
                description: workflow.description,
                version: workflow.version,
            },
            steps: workflow.steps.into_iter().map(Into::into).collect(),
        }
    }
}
