//! ワークフローステップの定義
//!
//! # 責務
//!
//! Workflowを構成するStepの定義体を提供するモジュール
//! アプリケーションに対して、[StepSpec] を提供する。
//!
//! - [`AgentKind`]: ステップを担当するエージェントの種別（閉じた列挙型）
//! - [`Condition`]: コンテキストに対する実行条件
//! - [`StepOverrides`]: ステップ単位の設定上書き（モデル、タイムアウト、リトライ）

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::dto::WorkflowStepDto;
use crate::error::{ConfigError, WorkflowError};

/// エージェント種別
///
/// 文字列からの変換はステップ定義の構築時に一度だけ行われ、
/// 実行時に文字列比較でディスパッチされることはありません。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AgentKind {
    /// 実装計画の作成
    Plan,
    /// コードの生成・修正
    Code,
    /// テストの作成
    Test,
    /// コードレビュー
    Review,
    /// 登録済みのカスタムハンドラー（ハンドラーID）
    Custom(String),
}

/// エージェント種別のパースエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("不明なエージェント種別です: '{0}'（plan, code, test, review, custom:<id> のいずれか）")]
pub struct ParseAgentKindError(pub String);

impl AgentKind {
    /// 組み込みのエージェント種別
    pub const BUILTIN: [AgentKind; 4] = [
        AgentKind::Plan,
        AgentKind::Code,
        AgentKind::Test,
        AgentKind::Review,
    ];

    /// カスタムハンドラーの場合はそのIDを返す
    pub fn handler_id(&self) -> Option<&str> {
        match self {
            AgentKind::Custom(id) => Some(id),
            _ => None,
        }
    }

    /// ステップIDとして使う既定の名前
    pub fn default_step_id(&self) -> &str {
        match self {
            AgentKind::Plan => "plan",
            AgentKind::Code => "code",
            AgentKind::Test => "test",
            AgentKind::Review => "review",
            AgentKind::Custom(id) => id,
        }
    }
}

impl FromStr for AgentKind {
    type Err = ParseAgentKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "plan" => Ok(AgentKind::Plan),
            "code" => Ok(AgentKind::Code),
            "test" => Ok(AgentKind::Test),
            "review" => Ok(AgentKind::Review),
            other => match other.strip_prefix("custom:") {
                Some(id) if !id.trim().is_empty() => Ok(AgentKind::Custom(id.trim().to_string())),
                _ => Err(ParseAgentKindError(other.to_string())),
            },
        }
    }
}

impl TryFrom<String> for AgentKind {
    type Error = ParseAgentKindError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AgentKind> for String {
    fn from(kind: AgentKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKind::Custom(id) => write!(f, "custom:{}", id),
            other => f.write_str(other.default_step_id()),
        }
    }
}

/// ステップの実行条件
///
/// 実行直前のコンテキストに対して評価され、偽であればステップはスキップされます。
///
/// # 書式
///
/// - `exists key` - キーが存在し、null でない
/// - `missing key` - キーが存在しない、または null
/// - `key == "value"` - 値が一致
/// - `key != "value"` - 値が一致しない（キーが存在しない場合も真）
/// - `key contains "substr"` - 文字列が部分文字列を含む、または配列が要素を含む
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Exists(String),
    Missing(String),
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    Contains { key: String, value: String },
}

/// 条件式のパースエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("条件式を解釈できません: '{0}'")]
pub struct ParseConditionError(pub String);

impl Condition {
    /// コンテキストに対して条件を評価
    pub fn evaluate(&self, context: &BTreeMap<String, Value>) -> bool {
        let present = |key: &str| context.get(key).filter(|v| !v.is_null());

        match self {
            Condition::Exists(key) => present(key).is_some(),
            Condition::Missing(key) => present(key).is_none(),
            Condition::Equals { key, value } => present(key).is_some_and(|v| value_matches(v, value)),
            Condition::NotEquals { key, value } => !present(key).is_some_and(|v| value_matches(v, value)),
            Condition::Contains { key, value } => match present(key) {
                Some(Value::String(s)) => s.contains(value.as_str()),
                Some(Value::Array(items)) => items.iter().any(|item| value_matches(item, value)),
                _ => false,
            },
        }
    }

    /// 条件が参照するコンテキストキー
    pub fn key(&self) -> &str {
        match self {
            Condition::Exists(key) | Condition::Missing(key) => key,
            Condition::Equals { key, .. }
            | Condition::NotEquals { key, .. }
            | Condition::Contains { key, .. } => key,
        }
    }
}

/// 文字列は内容で、それ以外はJSON表現で比較する
fn value_matches(actual: &Value, expected: &str) -> bool {
    match actual {
        Value::String(s) => s == expected,
        other => other.to_string() == expected,
    }
}

impl FromStr for Condition {
    type Err = ParseConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr = s.trim();
        let err = || ParseConditionError(expr.to_string());

        if let Some(key) = expr.strip_prefix("exists ") {
            return parse_key(key).map(Condition::Exists).ok_or_else(err);
        }
        if let Some(key) = expr.strip_prefix("missing ") {
            return parse_key(key).map(Condition::Missing).ok_or_else(err);
        }

        // 演算子は値の開始引用符より前だけから探す
        let quote = expr.find('"').ok_or_else(err)?;
        let (lhs, quoted) = expr.split_at(quote);
        let lhs = lhs.trim_end();
        let value = parse_quoted(quoted).ok_or_else(err)?;

        if let Some(key) = lhs.strip_suffix(" contains") {
            let key = parse_key(key).ok_or_else(err)?;
            return Ok(Condition::Contains { key, value });
        }
        if let Some(key) = lhs.strip_suffix("!=") {
            let key = parse_key(key).ok_or_else(err)?;
            return Ok(Condition::NotEquals { key, value });
        }
        if let Some(key) = lhs.strip_suffix("==") {
            let key = parse_key(key).ok_or_else(err)?;
            return Ok(Condition::Equals { key, value });
        }

        Err(err())
    }
}

fn parse_key(raw: &str) -> Option<String> {
    let key = raw.trim();
    if key.is_empty() || key.contains(char::is_whitespace) || key.contains('"') {
        return None;
    }
    Some(key.to_string())
}

fn parse_quoted(raw: &str) -> Option<String> {
    let value = raw.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .map(str::to_string)
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Exists(key) => write!(f, "exists {}", key),
            Condition::Missing(key) => write!(f, "missing {}", key),
            Condition::Equals { key, value } => write!(f, "{} == \"{}\"", key, value),
            Condition::NotEquals { key, value } => write!(f, "{} != \"{}\"", key, value),
            Condition::Contains { key, value } => write!(f, "{} contains \"{}\"", key, value),
        }
    }
}

/// ステップ単位の設定上書き
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOverrides {
    /// 使用するモデル（未指定ならエージェント種別の既定モデル）
    pub model: Option<String>,
    /// タイムアウト（未指定ならエンジンの既定値）
    pub timeout: Option<Duration>,
    /// 失敗時のリトライ回数
    pub retry_count: Option<u32>,
}

/// ワークフローステップ（ドメインモデル）
///
/// ワークフロー内の1つの処理単位を表します。
///
/// ## DTO との違い
///
/// - [`WorkflowStepDto`](super::dto::WorkflowStepDto): TOML デシリアライズ専用
/// - [`StepSpec`]: バリデーション済み、ドメインロジックを持つ
#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    id: String,
    agent: AgentKind,
    description: String,
    depends_on: Vec<String>,
    condition: Option<Condition>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    context_mapping: BTreeMap<String, String>,
    overrides: StepOverrides,
}

impl StepSpec {
    /// 新しいステップを生成
    ///
    /// 説明文は `Execute <kind> agent` になります。
    pub fn new(id: impl Into<String>, agent: AgentKind) -> Self {
        let description = format!("Execute {} agent", agent);
        Self {
            id: id.into(),
            agent,
            description,
            depends_on: Vec::new(),
            condition: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            context_mapping: BTreeMap::new(),
            overrides: StepOverrides::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 依存先ステップを追加（重複は無視）
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.depends_on.contains(&dep) {
                self.depends_on.push(dep);
            }
        }
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// ステップが必要とするコンテキストキーを宣言
    pub fn with_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(keys.into_iter().map(Into::into));
        self
    }

    /// アダプターが生成を約束する追加の成果物キーを宣言
    pub fn with_outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs.extend(keys.into_iter().map(Into::into));
        self
    }

    /// `source` の値を `alias` としてもステップに渡す
    pub fn map_context(mut self, source: impl Into<String>, alias: impl Into<String>) -> Self {
        self.context_mapping.insert(source.into(), alias.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.overrides.model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.overrides.timeout = Some(timeout);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.overrides.retry_count = Some(retry_count);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent(&self) -> &AgentKind {
        &self.agent
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn context_mapping(&self) -> &BTreeMap<String, String> {
        &self.context_mapping
    }

    pub fn overrides(&self) -> &StepOverrides {
        &self.overrides
    }

    /// このステップが成功時に必ず書き込むキー
    ///
    /// `<id>_output`、`latest_output`、および宣言済みの `outputs`。
    pub fn produced_keys(&self) -> Vec<String> {
        let mut keys = vec![output_key(&self.id), LATEST_OUTPUT_KEY.to_string()];
        keys.extend(self.outputs.iter().cloned());
        keys
    }
}

/// 直近に成功したステップの出力を保持するキー
pub const LATEST_OUTPUT_KEY: &str = "latest_output";

/// ステップ出力を保持するキー名（`<id>_output`）
pub fn output_key(step_id: &str) -> String {
    format!("{}_output", step_id)
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// エージェント種別が不明な場合は [`WorkflowError::UnknownAgentKind`]、
/// その他の不正なデータの場合は [`ConfigError::Validation`] を返します。
impl TryFrom<WorkflowStepDto> for StepSpec {
    type Error = WorkflowError;

    fn try_from(dto: WorkflowStepDto) -> Result<Self, Self::Error> {
        let id = dto.id.trim().to_string();
        if id.is_empty() {
            return Err(ConfigError::Validation("ステップIDが空です".to_string()).into());
        }

        let agent: AgentKind = dto
            .agent
            .parse()
            .map_err(|e: ParseAgentKindError| WorkflowError::UnknownAgentKind {
                step: id.clone(),
                kind: e.0,
            })?;

        let mut step = StepSpec::new(id.clone(), agent)
            .depends_on(dto.depends_on)
            .with_inputs(dto.inputs)
            .with_outputs(dto.outputs);

        if let Some(description) = dto.description {
            step = step.with_description(description);
        }

        if let Some(expr) = dto.condition {
            let condition: Condition = expr.parse().map_err(|e: ParseConditionError| {
                ConfigError::Validation(format!("ステップ '{}': {}", id, e))
            })?;
            step = step.with_condition(condition);
        }

        for (source, alias) in dto.context_mapping {
            step = step.map_context(source, alias);
        }

        if let Some(model) = dto.model {
            step = step.with_model(model);
        }

        if let Some(timeout) = dto.timeout {
            if timeout == 0 {
                return Err(ConfigError::Validation(format!(
                    "ステップ '{}': timeout は1秒以上を指定してください",
                    id
                ))
                .into());
            }
            step = step.with_timeout(Duration::from_secs(timeout));
        }

        if let Some(retry_count) = dto.retry_count {
            step = step.with_retry_count(retry_count);
        }

        Ok(step)
    }
}

/// ドメインモデルから DTO への変換（書き込み方向）
///
/// バリデーション済みのドメインモデルから DTO を生成するため、
/// この変換は失敗しません（`From` トレイトを使用）。
impl From<StepSpec> for WorkflowStepDto {
    fn from(step: StepSpec) -> Self {
        WorkflowStepDto {
            id: step.id,
            agent: step.agent.to_string(),
            description: Some(step.description),
            depends_on: step.depends_on,
            condition: step.condition.map(|c| c.to_string()),
            inputs: step.inputs,
            outputs: step.outputs,
            model: step.overrides.model,
            timeout: step.overrides.timeout.map(|t| t.as_secs()),
            retry_count: step.overrides.retry_count,
            context_mapping: step.context_mapping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_agent_kind_parse_builtin() {
        assert_eq!("plan".parse::<AgentKind>(), Ok(AgentKind::Plan));
        assert_eq!("code".parse::<AgentKind>(), Ok(AgentKind::Code));
        assert_eq!("test".parse::<AgentKind>(), Ok(AgentKind::Test));
        assert_eq!("review".parse::<AgentKind>(), Ok(AgentKind::Review));
    }

    #[test]
    fn test_agent_kind_parse_custom() {
        assert_eq!(
            "custom:lint".parse::<AgentKind>(),
            Ok(AgentKind::Custom("lint".to_string()))
        );
        assert!("custom:".parse::<AgentKind>().is_err());
    }

    #[test]
    fn test_agent_kind_parse_unknown() {
        let err = "deploy".parse::<AgentKind>().unwrap_err();
        assert_eq!(err.0, "deploy");
    }

    #[test]
    fn test_agent_kind_display_round_trip() {
        for kind in [AgentKind::Plan, AgentKind::Review, AgentKind::Custom("lint".to_string())] {
            assert_eq!(kind.to_string().parse::<AgentKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_agent_kind_serializes_as_string() {
        let json = serde_json::to_value(AgentKind::Custom("fmt".to_string())).unwrap();
        assert_eq!(json, json!("custom:fmt"));
    }

    #[test]
    fn test_condition_parse() {
        assert_eq!(
            "exists plan_output".parse::<Condition>(),
            Ok(Condition::Exists("plan_output".to_string()))
        );
        assert_eq!(
            r#"language == "rust""#.parse::<Condition>(),
            Ok(Condition::Equals {
                key: "language".to_string(),
                value: "rust".to_string()
            })
        );
        assert_eq!(
            r#"plan_output contains "database""#.parse::<Condition>(),
            Ok(Condition::Contains {
                key: "plan_output".to_string(),
                value: "database".to_string()
            })
        );
    }

    #[test]
    fn test_condition_parse_rejects_garbage() {
        assert!("".parse::<Condition>().is_err());
        assert!("language == rust".parse::<Condition>().is_err());
        assert!(r#"two words == "x""#.parse::<Condition>().is_err());
    }

    #[test]
    fn test_condition_display_round_trip() {
        let expr = r#"mode != "dry-run""#;
        let condition: Condition = expr.parse().unwrap();
        assert_eq!(condition.to_string(), expr);
    }

    /// 値の中の演算子は区切りとして扱わない
    #[test]
    fn test_condition_operator_inside_value() {
        assert_eq!(
            r#"mode == "a != b""#.parse::<Condition>(),
            Ok(Condition::Equals {
                key: "mode".to_string(),
                value: "a != b".to_string()
            })
        );
        assert_eq!(
            r#"x == "foo contains bar""#.parse::<Condition>(),
            Ok(Condition::Equals {
                key: "x".to_string(),
                value: "foo contains bar".to_string()
            })
        );
        assert_eq!(
            r#"query contains "a == b""#.parse::<Condition>(),
            Ok(Condition::Contains {
                key: "query".to_string(),
                value: "a == b".to_string()
            })
        );
    }

    /// Display の出力は常にパースし直せる
    #[test]
    fn test_condition_display_round_trip_with_operators_in_value() {
        let conditions = [
            Condition::Equals {
                key: "mode".to_string(),
                value: "a != b".to_string(),
            },
            Condition::NotEquals {
                key: "verdict".to_string(),
                value: "x contains y".to_string(),
            },
            Condition::Contains {
                key: "plan_output".to_string(),
                value: "\"quoted\" == yes".to_string(),
            },
        ];
        for condition in conditions {
            assert_eq!(condition.to_string().parse::<Condition>(), Ok(condition));
        }
    }

    #[test]
    fn test_condition_evaluate() {
        let ctx = context(&[
            ("language", json!("rust")),
            ("files", json!(["src/lib.rs", "src/main.rs"])),
            ("retries", json!(3)),
            ("nothing", Value::Null),
        ]);

        assert!(Condition::Exists("language".to_string()).evaluate(&ctx));
        assert!(!Condition::Exists("nothing".to_string()).evaluate(&ctx));
        assert!(Condition::Missing("absent".to_string()).evaluate(&ctx));

        let eq: Condition = r#"retries == "3""#.parse().unwrap();
        assert!(eq.evaluate(&ctx));

        let ne: Condition = r#"language != "python""#.parse().unwrap();
        assert!(ne.evaluate(&ctx));

        let contains: Condition = r#"files contains "src/main.rs""#.parse().unwrap();
        assert!(contains.evaluate(&ctx));

        let substr: Condition = r#"language contains "us""#.parse().unwrap();
        assert!(substr.evaluate(&ctx));
    }

    #[test]
    fn test_step_spec_builder() {
        let step = StepSpec::new("code", AgentKind::Code)
            .depends_on(["plan", "plan"])
            .map_context("plan_output", "implementation_plan")
            .with_timeout(Duration::from_secs(30))
            .with_model("codellama:7b");

        assert_eq!(step.id(), "code");
        assert_eq!(step.description(), "Execute code agent");
        assert_eq!(step.dependencies(), ["plan".to_string()]);
        assert_eq!(
            step.context_mapping().get("plan_output").map(String::as_str),
            Some("implementation_plan")
        );
        assert_eq!(step.overrides().timeout, Some(Duration::from_secs(30)));
        assert_eq!(step.overrides().model.as_deref(), Some("codellama:7b"));
    }

    #[test]
    fn test_produced_keys() {
        let step = StepSpec::new("lint", AgentKind::Custom("lint".to_string()))
            .with_outputs(["lint_report"]);
        assert_eq!(
            step.produced_keys(),
            vec!["lint_output", "latest_output", "lint_report"]
        );
    }

    #[test]
    fn test_try_from_dto_unknown_agent() {
        let dto = WorkflowStepDto {
            id: "deploy".to_string(),
            agent: "deploy".to_string(),
            description: None,
            depends_on: vec![],
            condition: None,
            inputs: vec![],
            outputs: vec![],
            model: None,
            timeout: None,
            retry_count: None,
            context_mapping: BTreeMap::new(),
        };

        let result = StepSpec::try_from(dto);
        assert!(matches!(
            result,
            Err(WorkflowError::UnknownAgentKind { ref step, ref kind }) if step == "deploy" && kind == "deploy"
        ));
    }

    #[test]
    fn test_try_from_dto_zero_timeout() {
        let dto = WorkflowStepDto {
            id: "plan".to_string(),
            agent: "plan".to_string(),
            description: None,
            depends_on: vec![],
            condition: None,
            inputs: vec![],
            outputs: vec![],
            model: None,
            timeout: Some(0),
            retry_count: None,
            context_mapping: BTreeMap::new(),
        };

        assert!(matches!(
            StepSpec::try_from(dto),
            Err(WorkflowError::Config(ConfigError::Validation(_)))
        ));
    }
}
