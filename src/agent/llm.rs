//! 推論サービスを使う組み込みエージェント
//!
//! # 責務
//!
//! - エージェント種別ごとの役割（role）と目標（goal）からシステムプロンプトを組み立てる
//! - タスクテンプレートとコンテキストのセクションからユーザープロンプトを組み立てる
//! - [`ProviderClient`] を呼び出し、結果を [`AgentOutput`] に変換する
//!
//! モデルはステップの上書き、なければエージェント種別の既定モデルを使います。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::traits::{AgentAdapter, AgentInput, AgentOutput};
use crate::config::{AgentKind, Settings};
use crate::error::AgentError;
use crate::provider::{CompletionRequest, ProviderClient, StopReason};

/// 種別に関係なくプロンプトに含めるコンテキストキーと見出し
const WELL_KNOWN_SECTIONS: [(&str, &str); 4] = [
    ("file_content", "Context File Content"),
    ("directory", "Working Directory"),
    ("specification", "Additional Specifications"),
    ("existing_code", "Existing Code"),
];

/// 推論サービスを呼び出すエージェント
pub struct LlmAgent {
    name: String,
    kind: AgentKind,
    role: String,
    goal: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    client: Arc<dyn ProviderClient>,
}

impl LlmAgent {
    /// 組み込み種別のエージェントを生成
    ///
    /// `Custom` 種別には役割がないため `None` を返します。
    ///
    /// # 引数
    ///
    /// * `kind` - エージェント種別
    /// * `model` - 既定モデル
    /// * `client` - 推論サービスのクライアント
    pub fn for_kind(
        kind: AgentKind,
        model: impl Into<String>,
        client: Arc<dyn ProviderClient>,
    ) -> Option<Self> {
        let (role, goal) = role_and_goal(&kind)?;
        Some(Self {
            name: format!("{}-agent", kind),
            kind,
            role: role.to_string(),
            goal: goal.to_string(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            client,
        })
    }

    /// 設定ファイルの値（モデル、温度、最大トークン数）でエージェントを生成
    pub fn from_settings(
        kind: AgentKind,
        settings: &Settings,
        client: Arc<dyn ProviderClient>,
    ) -> Option<Self> {
        let model = settings.model_for(&kind).to_string();
        Self::for_kind(kind, model, client).map(|agent| {
            agent
                .with_temperature(settings.temperature as f32)
                .with_max_tokens(settings.max_tokens)
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn kind(&self) -> &AgentKind {
        &self.kind
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// システムプロンプト
    pub fn system_prompt(&self) -> String {
        format!(
            "You are a {}.\n\nGoal: {}\n\n\
             You should provide clear, actionable, and well-structured responses. \
             Always consider the context provided and maintain consistency with existing patterns and conventions.",
            self.role, self.goal
        )
    }

    /// ユーザープロンプト
    ///
    /// タスクテンプレートに続けて、既知のキーとステップが参照するキーをセクションとして並べます。
    /// 参照キーがない場合は直前のステップの出力（`latest_output`）を含めます。
    pub fn build_prompt(&self, input: &AgentInput) -> String {
        let mut parts = vec![
            format!("# {} Task", capitalize(self.kind.default_step_id())),
            format!("\n## Task Description\n{}", task_text(&self.kind, input)),
        ];

        for (key, heading) in WELL_KNOWN_SECTIONS {
            if let Some(value) = input.context.get(key) {
                parts.push(section(heading, value));
            }
        }

        for key in &input.focus_keys {
            if WELL_KNOWN_SECTIONS.iter().any(|(k, _)| k == key) {
                continue;
            }
            if let Some(value) = input.context.get(key) {
                parts.push(section(&heading_for(key), value));
            }
        }

        if input.focus_keys.is_empty()
            && let Some(previous) = input.context.get(crate::config::step::LATEST_OUTPUT_KEY)
        {
            parts.push(section("Previous Step Output", previous));
        }

        parts.join("\n")
    }
}

#[async_trait]
impl AgentAdapter for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
        let model = input.config.model.clone().unwrap_or_else(|| self.model.clone());
        let mut request = CompletionRequest::new(model, self.system_prompt(), self.build_prompt(&input))
            .with_temperature(self.temperature);
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let response = self.client.execute(&request).await?;
        debug!(
            step = %input.step_id,
            model = %response.model,
            tokens = response.token_usage.total(),
            "agent response received"
        );

        if response.content.trim().is_empty() {
            return Ok(AgentOutput::failure(format!(
                "model '{}' returned an empty response",
                request.model
            ))
            .with_token_usage(response.token_usage));
        }

        let mut output = AgentOutput::success(response.content)
            .with_token_usage(response.token_usage)
            .with_artifact("_model", request.model);
        if response.stop_reason == StopReason::MaxTokens {
            output = output.with_artifact("_truncated", true);
        }
        Ok(output)
    }
}

/// 種別ごとの役割と目標
fn role_and_goal(kind: &AgentKind) -> Option<(&'static str, &'static str)> {
    match kind {
        AgentKind::Plan => Some((
            "Senior Software Architect and Project Planner",
            "Create comprehensive, actionable implementation plans that break down complex tasks into manageable steps",
        )),
        AgentKind::Code => Some((
            "Senior Software Engineer and Code Generator",
            "Generate high-quality, maintainable code that follows best practices and integrates well with existing codebases",
        )),
        AgentKind::Test => Some((
            "Senior QA Engineer and Test Developer",
            "Generate comprehensive test suites and run tests to ensure code quality and correctness",
        )),
        AgentKind::Review => Some((
            "Senior Code Reviewer and Quality Analyst",
            "Provide thorough code reviews that identify issues, suggest improvements, and ensure code quality",
        )),
        AgentKind::Custom(_) => None,
    }
}

/// 種別ごとのタスク文
fn task_text(kind: &AgentKind, input: &AgentInput) -> String {
    match kind {
        AgentKind::Plan => format!("Create a detailed plan for: {}", input.task),
        AgentKind::Code => format!("Implement the following: {}", input.task),
        AgentKind::Test => format!("Create comprehensive tests for: {}", input.task),
        AgentKind::Review => format!("Review the implementation of: {}", input.task),
        AgentKind::Custom(_) => format!("{}: {}", input.description, input.task),
    }
}

fn section(heading: &str, value: &Value) -> String {
    match value {
        Value::String(text) => format!("\n## {}\n{}", heading, text),
        other => format!(
            "\n## {}\n```json\n{}\n```",
            heading,
            serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())
        ),
    }
}

/// `implementation_plan` -> `Implementation Plan`
fn heading_for(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::traits::StepConfig;
    use crate::error::ProviderError;
    use crate::provider::{ProviderResponse, TokenUsage};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// 受け取ったリクエストを記録し、固定の応答を返すクライアント
    struct RecordingClient {
        reply: String,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl RecordingClient {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ProviderClient for RecordingClient {
        async fn execute(&self, request: &CompletionRequest) -> Result<ProviderResponse, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(ProviderResponse {
                content: self.reply.clone(),
                token_usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
                stop_reason: StopReason::EndTurn,
                model: request.model.clone(),
            })
        }

        async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
            Ok(vec![])
        }
    }

    fn input(kind: AgentKind, context: BTreeMap<String, Value>, focus: &[&str]) -> AgentInput {
        AgentInput {
            task: "fix the login crash".to_string(),
            step_id: kind.default_step_id().to_string(),
            agent: kind,
            description: "Implement bug fix".to_string(),
            context,
            focus_keys: focus.iter().map(|k| k.to_string()).collect(),
            config: StepConfig {
                model: None,
                timeout: Duration::from_secs(30),
            },
        }
    }

    #[test]
    fn test_custom_kind_has_no_llm_agent() {
        let client = RecordingClient::new("x");
        assert!(LlmAgent::for_kind(AgentKind::Custom("lint".to_string()), "m:1", client).is_none());
    }

    #[test]
    fn test_system_prompt_contains_role_and_goal() {
        let agent = LlmAgent::for_kind(AgentKind::Plan, "llama3.1:8b", RecordingClient::new("x")).unwrap();
        let prompt = agent.system_prompt();
        assert!(prompt.starts_with("You are a Senior Software Architect and Project Planner."));
        assert!(prompt.contains("Goal: Create comprehensive"));
    }

    /// エイリアスのセクションが見出しつきで含まれることを確認
    #[test]
    fn test_build_prompt_uses_template_and_focus_keys() {
        let agent = LlmAgent::for_kind(AgentKind::Code, "codellama:7b", RecordingClient::new("x")).unwrap();
        let context = BTreeMap::from([
            ("task".to_string(), json!("fix the login crash")),
            ("fix_plan".to_string(), json!("1. null check")),
            ("directory".to_string(), json!("/srv/app")),
            ("latest_output".to_string(), json!("1. null check")),
        ]);
        let prompt = agent.build_prompt(&input(AgentKind::Code, context, &["fix_plan"]));

        assert!(prompt.starts_with("# Code Task"));
        assert!(prompt.contains("Implement the following: fix the login crash"));
        assert!(prompt.contains("## Fix Plan\n1. null check"));
        assert!(prompt.contains("## Working Directory\n/srv/app"));
        assert!(!prompt.contains("Previous Step Output"));
    }

    #[test]
    fn test_build_prompt_falls_back_to_latest_output() {
        let agent = LlmAgent::for_kind(AgentKind::Review, "llama3.1:8b", RecordingClient::new("x")).unwrap();
        let context = BTreeMap::from([("latest_output".to_string(), json!("fn login() {}"))]);
        let prompt = agent.build_prompt(&input(AgentKind::Review, context, &[]));

        assert!(prompt.contains("Review the implementation of: fix the login crash"));
        assert!(prompt.contains("## Previous Step Output\nfn login() {}"));
    }

    /// ステップのモデル上書きが優先されることを確認
    #[tokio::test]
    async fn test_run_uses_model_override() {
        let client = RecordingClient::new("plan text");
        let agent = LlmAgent::for_kind(AgentKind::Plan, "llama3.1:8b", client.clone())
            .unwrap()
            .with_max_tokens(512);

        let mut step_input = input(AgentKind::Plan, BTreeMap::new(), &[]);
        step_input.config.model = Some("mistral:7b".to_string());

        let output = agent.run(step_input).await.unwrap();
        assert!(output.success);
        assert_eq!(output.output, "plan text");
        assert_eq!(output.token_usage.total(), 15);
        assert_eq!(output.artifacts["_model"], json!("mistral:7b"));

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].model, "mistral:7b");
        assert_eq!(requests[0].max_tokens, Some(512));
    }

    #[tokio::test]
    async fn test_run_empty_response_is_failure() {
        let agent = LlmAgent::for_kind(AgentKind::Test, "m:1", RecordingClient::new("   ")).unwrap();
        let output = agent.run(input(AgentKind::Test, BTreeMap::new(), &[])).await.unwrap();
        assert!(!output.success);
        assert!(output.error.unwrap().contains("empty response"));
    }

    #[test]
    fn test_heading_for() {
        assert_eq!(heading_for("implementation_plan"), "Implementation Plan");
        assert_eq!(heading_for("code_to_review"), "Code To Review");
    }
}
