use std::time::Duration;

use local_agents::config::{AgentKind, Condition, Settings, WorkflowCatalog, WorkflowDefinition};
use local_agents::engine::resolver;

const EXAMPLE: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/workflows/feature-implementation.toml"
);

#[test]
fn test_load_example_workflow() {
    let workflow = WorkflowDefinition::from_file(EXAMPLE).expect("Failed to load workflow");

    assert_eq!(workflow.name(), "feature-implementation");
    assert_eq!(
        workflow.description(),
        Some("Plan, implement and test a feature, then review database changes")
    );
    assert_eq!(workflow.version(), Some("1.0.0"));
    assert_eq!(workflow.steps().len(), 4);

    let implement = workflow.step("implement").unwrap();
    assert_eq!(implement.agent(), &AgentKind::Code);
    assert_eq!(implement.overrides().timeout, Some(Duration::from_secs(600)));
    assert_eq!(implement.overrides().retry_count, Some(1));
    assert_eq!(
        implement.context_mapping().get("plan_output").map(String::as_str),
        Some("implementation_plan")
    );

    let review = workflow.step("schema-review").unwrap();
    assert_eq!(review.overrides().model.as_deref(), Some("llama3.1:70b"));
    assert_eq!(
        review.condition(),
        Some(&Condition::Contains {
            key: "plan_output".to_string(),
            value: "database".to_string(),
        })
    );
}

#[test]
fn test_example_workflow_order_and_inputs() {
    let workflow = WorkflowDefinition::from_file(EXAMPLE).unwrap();

    assert_eq!(
        resolver::resolve(workflow.steps()).unwrap(),
        ["plan", "implement", "test", "schema-review"]
    );

    let seed = ["task".to_string()].into();
    assert!(resolver::validate_inputs(workflow.steps(), &seed).is_ok());
}

#[test]
fn test_workflow_roundtrip_with_real_file() {
    let original = WorkflowDefinition::from_file(EXAMPLE).expect("Failed to load workflow");

    let toml_string = original.to_toml_string().expect("Failed to serialize");
    let restored = WorkflowDefinition::from_toml(&toml_string).expect("Failed to parse");

    assert_eq!(restored, original);
}

/// 設定ファイルのチェーンがカタログに加わる
#[test]
fn test_settings_chains_extend_catalog() {
    let settings = Settings::from_toml(
        r#"
default_model = "llama3.1:8b"

[workflows]
quick-fix = ["code", "custom:fmt"]

[handlers.fmt]
command = "cargo"
args = ["fmt"]
"#,
    )
    .unwrap();

    let catalog = WorkflowCatalog::with_settings(&settings).unwrap();
    let names: Vec<&str> = catalog.names().collect();
    assert_eq!(
        names,
        ["bug-fix", "code-review", "feature-dev", "quick-fix", "refactor"]
    );

    let quick_fix = catalog.get("quick-fix").unwrap();
    assert_eq!(
        resolver::resolve(quick_fix.steps()).unwrap(),
        ["code", "fmt"]
    );
    assert_eq!(
        quick_fix.step("fmt").unwrap().agent(),
        &AgentKind::Custom("fmt".to_string())
    );
}
