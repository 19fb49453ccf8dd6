//! ステップの依存関係の解決
//!
//! # 責務
//!
//! - 依存関係を満たす実行順序を決める（Kahn のアルゴリズム）
//! - 循環（自己依存を含む）と存在しない依存先を検出する
//! - 各ステップの推移的な依存先を求める
//! - 宣言された入力キーが実行前に供給可能かを検査する
//!
//! 実行可能なステップが複数ある場合は、先に宣言されたステップを先に並べます。
//! そのため同じ定義からは常に同じ順序が得られます。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::StepSpec;
use crate::error::WorkflowError;

/// 実行順序を求める
///
/// # 戻り値
///
/// * `Ok(Vec<String>)` - ステップIDの実行順（空の入力には空の順序）
/// * `Err(WorkflowError::UnknownDependency)` - 存在しないステップへの依存がある場合
/// * `Err(WorkflowError::Cycle)` - 循環がある場合（部分的な順序は返さない）
///
/// # 例
///
/// ```
/// use local_agents::config::{AgentKind, StepSpec};
/// use local_agents::engine::resolver::resolve;
///
/// let steps = vec![
///     StepSpec::new("test", AgentKind::Test).depends_on(["code"]),
///     StepSpec::new("plan", AgentKind::Plan),
///     StepSpec::new("code", AgentKind::Code).depends_on(["plan"]),
/// ];
///
/// assert_eq!(resolve(&steps).unwrap(), ["plan", "code", "test"]);
/// ```
pub fn resolve(steps: &[StepSpec]) -> Result<Vec<String>, WorkflowError> {
    resolve_indices(steps).map(|order| {
        order
            .into_iter()
            .map(|i| steps[i].id().to_string())
            .collect()
    })
}

/// 実行順序を宣言順のインデックスで求める
pub(crate) fn resolve_indices(steps: &[StepSpec]) -> Result<Vec<usize>, WorkflowError> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, step)| (step.id(), i))
        .collect();

    // 依存先 -> 依存元 の隣接リストと入次数
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    let mut in_degree = vec![0usize; steps.len()];

    for (i, step) in steps.iter().enumerate() {
        for dep in step.dependencies() {
            let &d = index
                .get(dep.as_str())
                .ok_or_else(|| WorkflowError::UnknownDependency {
                    step: step.id().to_string(),
                    dependency: dep.clone(),
                })?;
            dependents[d].push(i);
            in_degree[i] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < steps.len() {
        return Err(WorkflowError::Cycle {
            steps: cycle_members(steps, &in_degree, &dependents),
        });
    }

    Ok(order)
}

/// Kahn で取り残されたステップから、循環に関与するものだけを宣言順で返す
///
/// 取り残されたステップのうち、取り残された依存元を持たないもの
/// （循環の下流にあるだけのステップ）を繰り返し取り除く。
fn cycle_members(steps: &[StepSpec], in_degree: &[usize], dependents: &[Vec<usize>]) -> Vec<String> {
    let mut remaining: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();

    loop {
        let downstream: Vec<usize> = (0..steps.len())
            .filter(|&i| remaining[i] && !dependents[i].iter().any(|&d| remaining[d]))
            .collect();
        if downstream.is_empty() {
            break;
        }
        for i in downstream {
            remaining[i] = false;
        }
    }

    (0..steps.len())
        .filter(|&i| remaining[i])
        .map(|i| steps[i].id().to_string())
        .collect()
}

/// 各ステップの推移的な依存先
///
/// # 戻り値
///
/// ステップID -> そのステップが（直接・間接に）依存するステップIDの集合
pub fn ancestors(steps: &[StepSpec]) -> Result<BTreeMap<String, BTreeSet<String>>, WorkflowError> {
    let order = resolve_indices(steps)?;
    let mut result: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for i in order {
        let step = &steps[i];
        let mut set = BTreeSet::new();
        for dep in step.dependencies() {
            set.insert(dep.clone());
            if let Some(inherited) = result.get(dep) {
                set.extend(inherited.iter().cloned());
            }
        }
        result.insert(step.id().to_string(), set);
    }

    Ok(result)
}

/// 宣言された入力キーが供給可能かを検査
///
/// 各ステップの `inputs` と `context_mapping` の参照元キーは、
/// 初期キーか、推移的な依存先が書き込むキー（`<id>_output`、`latest_output`、
/// 宣言された `outputs`）でなければなりません。
///
/// # 引数
///
/// * `steps` - ステップ定義
/// * `seed_keys` - 実行開始時にコンテキストに存在するキー
///
/// # 戻り値
///
/// * `Err(WorkflowError::MissingInput)` - 宣言順で最初に見つかった供給元のないキー
pub fn validate_inputs(steps: &[StepSpec], seed_keys: &BTreeSet<String>) -> Result<(), WorkflowError> {
    let ancestors = ancestors(steps)?;
    let by_id: HashMap<&str, &StepSpec> = steps.iter().map(|s| (s.id(), s)).collect();

    for step in steps {
        let mut available: BTreeSet<String> = seed_keys.clone();
        if let Some(deps) = ancestors.get(step.id()) {
            for dep in deps {
                if let Some(spec) = by_id.get(dep.as_str()) {
                    available.extend(spec.produced_keys());
                }
            }
        }

        let required = step
            .inputs()
            .iter()
            .chain(step.context_mapping().keys());
        for key in required {
            if !available.contains(key) {
                return Err(WorkflowError::MissingInput {
                    step: step.id().to_string(),
                    key: key.clone(),
                });
            }
        }
    }

    Ok(())
}
