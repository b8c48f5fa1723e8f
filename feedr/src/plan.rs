use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use feedr_core::config::serde_duration;
use feedr_core::{
    DEFAULT_REQUEST_TIMEOUT, FailurePolicy, OnExhausted, Registry, RegistryOptions, Template,
    VariableDecl,
};
use serde::{Deserialize, Serialize};

/// A plan file as written by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PlanYaml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Per-request timeout for data and keystore requests.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_duration::option"
    )]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub variables: Vec<VariableDecl>,

    #[serde(default)]
    pub scenarios: Vec<ScenarioYaml>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ScenarioYaml {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vus: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u64>,

    #[serde(default)]
    pub failure: FailurePolicy,

    #[serde(default)]
    pub on_exhausted: OnExhausted,

    pub steps: Vec<StepYaml>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct StepYaml {
    pub request: String,

    /// Keystore key that receives the rendered request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_as: Option<String>,
}

/// CLI values that take precedence over the plan.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Overrides {
    pub vus: Option<u64>,
    pub iterations: Option<u64>,
    pub timeout: Option<Duration>,
    pub seed: Option<u64>,
}

#[derive(Debug)]
pub(crate) struct Plan {
    pub path: PathBuf,
    pub registry: Arc<Registry>,
    pub timeout: Duration,
    pub scenarios: Vec<Scenario>,
}

#[derive(Debug)]
pub(crate) struct Scenario {
    pub name: String,
    pub vus: u64,
    pub iterations: u64,
    pub failure: FailurePolicy,
    pub on_exhausted: OnExhausted,
    pub steps: Arc<[Step]>,
}

#[derive(Debug)]
pub(crate) struct Step {
    pub template: Template,
    pub save_as: Option<String>,
}

pub(crate) async fn read_plan(path: &Path) -> anyhow::Result<PlanYaml> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read plan: {}", path.display()))?;
    parse_plan(&text).with_context(|| format!("invalid plan: {}", path.display()))
}

pub(crate) fn parse_plan(text: &str) -> anyhow::Result<PlanYaml> {
    Ok(serde_yaml::from_str(text)?)
}

/// Builds every source and validates every step template.
///
/// Relative record-set paths resolve against the plan's directory.
pub(crate) fn compile(path: &Path, yaml: PlanYaml, overrides: Overrides) -> anyhow::Result<Plan> {
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf);
    let opts = RegistryOptions {
        base_dir,
        seed: overrides.seed.or(yaml.seed),
        ..RegistryOptions::default()
    };
    let registry = Registry::from_decls(&yaml.variables, &opts)?;

    let mut names = HashSet::new();
    let mut scenarios = Vec::with_capacity(yaml.scenarios.len());
    for s in yaml.scenarios {
        anyhow::ensure!(!s.name.trim().is_empty(), "scenario name cannot be empty");
        anyhow::ensure!(
            names.insert(s.name.clone()),
            "scenario `{}` is declared more than once",
            s.name
        );
        anyhow::ensure!(!s.steps.is_empty(), "scenario `{}` has no steps", s.name);

        let vus = overrides.vus.or(s.vus).unwrap_or(1);
        anyhow::ensure!(vus > 0, "scenario `{}`: vus must be at least 1", s.name);
        let iterations = overrides.iterations.or(s.iterations).unwrap_or(1);

        let steps = s
            .steps
            .into_iter()
            .map(|step| {
                let template = Template::parse(&step.request)?;
                registry.check_template(&template)?;
                Ok(Step {
                    template,
                    save_as: step.save_as,
                })
            })
            .collect::<Result<Vec<_>, feedr_core::Error>>()
            .with_context(|| format!("scenario `{}`", s.name))?;

        scenarios.push(Scenario {
            name: s.name,
            vus,
            iterations,
            failure: s.failure,
            on_exhausted: s.on_exhausted,
            steps: steps.into(),
        });
    }

    Ok(Plan {
        path: path.to_path_buf(),
        registry: Arc::new(registry),
        timeout: overrides
            .timeout
            .or(yaml.timeout)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        scenarios,
    })
}
