use serde::Serialize;
use std::io::Write as _;

use super::OutputFormatter;
use crate::plan::Plan;
use crate::run::RunSummary;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan: &Plan) {}

    fn print_plan(&self, plan: &Plan) -> anyhow::Result<()> {
        emit_json_line(&build_plan_line(plan))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        emit_json_line(&build_summary_line(summary))
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonPlanLine {
    pub kind: &'static str,
    pub timeout_ms: u128,
    pub variables: Vec<JsonVariable>,
    pub scenarios: Vec<JsonScenarioPlan>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonVariable {
    pub name: String,
    pub kind: String,
    pub exclusivity: String,
    pub exhaustion: String,
    pub values: Option<u64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonScenarioPlan {
    pub name: String,
    pub vus: u64,
    pub iterations: u64,
    pub steps: usize,
    pub failure: String,
    pub on_exhausted: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub scenarios: Vec<JsonScenarioSummary>,
    pub sources: Vec<JsonSourceSummary>,
    pub totals: JsonTotals,
    pub keystore_entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonScenarioSummary {
    pub scenario: String,
    pub vus: u64,
    pub iterations_total: u64,
    pub iterations_failed: u64,
    pub requests_total: u64,
    pub exhausted_total: u64,
    pub timeouts_total: u64,
    pub restarts_total: u64,
    pub users_stopped: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSourceSummary {
    pub name: String,
    pub served: u64,
    pub state: String,
    pub values: Option<u64>,
}

#[derive(Debug, Serialize, Default)]
pub(crate) struct JsonTotals {
    pub iterations_total: u64,
    pub iterations_failed: u64,
    pub requests_total: u64,
    pub exhausted_total: u64,
}

fn build_plan_line(plan: &Plan) -> JsonPlanLine {
    JsonPlanLine {
        kind: "plan",
        timeout_ms: plan.timeout.as_millis(),
        variables: plan
            .registry
            .iter()
            .map(|v| JsonVariable {
                name: v.name().to_string(),
                kind: v.kind().to_string(),
                exclusivity: v.exclusivity().to_string(),
                exhaustion: v.policy().to_string(),
                values: v.len(),
            })
            .collect(),
        scenarios: plan
            .scenarios
            .iter()
            .map(|s| JsonScenarioPlan {
                name: s.name.clone(),
                vus: s.vus,
                iterations: s.iterations,
                steps: s.steps.len(),
                failure: s.failure.to_string(),
                on_exhausted: s.on_exhausted.to_string(),
            })
            .collect(),
    }
}

fn build_summary_line(summary: &RunSummary) -> JsonSummaryLine {
    let mut totals = JsonTotals::default();
    let scenarios = summary
        .scenarios
        .iter()
        .map(|s| {
            totals.iterations_total = totals.iterations_total.saturating_add(s.iterations_total);
            totals.iterations_failed = totals.iterations_failed.saturating_add(s.iterations_failed);
            totals.requests_total = totals.requests_total.saturating_add(s.requests_total);
            totals.exhausted_total = totals.exhausted_total.saturating_add(s.exhausted);

            JsonScenarioSummary {
                scenario: s.scenario.clone(),
                vus: s.vus,
                iterations_total: s.iterations_total,
                iterations_failed: s.iterations_failed,
                requests_total: s.requests_total,
                exhausted_total: s.exhausted,
                timeouts_total: s.timeouts,
                restarts_total: s.restarts,
                users_stopped: s.users_stopped,
            }
        })
        .collect::<Vec<_>>();

    let sources = summary
        .sources
        .iter()
        .map(|s| JsonSourceSummary {
            name: s.name.to_string(),
            served: s.served,
            state: s.state.to_string(),
            values: s.len,
        })
        .collect();

    JsonSummaryLine {
        kind: "summary",
        scenarios,
        sources,
        totals,
        keystore_entries: summary.keystore_entries,
        aborted: summary.aborted.clone(),
        elapsed_secs: summary.elapsed.as_secs_f64(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, line)?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::ScenarioSummary;

    #[test]
    fn summary_totals_add_up() {
        let summary = RunSummary {
            scenarios: vec![
                ScenarioSummary {
                    scenario: "a".to_string(),
                    iterations_total: 3,
                    iterations_failed: 1,
                    requests_total: 6,
                    exhausted: 1,
                    ..ScenarioSummary::default()
                },
                ScenarioSummary {
                    scenario: "b".to_string(),
                    iterations_total: 2,
                    requests_total: 2,
                    ..ScenarioSummary::default()
                },
            ],
            ..RunSummary::default()
        };

        let line = build_summary_line(&summary);
        assert_eq!(line.totals.iterations_total, 5);
        assert_eq!(line.totals.iterations_failed, 1);
        assert_eq!(line.totals.requests_total, 8);
        assert_eq!(line.totals.exhausted_total, 1);

        let json = match serde_json::to_value(&line) {
            Ok(v) => v,
            Err(err) => panic!("serialize: {err}"),
        };
        assert_eq!(json["kind"], "summary");
        assert!(json.get("aborted").is_none());
    }
}
