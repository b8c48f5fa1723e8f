use std::fmt::Write as _;

use feedr_core::SourceState;

use super::OutputFormatter;
use crate::plan::Plan;
use crate::run::RunSummary;

pub(crate) struct HumanReadableOutput;

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan: &Plan) {
        println!("plan: {}", plan.path.display());
        for s in &plan.scenarios {
            println!(
                "scenario: {} vus={} iterations={} failure={}",
                s.name, s.vus, s.iterations, s.failure
            );
        }
        if !plan.scenarios.is_empty() {
            println!();
        }
    }

    fn print_plan(&self, plan: &Plan) -> anyhow::Result<()> {
        print!("{}", render_plan(plan));
        Ok(())
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        print!("{}", render_summary(summary));
        Ok(())
    }
}

fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    writeln!(&mut out, "plan: {} (ok)", plan.path.display()).ok();
    writeln!(&mut out, "request timeout: {:?}", plan.timeout).ok();

    if plan.registry.is_empty() {
        out.push_str("variables: none\n");
    } else {
        out.push_str("variables:\n");
    }
    for v in plan.registry.iter() {
        let size = v.len().map_or_else(|| "unbounded".to_string(), |n| n.to_string());
        writeln!(
            &mut out,
            "  {}: {} {} exhaustion={} values={size}",
            v.name(),
            v.kind(),
            v.exclusivity(),
            v.policy()
        )
        .ok();
    }

    for s in &plan.scenarios {
        writeln!(
            &mut out,
            "scenario: {} vus={} iterations={} steps={} failure={} on_exhausted={}",
            s.name,
            s.vus,
            s.iterations,
            s.steps.len(),
            s.failure,
            s.on_exhausted
        )
        .ok();
    }
    out
}

fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();

    if summary.scenarios.is_empty() {
        out.push_str("summary: no scenarios\n");
        return out;
    }

    out.push_str("summary\n");
    for s in &summary.scenarios {
        writeln!(&mut out, "scenario: {}", s.scenario).ok();
        writeln!(
            &mut out,
            "  iterations: {} (failed {})",
            s.iterations_total, s.iterations_failed
        )
        .ok();
        writeln!(&mut out, "  requests: {}", s.requests_total).ok();
        if s.exhausted > 0 {
            writeln!(&mut out, "  data exhausted: {}", s.exhausted).ok();
        }
        if s.timeouts > 0 {
            writeln!(&mut out, "  timeouts: {}", s.timeouts).ok();
        }
        if s.restarts > 0 {
            writeln!(&mut out, "  restarts: {}", s.restarts).ok();
        }
        if s.users_stopped > 0 {
            writeln!(&mut out, "  users stopped early: {} of {}", s.users_stopped, s.vus).ok();
        }
    }

    if !summary.sources.is_empty() {
        out.push_str("sources:\n");
    }
    for src in &summary.sources {
        let marker = if src.state == SourceState::Exhausted {
            " (exhausted)"
        } else {
            ""
        };
        let total = src.len.map(|n| format!("/{n}")).unwrap_or_default();
        writeln!(
            &mut out,
            "  {}: served {}{total}{marker}",
            src.name, src.served
        )
        .ok();
    }

    writeln!(&mut out, "keystore entries: {}", summary.keystore_entries).ok();
    if let Some(reason) = &summary.aborted {
        writeln!(&mut out, "aborted: {reason}").ok();
    }
    writeln!(&mut out, "elapsed: {:.3}s", summary.elapsed.as_secs_f64()).ok();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::ScenarioSummary;
    use feedr_core::SourceStats;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn summary_mentions_exhausted_sources() {
        let summary = RunSummary {
            scenarios: vec![ScenarioSummary {
                scenario: "buy".to_string(),
                vus: 4,
                iterations_total: 4,
                iterations_failed: 1,
                requests_total: 3,
                exhausted: 1,
                users_stopped: 1,
                ..ScenarioSummary::default()
            }],
            sources: vec![SourceStats {
                name: Arc::from("books"),
                served: 3,
                state: SourceState::Exhausted,
                len: Some(3),
            }],
            keystore_entries: 0,
            aborted: None,
            elapsed: Duration::from_millis(1500),
        };

        let text = render_summary(&summary);
        assert!(text.contains("iterations: 4 (failed 1)"), "{text}");
        assert!(text.contains("data exhausted: 1"), "{text}");
        assert!(text.contains("books: served 3/3 (exhausted)"), "{text}");
        assert!(text.contains("users stopped early: 1 of 4"), "{text}");
        assert!(text.contains("elapsed: 1.500s"), "{text}");
    }

    #[test]
    fn empty_summary() {
        assert_eq!(
            render_summary(&RunSummary::default()),
            "summary: no scenarios\n"
        );
    }
}
