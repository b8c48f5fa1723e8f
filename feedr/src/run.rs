use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use feedr_core::{
    Bus, Consumer, ConsumerId, ConsumerSettings, Controller, Error, FailurePolicy, Keystore,
    KeystoreClient, Producer, SourceStats, StopReason, Value, link_pair,
};
use tokio::task::JoinSet;

use crate::cli::{CheckArgs, RunArgs};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::plan::{self, Overrides, Plan, Scenario, Step};
use crate::run_error::RunError;

/// How many times one virtual user may start its scenario over.
const MAX_RESTARTS: u64 = 3;

pub(crate) type AbortFn = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub(crate) struct RunSummary {
    pub scenarios: Vec<ScenarioSummary>,
    pub sources: Vec<SourceStats>,
    pub keystore_entries: usize,
    pub aborted: Option<String>,
    pub elapsed: Duration,
}

impl RunSummary {
    fn exit_code(&self) -> ExitCode {
        let (failed, exhausted) = self.scenarios.iter().fold((0u64, 0u64), |(f, e), s| {
            (
                f.saturating_add(s.iterations_failed),
                e.saturating_add(s.exhausted),
            )
        });
        ExitCode::from_outcome(failed, exhausted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ScenarioSummary {
    pub scenario: String,
    pub vus: u64,
    pub iterations_total: u64,
    pub iterations_failed: u64,
    pub requests_total: u64,
    pub exhausted: u64,
    pub timeouts: u64,
    pub restarts: u64,
    pub users_stopped: u64,
}

impl ScenarioSummary {
    fn add(&mut self, vu: &VuOutcome) {
        self.iterations_total = self.iterations_total.saturating_add(vu.iterations);
        self.iterations_failed = self.iterations_failed.saturating_add(vu.failed);
        self.requests_total = self.requests_total.saturating_add(vu.requests);
        self.exhausted = self.exhausted.saturating_add(vu.exhausted);
        self.timeouts = self.timeouts.saturating_add(vu.timeouts);
        self.restarts = self.restarts.saturating_add(vu.restarts);
        if vu.stopped_early {
            self.users_stopped += 1;
        }
    }
}

pub async fn check(args: CheckArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);
    let plan = load(&args.plan, Overrides::default()).await?;
    out.print_plan(&plan).map_err(RunError::RuntimeError)?;
    Ok(ExitCode::Success)
}

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);
    let overrides = Overrides {
        vus: args.vus,
        iterations: args.iterations,
        timeout: args.timeout,
        seed: args.seed,
    };
    let plan = load(&args.plan, overrides).await?;
    out.print_header(&plan);

    let summary = execute(&plan, args.workers)
        .await
        .map_err(RunError::RuntimeError)?;
    out.print_summary(&summary)
        .map_err(RunError::RuntimeError)?;

    Ok(summary.exit_code())
}

async fn load(path: &std::path::Path, overrides: Overrides) -> Result<Plan, RunError> {
    let yaml = plan::read_plan(path).await.map_err(RunError::InvalidInput)?;
    plan::compile(path, yaml, overrides)
        .with_context(|| format!("invalid plan: {}", path.display()))
        .map_err(RunError::InvalidInput)
}

/// Runs every scenario against an in-process controller.
///
/// Virtual users are dealt round-robin over `workers` connections; each connection has its own
/// bus exactly as a remote worker would.
pub(crate) async fn execute(plan: &Plan, workers: u64) -> anyhow::Result<RunSummary> {
    let started = Instant::now();
    let producer = Arc::new(Producer::from_registry(&plan.registry));
    let controller = Arc::new(Controller::new(producer, Arc::new(Keystore::default())));

    let buses = (0..workers.max(1))
        .map(|_| {
            let worker = worker_id();
            let (worker_end, controller_end) = link_pair();
            controller.attach(worker.clone(), controller_end);
            (worker, Bus::spawn("controller", worker_end, None))
        })
        .collect::<Vec<_>>();

    let aborted = Arc::new(std::sync::Mutex::new(None::<String>));
    let abort: AbortFn = {
        let controller = controller.clone();
        let aborted = aborted.clone();
        Arc::new(move |reason: String| {
            let mut slot = aborted.lock().unwrap_or_else(|p| p.into_inner());
            if slot.is_none() {
                tracing::warn!(%reason, "aborting run");
                controller.stop(StopReason::Aborted(reason.clone()));
                *slot = Some(reason);
            }
        })
    };

    let mut tasks = JoinSet::new();
    let mut next_vu = 0u64;
    for (index, scenario) in plan.scenarios.iter().enumerate() {
        for _ in 0..scenario.vus {
            next_vu += 1;
            let slot = usize::try_from(next_vu).unwrap_or(0) % buses.len();
            let (worker, bus) = &buses[slot];

            let consumer = Consumer::new(
                ConsumerId::new(worker.clone(), next_vu),
                plan.registry.clone(),
                bus.clone(),
                ConsumerSettings {
                    request_timeout: plan.timeout,
                    on_exhausted: scenario.on_exhausted,
                },
            );
            let vu_plan = VuPlan::new(scenario);
            let abort = abort.clone();
            tasks.spawn(async move { (index, run_vu(consumer, vu_plan, abort).await) });
        }
    }

    let mut scenarios = plan
        .scenarios
        .iter()
        .map(|s| ScenarioSummary {
            scenario: s.name.clone(),
            vus: s.vus,
            ..ScenarioSummary::default()
        })
        .collect::<Vec<_>>();

    while let Some(joined) = tasks.join_next().await {
        let (index, outcome) = joined.context("virtual user task failed")?;
        if let Some(s) = scenarios.get_mut(index) {
            s.add(&outcome);
        }
    }

    let aborted = aborted.lock().unwrap_or_else(|p| p.into_inner()).take();
    if aborted.is_none() {
        controller.stop(StopReason::Completed);
    }
    for (_, bus) in &buses {
        bus.close();
    }

    Ok(RunSummary {
        scenarios,
        sources: controller.producer().stats(),
        keystore_entries: controller.keystore().len(),
        aborted,
        elapsed: started.elapsed(),
    })
}

fn worker_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &id[..8])
}

struct VuPlan {
    scenario: Arc<str>,
    iterations: u64,
    failure: FailurePolicy,
    steps: Arc<[Step]>,
}

impl VuPlan {
    fn new(s: &Scenario) -> Self {
        Self {
            scenario: Arc::from(s.name.as_str()),
            iterations: s.iterations,
            failure: s.failure,
            steps: s.steps.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct VuOutcome {
    iterations: u64,
    failed: u64,
    requests: u64,
    exhausted: u64,
    timeouts: u64,
    restarts: u64,
    stopped_early: bool,
}

async fn run_vu(mut consumer: Consumer, plan: VuPlan, abort: AbortFn) -> VuOutcome {
    let keystore = consumer.keystore();
    let mut out = VuOutcome::default();
    let mut done = 0u64;

    while done < plan.iterations {
        if consumer.stop_requested() {
            out.stopped_early = true;
            break;
        }

        consumer.begin_iteration();
        out.iterations += 1;
        let err = match run_iteration(&plan.steps, &mut consumer, &keystore, &mut out).await {
            Ok(()) => {
                done += 1;
                continue;
            }
            Err(err) => err,
        };

        out.failed += 1;
        match &err {
            Error::Exhausted { .. } => out.exhausted += 1,
            Error::Timeout { .. } => out.timeouts += 1,
            _ => {}
        }

        let policy = plan.failure.on_error(&err);
        tracing::warn!(
            scenario = %plan.scenario,
            consumer = %consumer.id(),
            iteration = consumer.iteration(),
            %policy,
            "iteration failed: {err}"
        );
        match policy {
            FailurePolicy::Continue => done += 1,
            FailurePolicy::StopUser => {
                out.stopped_early = true;
                break;
            }
            FailurePolicy::RestartScenario if out.restarts < MAX_RESTARTS => {
                out.restarts += 1;
                done = 0;
            }
            FailurePolicy::RestartScenario => {
                out.stopped_early = true;
                break;
            }
            FailurePolicy::AbortRun => {
                abort(format!("{}: {err}", plan.scenario));
                out.stopped_early = true;
                break;
            }
        }
    }

    out
}

async fn run_iteration(
    steps: &[Step],
    consumer: &mut Consumer,
    keystore: &KeystoreClient,
    out: &mut VuOutcome,
) -> feedr_core::Result<()> {
    for step in steps {
        let rendered = step.template.render(consumer).await?;
        out.requests += 1;
        tracing::debug!(consumer = %consumer.id(), request = %rendered, "rendered step");

        if let Some(key) = &step.save_as {
            keystore.set(key, Value::from(rendered)).await?;
        }
    }
    Ok(())
}
