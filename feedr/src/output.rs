use crate::cli::OutputFormat;
use crate::plan::Plan;
use crate::run::RunSummary;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan: &Plan);
    fn print_plan(&self, plan: &Plan) -> anyhow::Result<()>;
    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
