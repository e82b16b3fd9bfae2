//! Check command - validate configuration and show the build plan

use std::sync::Arc;

use clap::Args;
use console::style;
use tracing::info;

use flotilla_core::cache::FileCache;
use flotilla_tasks::{BuildPlan, Orchestrator, RunReporterRegistry};

use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Validate configuration and show which plugins each build would run
#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Only check these builds (can be repeated)
    #[arg(short, long = "build")]
    pub builds: Vec<String>,
}

fn plan_json(plan: &BuildPlan) -> serde_json::Value {
    serde_json::json!({
        "name": plan.build.name,
        "kind": plan.build.kind.as_str(),
        "root": plan.build.root.display().to_string(),
        "wait": plan.build.wait.as_ref().map(|w| serde_json::json!({
            "target": w.target,
            "timeout_ms": w.timeout_ms,
        })),
        "plugins": plan.plugins.names(),
        "skipped": plan.skipped,
        "diagnostics": plan.diagnostics.entries(),
    })
}

impl CheckCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let project = cli.load_project()?;
        info!(config = %project.config_path.display(), "executing check command");

        let cache = Arc::new(FileCache::new(project.cache_dir()));
        let config_path = project.config_path.clone();
        let orchestrator = Orchestrator::new(project.config, &project.root)
            .with_cache(cache)
            .with_reporters(RunReporterRegistry::empty());
        let plans = orchestrator.plan(&self.builds)?;
        let has_errors = plans.iter().any(|p| p.diagnostics.has_errors());

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "config": config_path.display().to_string(),
                "valid": !has_errors,
                "builds": plans.iter().map(plan_json).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!();
            println!(
                "{} {}",
                output::header("Configuration"),
                output::path_style().apply_to(config_path.display())
            );
            for plan in &plans {
                print_plan(plan);
            }
            println!();
            if has_errors {
                output::error("Configuration has errors");
            } else {
                output::success("Configuration is valid");
            }
        }

        if has_errors {
            std::process::exit(exit_codes::CONFIG_ERROR);
        }
        Ok(())
    }
}

fn print_plan(plan: &BuildPlan) {
    let build = &plan.build;
    println!();
    println!(
        "  {} {}",
        style(&build.name).bold(),
        style(format!("({})", build.kind)).dim()
    );
    println!("{}", output::key_value("root", &build.root.display().to_string()));
    if let Some(wait) = &build.wait {
        println!(
            "{}",
            output::key_value(
                "waits for",
                &format!("{} (up to {}ms)", wait.target, wait.timeout_ms)
            )
        );
    }
    println!("{}", output::key_value("plugins", &plan.plugins.names().join(", ")));
    for skip in &plan.skipped {
        println!(
            "    {} {} {}",
            style("○").yellow(),
            style(&skip.plugin).yellow(),
            style(format!("({})", skip.reason)).dim()
        );
    }
    for d in plan.diagnostics.entries() {
        println!("{}", output::diagnostic(&d));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::config::Config;

    #[test]
    fn test_plan_json_shape() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "builds": [
                {"name": "lib"},
                {"name": "docs", "kind": "documentation", "wait": {"target": "lib"},
                 "tasks": [{"name": "typedoc", "command": "typedoc", "enabled": false}]}
            ]
        }))
        .unwrap();
        let orchestrator = Orchestrator::new(config, "/repo")
            .with_reporters(RunReporterRegistry::empty());
        let plans = orchestrator.plan(&[]).unwrap();

        let docs = plan_json(&plans[1]);
        assert_eq!(docs["kind"], "documentation");
        assert_eq!(docs["wait"]["target"], "lib");
        assert_eq!(docs["wait"]["timeout_ms"], 30_000);
        assert_eq!(docs["plugins"], serde_json::json!(["lifecycle"]));
        assert_eq!(docs["skipped"][1]["plugin"], "typedoc");
    }
}
