//! Build command - run the configured sub-builds

use std::sync::Arc;

use clap::Args;
use console::style;
use tracing::info;

use flotilla_core::cache::{FileCache, KeyValueCache, MemoryCache};
use flotilla_core::coordinator::WaitOutcome;
use flotilla_tasks::{Orchestrator, RunEvent, RunReport, RunReporter, RunReporterRegistry};

use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Run the configured builds
#[derive(Debug, Args)]
pub struct BuildCommand {
    /// Only run these builds (can be repeated)
    #[arg(short, long = "build")]
    pub builds: Vec<String>,

    /// Do not read or persist fingerprints
    #[arg(long)]
    pub no_cache: bool,
}

impl BuildCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        // Run async operation in tokio runtime
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let project = cli.load_project()?;
        info!(
            config = %project.config_path.display(),
            builds = ?self.builds,
            no_cache = self.no_cache,
            "executing build command"
        );

        let cache: Arc<dyn KeyValueCache> = if self.no_cache {
            Arc::new(MemoryCache::new())
        } else {
            Arc::new(FileCache::new(project.cache_dir()))
        };

        let mut reporters = RunReporterRegistry::new();
        if !cli.quiet && cli.format == OutputFormat::Text {
            reporters.register(ConsoleReporter::new(cli.verbose));
        }

        let orchestrator = Orchestrator::new(project.config, &project.root)
            .with_cache(cache)
            .with_reporters(reporters);

        if !cli.quiet && cli.format == OutputFormat::Text {
            println!();
            output::info(&format!(
                "Building in {}",
                output::path_style().apply_to(project.root.display())
            ));
            println!();
        }

        let report = match orchestrator.run(&self.builds).await {
            Ok(report) => report,
            Err(err) => {
                output::error(&err.to_string());
                std::process::exit(err.exit_code());
            }
        };

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else if !cli.quiet {
            print_summary(&report);
        }

        if report.has_errors() {
            std::process::exit(exit_codes::ERROR);
        }
        Ok(())
    }
}

fn print_summary(report: &RunReport) {
    let diagnostics = report.diagnostics();
    if !diagnostics.is_empty() {
        println!();
        println!("{}", output::header("Diagnostics"));
        for d in &diagnostics {
            println!("{}", output::diagnostic(d));
        }
    }

    println!();
    if report.has_errors() {
        output::error(&format!(
            "Build failed: {} error(s), {} warning(s)",
            report.error_count(),
            report.warning_count()
        ));
    } else {
        output::success(&format!(
            "{} build{} completed in {:.1}s",
            report.builds.len(),
            if report.builds.len() == 1 { "" } else { "s" },
            report.duration_ms as f64 / 1000.0
        ));
    }
}

/// Console reporter with live progress
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl RunReporter for ConsoleReporter {
    fn report(&self, event: &RunEvent) {
        match event {
            RunEvent::BuildStarted { build, plugins } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(build).bold(),
                    if self.verbose {
                        style(format!("({})", plugins.join(", "))).dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
            RunEvent::PluginSkipped {
                build,
                plugin,
                reason,
            } => {
                if self.verbose {
                    println!(
                        "    {} {}:{} {}",
                        style("○").yellow(),
                        build,
                        style(plugin).yellow(),
                        style(format!("({})", reason)).dim()
                    );
                }
            }
            RunEvent::WaitResolved {
                build,
                target,
                outcome,
            } => match outcome {
                WaitOutcome::TimedOut => println!(
                    "    {} {} stopped waiting for {}",
                    style("!").yellow(),
                    style(build).bold(),
                    style(target).yellow()
                ),
                _ => {
                    if self.verbose {
                        println!(
                            "    {} {} waited for {}",
                            style("─").dim(),
                            build,
                            target
                        );
                    }
                }
            },
            RunEvent::PhaseCompleted {
                build,
                point,
                duration,
            } => {
                if self.verbose {
                    println!(
                        "    {} {} {} {}",
                        style("─").dim(),
                        build,
                        point,
                        style(format!("{:.3}s", duration.as_secs_f64())).dim()
                    );
                }
            }
            RunEvent::BuildFinished {
                build,
                duration,
                errors,
                warnings,
            } => {
                if *errors > 0 {
                    println!(
                        "  {} {} {} {}",
                        style("✗").red(),
                        style(build).red(),
                        style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                        style(format!("{} error(s)", errors)).red().dim()
                    );
                } else if *warnings > 0 {
                    println!(
                        "  {} {} {} {}",
                        style("✓").green(),
                        style(build).green(),
                        style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                        style(format!("{} warning(s)", warnings)).yellow().dim()
                    );
                } else {
                    println!(
                        "  {} {} {}",
                        style("✓").green(),
                        style(build).green(),
                        style(format!("{:.1}s", duration.as_secs_f64())).dim()
                    );
                }
            }
            RunEvent::RunCompleted { .. } => {}
        }
    }
}
