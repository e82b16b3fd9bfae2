//! Built-in task handlers

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use flotilla_core::engine::Artifact;
use flotilla_core::error::{ConfigError, PluginError, Result};

use crate::process::CommandSpec;
use crate::task::{TaskContext, TaskHandler, TaskOptions};

/// Runs the task's command line, then collects its declared outputs.
///
/// Every output pattern must match at least one file. Matched files are
/// added to the compilation with their content hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandHandler;

impl CommandHandler {
    pub const NAME: &'static str = "command";
}

/// Output name relative to the build root, with forward slashes
fn unit_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[async_trait]
impl TaskHandler for CommandHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, options: &TaskOptions) -> std::result::Result<(), ConfigError> {
        match options.command.as_deref().map(str::trim) {
            Some(command) if !command.is_empty() => {}
            _ => return Err(ConfigError::MissingField(format!("tasks.{}.command", options.name))),
        }
        for pattern in &options.outputs {
            glob::Pattern::new(pattern).map_err(|e| ConfigError::InvalidValue {
                field: format!("tasks.{}.outputs", options.name),
                message: format!("invalid pattern '{}': {}", pattern, e),
            })?;
        }
        Ok(())
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        let options = &ctx.options;
        let command = options
            .command
            .clone()
            .ok_or_else(|| ConfigError::MissingField(format!("tasks.{}.command", options.name)))?;

        let spec = CommandSpec::new(command, ctx.root()).with_env(options.env.clone());
        let output = ctx.runner.run(&spec).await?;
        if !output.success() {
            return Err(PluginError::ToolFailed {
                tool: options
                    .tool
                    .clone()
                    .unwrap_or_else(|| spec.program().to_string()),
                exit_code: output.exit_code,
                stderr: output.stderr,
            }
            .into());
        }

        let root = ctx.root();
        for pattern in &options.outputs {
            let full = root.join(pattern);
            let paths = glob::glob(&full.to_string_lossy()).map_err(|e| ConfigError::InvalidValue {
                field: format!("tasks.{}.outputs", options.name),
                message: e.to_string(),
            })?;

            let mut matched = 0;
            for path in paths.flatten().filter(|p| p.is_file()) {
                let content = tokio::fs::read(&path).await?;
                let name = unit_name(root, &path);
                debug!(task = %options.name, unit = %name, "collected output");
                ctx.phase.compilation.add(name, Artifact::hashed(content));
                matched += 1;
            }

            if matched == 0 {
                return Err(PluginError::MissingOutput {
                    plugin: options.name.clone(),
                    path: full,
                }
                .into());
            }
        }

        info!(build = %ctx.phase.build.name, task = %options.name, "task finished");
        Ok(())
    }
}
