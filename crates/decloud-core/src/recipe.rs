//! Data-driven recipes built from external commands.
//!
//! A definition names a type, a config schema and an ordered list of steps.
//! Each step belongs to a phase and runs one program. The migration's
//! configuration reaches the program through environment variables:
//!
//! ```text
//! DECLOUD_MIGRATION_ID       migration id
//! DECLOUD_CATEGORY           category of a composite run, if any
//! DECLOUD_SOURCE_<KEY>       source.<key>
//! DECLOUD_DESTINATION_<KEY>  destination.<key>
//! DECLOUD_OPTIONS_<KEY>      options.<key>
//! ```
//!
//! Keys are upper-cased with every non-alphanumeric character replaced by
//! `_`. Strings are passed verbatim, other values as JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigSchema, MigrationConfig, Section};
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::validation::ValidationResult;

/// One command of a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStep {
    /// Phase this step belongs to.
    pub phase: String,
    /// Program to run, resolved through `PATH`.
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Downgrade a failure of this step to a warning.
    #[serde(default)]
    pub best_effort: bool,
}

/// Serialized form of a [`CommandRecipe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeDefinition {
    #[serde(rename = "type")]
    pub migration_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub schema: ConfigSchema,
    pub steps: Vec<CommandStep>,
}

/// An [`Executor`] whose phases are external commands.
#[derive(Debug, Clone)]
pub struct CommandRecipe {
    definition: RecipeDefinition,
    phases: Vec<String>,
}

impl CommandRecipe {
    /// Build a recipe, checking the definition is usable.
    pub fn from_definition(definition: RecipeDefinition) -> Result<Self> {
        if definition.migration_type.trim().is_empty() {
            return Err(Error::InvalidDefinition("recipe type is empty".to_string()));
        }
        if definition.steps.is_empty() {
            return Err(Error::InvalidDefinition(format!(
                "{}: recipe has no steps",
                definition.migration_type
            )));
        }

        let mut phases: Vec<String> = Vec::new();
        for (i, step) in definition.steps.iter().enumerate() {
            if step.program.trim().is_empty() {
                return Err(Error::InvalidDefinition(format!(
                    "{}: step {} has no program",
                    definition.migration_type,
                    i + 1
                )));
            }
            match phases.iter().position(|p| *p == step.phase) {
                None => phases.push(step.phase.clone()),
                Some(pos) if pos + 1 != phases.len() => {
                    return Err(Error::InvalidDefinition(format!(
                        "{}: steps of phase `{}` are not contiguous",
                        definition.migration_type, step.phase
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(Self { definition, phases })
    }

    pub fn definition(&self) -> &RecipeDefinition {
        &self.definition
    }

    /// Parse a JSON array of definitions.
    pub fn from_json_str(json: &str) -> Result<Vec<Self>> {
        let definitions: Vec<RecipeDefinition> =
            serde_json::from_str(json).map_err(|e| Error::InvalidDefinition(e.to_string()))?;
        definitions.into_iter().map(Self::from_definition).collect()
    }

    /// Load a JSON array of definitions from a file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let recipes = Self::from_json_str(&json)?;
        tracing::info!(path = %path.display(), count = recipes.len(), "loaded recipes");
        Ok(recipes)
    }

    fn environment(ctx: &ExecutionContext, config: &MigrationConfig) -> Vec<(String, String)> {
        let mut env = vec![("DECLOUD_MIGRATION_ID".to_string(), ctx.migration_id().to_string())];
        if let Some(category) = ctx.category() {
            env.push(("DECLOUD_CATEGORY".to_string(), category.to_string()));
        }
        for section in [Section::Source, Section::Destination, Section::Options] {
            for (key, value) in config.bag(section).iter() {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                env.push((env_name(section, key), value));
            }
        }
        env
    }
}

fn env_name(section: Section, key: &str) -> String {
    let key: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("DECLOUD_{}_{key}", section.as_str().to_ascii_uppercase())
}

#[async_trait]
impl Executor for CommandRecipe {
    fn migration_type(&self) -> &str {
        &self.definition.migration_type
    }

    fn phases(&self) -> Vec<String> {
        self.phases.clone()
    }

    async fn validate(
        &self,
        _cancel: &CancellationToken,
        config: &MigrationConfig,
    ) -> Result<ValidationResult> {
        Ok(self.definition.schema.validate(config))
    }

    async fn execute(&self, ctx: &ExecutionContext, config: &MigrationConfig) -> Result<()> {
        let env = Self::environment(ctx, config);
        let total = self.phases.len() as u64;

        for (i, phase) in self.phases.iter().enumerate() {
            ctx.phase(phase, i + 1)?;

            for step in self.definition.steps.iter().filter(|s| s.phase == *phase) {
                ctx.set_current_item(step.program.clone());
                ctx.debug(format!("running {} {}", step.program, step.args.join(" ")));

                let mut command = Command::new(&step.program);
                command.args(&step.args).envs(env.iter().map(|(k, v)| (k, v)));

                match ctx.run_command(command).await {
                    Ok(output) => {
                        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
                            ctx.info(line);
                        }
                    }
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) if step.best_effort => {
                        ctx.warn(format!("best-effort step failed: {e}"));
                    }
                    Err(e) => return Err(e),
                }
            }

            ctx.progress_items(i as u64 + 1, total, format!("{phase} finished"));
        }

        Ok(())
    }
}
