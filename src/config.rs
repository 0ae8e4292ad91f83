use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::DEFAULT_API_URL;
use crate::frontmatter::PropertyConfig;
use crate::render::DEFAULT_TEMPLATE;
use crate::sync::{SyncOptions, TemplateMigration};

#[derive(Parser, Debug)]
#[command(name = "paperlight")]
#[command(about = "Mirrors Instapaper highlights into a notes vault", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run incremental sync, once or on the configured interval
    Sync {
        #[arg(long)]
        once: bool,
    },
    /// Re-render previously synced notes with the current template
    UpdateNotes,
    /// Save a URL to the Instapaper reading list
    Save { url: String },
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".paperlight")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

pub fn default_state_path() -> PathBuf {
    default_config_dir().join("state.yaml")
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct App {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub vault_root: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    pub highlight_template: Option<String>,
    /// Template the notes on disk were last rendered with; compared against
    /// `highlight_template` to drive update-notes migration.
    pub previous_highlight_template: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
}

impl Default for App {
    fn default() -> Self {
        App {
            api_url: default_api_url(),
            vault_root: String::new(),
            folder: default_folder(),
            highlight_template: None,
            previous_highlight_template: None,
            sync_interval_seconds: default_sync_interval(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_folder() -> String {
    "Instapaper".to_string()
}

fn default_sync_interval() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Auth {
    pub token: String,
    pub token_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncToggles {
    pub create_files: bool,
    pub sync_highlights: bool,
    pub sync_properties: bool,
    pub remove_disabled_properties: bool,
    pub max_consecutive_errors: u32,
}

impl Default for SyncToggles {
    fn default() -> Self {
        let defaults = SyncOptions::default();
        SyncToggles {
            create_files: defaults.create_files,
            sync_highlights: defaults.sync_highlights,
            sync_properties: defaults.sync_properties,
            remove_disabled_properties: defaults.remove_disabled_properties,
            max_consecutive_errors: defaults.max_consecutive_errors,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub app: App,
    pub auth: Auth,
    pub properties: PropertyConfig,
    pub sync: SyncToggles,
}

/// Field renames from older config layouts, applied on load. One-time
/// upgrade path; values under the new name win.
const LEGACY_APP_FIELDS: &[(&str, &str)] = &[
    ("template", "highlight_template"),
    ("previous_template", "previous_highlight_template"),
    ("save_to", "folder"),
];

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let yaml_str = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        Config::from_yaml(&yaml_str)
    }

    fn from_yaml(yaml_str: &str) -> Result<Config> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str);
        let mut value: serde_yaml::Value = serde_yaml::from_str(&yaml_with_env)?;
        Config::migrate_legacy_fields(&mut value);
        let config: Config = serde_yaml::from_value(value)?;
        Ok(config)
    }

    fn migrate_legacy_fields(value: &mut serde_yaml::Value) {
        let Some(app) = value.get_mut("app").and_then(|v| v.as_mapping_mut()) else {
            return;
        };
        for (old, new) in LEGACY_APP_FIELDS {
            let old_key = serde_yaml::Value::from(*old);
            let new_key = serde_yaml::Value::from(*new);
            if app.contains_key(&new_key) {
                continue;
            }
            if let Some(v) = app.remove(&old_key) {
                tracing::info!("migrating legacy config field {} to {}", old, new);
                app.insert(new_key, v);
            }
        }
    }

    /// Replaces `${VAR}` and `${VAR:-default}` references with environment
    /// values so credentials can stay out of the file.
    fn substitute_env_vars(yaml_str: &str) -> String {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            let Some(end) = result[actual_start..].find('}') else {
                break;
            };
            let var_name = &result[actual_start + 2..actual_start + end];

            let env_value = if let Some(default_start) = var_name.find(":-") {
                let actual_var = &var_name[..default_start];
                let default_val = &var_name[default_start + 2..];
                env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
            } else {
                env::var(var_name).unwrap_or_else(|_| {
                    tracing::warn!("environment variable '{}' not found", var_name);
                    String::new()
                })
            };

            result.replace_range(actual_start..actual_start + end + 1, &env_value);
            offset = actual_start + env_value.len();
        }

        result
    }

    pub fn notes_folder(&self) -> PathBuf {
        Path::new(&self.app.vault_root).join(&self.app.folder)
    }

    pub fn template(&self) -> String {
        self.app
            .highlight_template
            .clone()
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string())
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            create_files: self.sync.create_files,
            sync_highlights: self.sync.sync_highlights,
            sync_properties: self.sync.sync_properties,
            remove_disabled_properties: self.sync.remove_disabled_properties,
            update_highlight_template: None,
            max_consecutive_errors: self.sync.max_consecutive_errors,
        }
    }

    /// Options for the update-notes pass: same toggles plus the rewrite of
    /// blocks rendered under the previous (or legacy) template.
    pub fn update_notes_options(&self) -> SyncOptions {
        SyncOptions {
            update_highlight_template: Some(TemplateMigration {
                from: self.app.previous_highlight_template.clone(),
                to: self.template(),
            }),
            ..self.sync_options()
        }
    }
}

/// Durable sync progress, persisted by the CLI after every run. The
/// orchestrator itself never touches this; it only takes and returns the
/// cursor value.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct State {
    pub cursor: i64,
}

impl State {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(State::default());
        }
        let yaml_str = fs::read_to_string(path)
            .with_context(|| format!("failed to read state file {}", path.display()))?;
        Ok(serde_yaml::from_str(&yaml_str)?)
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let yaml_str = serde_yaml::to_string(self)?;
        fs::write(path, yaml_str)
            .with_context(|| format!("failed to write state file {}", path.display()))
    }
}
