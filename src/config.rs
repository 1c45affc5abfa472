use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposerConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub finalize: FinalizeConfig,
    #[serde(default)]
    pub grouping: GroupingConfig,
}

/// [agent] section: the external command that answers grouping and message
/// requests. `{prompt}` in any argument is replaced with the prompt text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_cmd")]
    pub command: String,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a bootstrapped session stays cached after its last use
    #[serde(default = "default_bootstrap_ttl")]
    pub bootstrap_ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeConfig {
    #[serde(default = "default_stash_prefix")]
    pub stash_message_prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

fn default_agent_cmd() -> String {
    "claude".into()
}

fn default_agent_args() -> Vec<String> {
    vec!["--print".into(), "-p".into(), "{prompt}".into()]
}

fn default_agent_timeout() -> u64 {
    120
}

fn default_bootstrap_ttl() -> u64 {
    300
}

fn default_stash_prefix() -> String {
    crate::compose::DEFAULT_STASH_PREFIX.into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_cmd(),
            args: default_agent_args(),
            timeout_secs: default_agent_timeout(),
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bootstrap_ttl_secs: default_bootstrap_ttl(),
        }
    }
}

impl SessionConfig {
    pub fn bootstrap_ttl(&self) -> Duration {
        Duration::from_secs(self.bootstrap_ttl_secs)
    }
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            stash_message_prefix: default_stash_prefix(),
        }
    }
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("composer").join("config.toml"))
}

/// Load config by merging global defaults with per-repo overrides.
/// Priority: per-repo `.composer.toml` > global `~/.config/composer/config.toml` > built-in defaults.
/// Merging is deep: individual fields within sections (e.g. `[agent]`) override independently.
pub fn load_config(repo_root: &Path) -> ComposerConfig {
    let global = global_config_path().and_then(|p| read_table(&p));
    let local = read_table(&repo_root.join(".composer.toml"));
    merge_tables(global, local)
}

fn read_table(path: &Path) -> Option<toml::Table> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<toml::Table>(&content) {
        Ok(table) => Some(table),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
            None
        }
    }
}

fn merge_tables(global: Option<toml::Table>, local: Option<toml::Table>) -> ComposerConfig {
    let merged = match (global, local) {
        (Some(mut global), Some(local)) => {
            deep_merge(&mut global, local);
            global
        }
        (Some(global), None) => global,
        (None, Some(local)) => local,
        (None, None) => return ComposerConfig::default(),
    };

    toml::Value::Table(merged).try_into().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "invalid config, using defaults");
        ComposerConfig::default()
    })
}

/// Recursively merge `overlay` into `base`. Overlay values win; nested tables are merged recursively.
fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                deep_merge(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Save config to the global config dir (~/.config/composer/config.toml).
pub fn save_config(config: &ComposerConfig) -> Result<PathBuf> {
    let path = global_config_path().context("Could not determine config directory")?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(text: &str) -> Option<toml::Table> {
        Some(toml::from_str(text).unwrap())
    }

    #[test]
    fn defaults_without_files() {
        let config = merge_tables(None, None);
        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.agent.args, vec!["--print", "-p", "{prompt}"]);
        assert_eq!(config.agent.timeout(), Duration::from_secs(120));
        assert_eq!(config.session.bootstrap_ttl(), Duration::from_secs(300));
        assert_eq!(config.finalize.stash_message_prefix, "Commit composer");
        assert_eq!(config.grouping.custom_instructions, None);
    }

    #[test]
    fn local_fields_override_global_fields_individually() {
        let global = table(
            r#"
            [agent]
            command = "llm"
            timeout_secs = 30

            [grouping]
            custom_instructions = "Keep tests separate"
            "#,
        );
        let local = table(
            r#"
            [agent]
            timeout_secs = 5
            "#,
        );
        let config = merge_tables(global, local);
        assert_eq!(config.agent.command, "llm");
        assert_eq!(config.agent.timeout_secs, 5);
        assert_eq!(config.agent.args, default_agent_args());
        assert_eq!(
            config.grouping.custom_instructions.as_deref(),
            Some("Keep tests separate")
        );
    }

    #[test]
    fn invalid_types_fall_back_to_defaults() {
        let local = table("[session]\nbootstrap_ttl_secs = \"soon\"\n");
        assert_eq!(merge_tables(None, local), ComposerConfig::default());
    }

    #[test]
    fn local_file_is_read_from_the_repository() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".composer.toml"),
            "[finalize]\nstash_message_prefix = \"Composer\"\n",
        )
        .unwrap();
        let local = read_table(&dir.path().join(".composer.toml"));
        assert_eq!(merge_tables(None, local).finalize.stash_message_prefix, "Composer");
    }

    #[test]
    fn saved_config_round_trips_through_toml() {
        let mut config = ComposerConfig::default();
        config.grouping.custom_instructions = Some("Small commits".into());
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(merge_tables(None, table(&text)), config);
    }
}
