//! Where the runtime's configuration comes from.
//!
//! Without an explicit file two layers are read, each section of a later
//! layer replacing the same section of an earlier one and `[[jobs]]`
//! accumulating:
//!
//! 1. `config.toml` in the user directory (`SCRIPTOR_CONFIG_DIR`, else the
//!    platform config dir plus `scriptor/`)
//! 2. `scriptor.toml` in the project directory
//!
//! A discovered layer that fails to parse is skipped with a warning. An
//! explicit file (`--config`) is the only layer, and any problem with it is
//! an error.

use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, ScriptorConfig};

const PROJECT_FILE: &str = "scriptor.toml";
const USER_FILE: &str = "config.toml";
const CONFIG_DIR_ENV: &str = "SCRIPTOR_CONFIG_DIR";

/// How to find configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// User layer then project layer.
    Discover {
        /// Defaults to the current directory.
        project_dir: Option<PathBuf>,
        /// Defaults to [`user_config_dir`].
        user_dir: Option<PathBuf>,
    },
    /// Exactly this file; discovery is skipped.
    File(PathBuf),
}

impl ConfigSource {
    pub fn discover() -> Self {
        Self::Discover {
            project_dir: None,
            user_dir: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Look for `scriptor.toml` in `dir`. No effect on [`ConfigSource::File`].
    pub fn in_project(mut self, dir: impl Into<PathBuf>) -> Self {
        if let Self::Discover {
            ref mut project_dir,
            ..
        } = self
        {
            *project_dir = Some(dir.into());
        }
        self
    }

    /// Read the user layer from `dir`. No effect on [`ConfigSource::File`].
    pub fn with_user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        if let Self::Discover {
            ref mut user_dir, ..
        } = self
        {
            *user_dir = Some(dir.into());
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    User,
    Project,
    Explicit,
}

/// One file that was considered while loading.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub kind: LayerKind,
    pub path: PathBuf,
    /// Section names this file set, e.g. `["engines", "storage"]`. Empty when not loaded.
    pub sections: Vec<&'static str>,
    pub loaded: bool,
}

/// Merged configuration plus an account of how it was assembled.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ScriptorConfig,
    /// Lowest precedence first.
    pub layers: Vec<ConfigLayer>,
    /// Discovered layers that were skipped, with the reason.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// The layer whose `section` is in effect, or `None` when defaults apply.
    pub fn origin_of(&self, section: &str) -> Option<&ConfigLayer> {
        self.layers
            .iter()
            .rev()
            .find(|layer| layer.sections.contains(&section))
    }
}

/// Load configuration from `source`. The merged result is validated.
pub fn load(source: &ConfigSource) -> Result<LoadedConfig> {
    let mut config = ScriptorConfig::new();
    let mut layers = Vec::new();
    let mut warnings = Vec::new();

    match source {
        ConfigSource::File(path) => {
            let layer = load_config_file(path)?;
            layers.push(ConfigLayer {
                kind: LayerKind::Explicit,
                path: path.clone(),
                sections: sections_of(&layer),
                loaded: true,
            });
            config = layer;
        }
        ConfigSource::Discover {
            project_dir,
            user_dir,
        } => {
            let user_dir = user_dir.clone().or_else(user_config_dir);
            if let Some(dir) = user_dir {
                let path = dir.join(USER_FILE);
                layers.push(read_layer(&mut config, LayerKind::User, path, &mut warnings));
            }
            let path = match project_dir {
                Some(dir) => dir.join(PROJECT_FILE),
                None => PathBuf::from(PROJECT_FILE),
            };
            layers.push(read_layer(&mut config, LayerKind::Project, path, &mut warnings));
        }
    }

    config.validate()?;
    Ok(LoadedConfig {
        config,
        layers,
        warnings,
    })
}

/// Discover the user and project layers from the current directory.
pub fn load_config() -> Result<LoadedConfig> {
    load(&ConfigSource::discover())
}

/// Parse and validate one file.
pub fn load_config_file(path: &Path) -> Result<ScriptorConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    ScriptorConfig::from_toml(&contents)
}

/// Directory holding the user layer and the log files.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join("scriptor")),
    }
}

fn read_layer(
    config: &mut ScriptorConfig,
    kind: LayerKind,
    path: PathBuf,
    warnings: &mut Vec<String>,
) -> ConfigLayer {
    let mut layer = ConfigLayer {
        kind,
        path,
        sections: Vec::new(),
        loaded: false,
    };
    if !layer.path.is_file() {
        return layer;
    }
    match load_config_file(&layer.path) {
        Ok(parsed) => {
            layer.sections = sections_of(&parsed);
            layer.loaded = true;
            config.merge(parsed);
        }
        Err(e) => warnings.push(format!("{}: {e}", layer.path.display())),
    }
    layer
}

fn sections_of(config: &ScriptorConfig) -> Vec<&'static str> {
    [
        ("runtime", config.runtime.is_some()),
        ("engines", config.engines.is_some()),
        ("command", config.command.is_some()),
        ("storage", config.storage.is_some()),
        ("scheduler", config.scheduler.is_some()),
        ("jobs", !config.jobs.is_empty()),
    ]
    .into_iter()
    .filter_map(|(name, present)| present.then_some(name))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[command]\nwait_time_ms = 50\n").unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.command().wait_time_ms, 50);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config_file(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_project_layer_overrides_user_layer() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(
            user.path().join("config.toml"),
            "[engines]\nenabled = [\"js\"]\n[scheduler]\nmetrics_interval_secs = 7\n",
        )
        .unwrap();
        fs::write(
            project.path().join("scriptor.toml"),
            "[engines]\nenabled = [\"command\"]\n",
        )
        .unwrap();

        let source = ConfigSource::discover()
            .in_project(project.path())
            .with_user_dir(user.path());
        let loaded = load(&source).unwrap();
        assert_eq!(loaded.config.engines().enabled, vec!["command"]);
        assert_eq!(loaded.config.scheduler().metrics_interval_secs, 7);
        assert!(loaded.warnings.is_empty());

        let engines = loaded.origin_of("engines").unwrap();
        assert_eq!(engines.kind, LayerKind::Project);
        assert_eq!(loaded.origin_of("scheduler").unwrap().kind, LayerKind::User);
        assert!(loaded.origin_of("storage").is_none());
    }

    #[test]
    fn test_broken_discovered_layer_becomes_warning() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(user.path().join("config.toml"), "not = [valid").unwrap();

        let source = ConfigSource::discover()
            .in_project(project.path())
            .with_user_dir(user.path());
        let loaded = load(&source).unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.layers.iter().all(|layer| !layer.loaded));
    }

    #[test]
    fn test_explicit_file_skips_discovery() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("only.toml");
        fs::write(&path, "[command]\nloop_count = 3\n").unwrap();

        let source = ConfigSource::file(&path).with_user_dir(dir.path());
        let loaded = load(&source).unwrap();
        assert_eq!(loaded.config.command().loop_count, 3);
        assert_eq!(loaded.layers.len(), 1);
        assert_eq!(loaded.layers[0].kind, LayerKind::Explicit);
        assert_eq!(loaded.layers[0].sections, vec!["command"]);
    }

    #[test]
    fn test_broken_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("only.toml");
        fs::write(&path, "[command]\nloop_count = 0\n").unwrap();
        assert!(matches!(
            load(&ConfigSource::file(&path)),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            load(&ConfigSource::file(dir.path().join("missing.toml"))),
            Err(ConfigError::ReadFile { .. })
        ));
    }

    #[test]
    fn test_user_config_dir_env_override() {
        let dir = TempDir::new().unwrap();
        unsafe { std::env::set_var("SCRIPTOR_CONFIG_DIR", dir.path()) };
        assert_eq!(user_config_dir().as_deref(), Some(dir.path()));
        unsafe { std::env::remove_var("SCRIPTOR_CONFIG_DIR") };
    }
}
