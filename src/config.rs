//! Persistent configuration model, defaults, and load path.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::sync::SkipPolicy;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Managed library server connection.
    pub plex: PlexConfig,
    #[serde(default)]
    /// Ground-truth library location.
    pub source: SourceConfig,
    #[serde(default)]
    /// Workflow behavior.
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlexConfig {
    #[serde(default = "default_plex_url")]
    pub url: String,
    #[serde(default = "default_section_id")]
    pub section_id: u32,
    /// Prefer the OS keyring (`set-token`) over storing the token here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Where the source library is read from. An XML export wins over a database.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub skip_policy: SkipPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_log_path: Option<PathBuf>,
    /// Artists with more tracks than this are listed by album when prompting.
    #[serde(default = "default_interactive_threshold")]
    pub interactive_threshold: usize,
    #[serde(default = "default_missing_preview_limit")]
    pub missing_preview_limit: usize,
}

fn default_plex_url() -> String {
    "http://localhost:32400".to_string()
}

fn default_section_id() -> u32 {
    1
}

fn default_interactive_threshold() -> usize {
    10
}

fn default_missing_preview_limit() -> usize {
    10
}

impl Default for PlexConfig {
    fn default() -> Self {
        Self {
            url: default_plex_url(),
            section_id: default_section_id(),
            token: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            skip_policy: SkipPolicy::default(),
            change_log_path: None,
            interactive_threshold: default_interactive_threshold(),
            missing_preview_limit: default_missing_preview_limit(),
        }
    }
}

/// Selected source library after config, environment, and fallbacks are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelection {
    Xml(PathBuf),
    Database(PathBuf),
}

impl Config {
    pub fn source_selection(&self, working_dir: &Path) -> Option<SourceSelection> {
        if let Some(path) = &self.source.xml_path {
            return Some(SourceSelection::Xml(path.clone()));
        }
        if let Some(path) = &self.source.library_path {
            return Some(SourceSelection::Database(path.clone()));
        }
        find_xml_export(working_dir).map(SourceSelection::Xml)
    }

    pub fn change_log_path(&self) -> PathBuf {
        self.sync
            .change_log_path
            .clone()
            .unwrap_or_else(default_change_log_path)
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunesync")
        .join("config.toml")
}

fn default_change_log_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunesync")
        .join("change_log.db")
}

/// Lexically first `*.xml` file directly inside `dir`.
fn find_xml_export(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        })
        .collect();
    candidates.sort_unstable();
    candidates.into_iter().next()
}

/// Applies environment overrides on top of file values.
pub fn apply_env_overrides<F>(mut config: Config, lookup: F) -> Result<Config, String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("PLEX_URL") {
        config.plex.url = url;
    }
    if let Some(token) = lookup("PLEX_TOKEN") {
        config.plex.token = Some(token);
    }
    if let Some(section) = lookup("PLEX_MUSIC_SECTION") {
        config.plex.section_id = section
            .trim()
            .parse()
            .map_err(|_| format!("PLEX_MUSIC_SECTION must be a number, got '{section}'"))?;
    }
    if let Some(path) = lookup("SOURCE_LIBRARY_XML") {
        config.source.xml_path = Some(PathBuf::from(path));
    }
    if let Some(path) = lookup("SOURCE_LIBRARY_PATH") {
        config.source.library_path = Some(PathBuf::from(path));
    }
    Ok(config)
}

pub fn sanitize_config(config: Config) -> Config {
    let url = config.plex.url.trim().trim_end_matches('/').to_string();
    let token = config
        .plex
        .token
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    Config {
        plex: PlexConfig {
            url,
            token,
            ..config.plex
        },
        sync: SyncConfig {
            interactive_threshold: config.sync.interactive_threshold.max(1),
            missing_preview_limit: config.sync.missing_preview_limit.max(1),
            ..config.sync
        },
        ..config
    }
}

/// Reads `path`, creating it with defaults first when it does not exist.
pub fn load_or_create(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                format!("Failed to create config directory {}: {err}", parent.display())
            })?;
        }
        let default_text = toml::to_string(&Config::default())
            .map_err(|err| format!("Failed to serialize default config: {err}"))?;
        if let Err(err) = std::fs::write(path, default_text) {
            warn!("Failed to write default config to {}: {}", path.display(), err);
            return Ok(Config::default());
        }
    }

    let config_content = std::fs::read_to_string(path)
        .map_err(|err| format!("Failed to read config {}: {err}", path.display()))?;
    toml::from_str::<Config>(&config_content)
        .map_err(|err| format!("Invalid config {}: {err}", path.display()))
}
