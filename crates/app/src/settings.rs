use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use auralis_dispatch::{DEFAULT_THRESHOLD_WORDS, GateConfig};
use auralis_llm::{DEFAULT_GEMINI_MODEL, GEMINI_PROVIDER_ID, ProviderConfig};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "auralis";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "AURALIS_";
/// Conventional variable holding the generative-language API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const DEFAULT_CHUNK_URL: &str = "http://127.0.0.1:8000/chunk";
pub const DEFAULT_RAG_URL: &str = "http://127.0.0.1:8001";
pub const DEFAULT_SPLIT_URL: &str = "http://127.0.0.1:8002";
pub const DEFAULT_WIDGET_QUIET_MS: u64 = 3_000;
pub const DEFAULT_FULL_SCREEN_QUIET_MS: u64 = 5_000;

/// Which teaching surface a dispatcher is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSurface {
    /// Floating input widget.
    Widget,
    FullScreen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's base URL when non-empty.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_chunk_url")]
    pub chunk_url: String,
    #[serde(default = "default_rag_url")]
    pub rag_url: String,
    #[serde(default = "default_split_url")]
    pub split_url: String,
    #[serde(default = "default_threshold_words")]
    pub threshold_words: usize,
    #[serde(default = "default_widget_quiet_ms")]
    pub widget_quiet_ms: u64,
    #[serde(default = "default_full_screen_quiet_ms")]
    pub full_screen_quiet_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: String::new(),
            model: default_model(),
            chunk_url: default_chunk_url(),
            rag_url: default_rag_url(),
            split_url: default_split_url(),
            threshold_words: default_threshold_words(),
            widget_quiet_ms: default_widget_quiet_ms(),
            full_screen_quiet_ms: default_full_screen_quiet_ms(),
        }
    }
}

impl Settings {
    pub fn to_provider_config(&self) -> Option<ProviderConfig> {
        if self.api_key.trim().is_empty() {
            return None;
        }

        Some(ProviderConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
        ))
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn gate_config(&self, surface: InputSurface) -> GateConfig {
        let quiet_ms = match surface {
            InputSurface::Widget => self.widget_quiet_ms,
            InputSurface::FullScreen => self.full_screen_quiet_ms,
        };
        GateConfig::new(self.threshold_words, Duration::from_millis(quiet_ms))
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = non_blank_or(self.provider_id, default_provider_id);
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = self.endpoint.trim().to_string();
        self.model = non_blank_or(self.model, default_model);
        self.chunk_url = non_blank_or(self.chunk_url, default_chunk_url);
        self.rag_url = non_blank_or(self.rag_url, default_rag_url);
        self.split_url = non_blank_or(self.split_url, default_split_url);
        if self.threshold_words == 0 {
            self.threshold_words = default_threshold_words();
        }
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
    // Whether environment overrides are layered over the file.
    layered_env: bool,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".auralis"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Loads `config_path` layered over defaults, with environment overrides on top.
    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_layers(Self::env_figment(&config_path), &config_path);
        Self::with_settings(settings, config_path, true)
    }

    /// Loads `config_path` layered over defaults, ignoring the environment.
    pub fn from_file(config_path: PathBuf) -> Self {
        let settings = Self::load_layers(Self::file_figment(&config_path), &config_path);
        Self::with_settings(settings, config_path, false)
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    /// Applies `edit` to the settings saved on disk and persists the result.
    ///
    /// Environment overrides are never written to the file; they are layered back
    /// over the saved settings for the in-memory value.
    pub fn update(&self, edit: impl FnOnce(Settings) -> Settings) -> Result<(), SettingsError> {
        let saved = Self::load_layers(Self::file_figment(&self.config_path), &self.config_path);
        let normalized_settings = edit(saved).normalized();
        self.persist(&normalized_settings)?;

        let effective = if self.layered_env {
            Self::load_layers(Self::env_figment(&self.config_path), &self.config_path)
        } else {
            normalized_settings
        };
        self.settings.store(Arc::new(effective));
        Ok(())
    }

    fn with_settings(settings: Settings, config_path: PathBuf, layered_env: bool) -> Self {
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
            layered_env,
        }
    }

    fn file_figment(path: &Path) -> Figment {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }
        Figment::from(Serialized::defaults(Settings::default())).merge(Json::file(path))
    }

    fn env_figment(path: &Path) -> Figment {
        Self::file_figment(path)
            .merge(Env::raw().only(&[GEMINI_API_KEY_ENV]).map(|_| "api_key".into()))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    fn load_layers(figment: Figment, path: &Path) -> Settings {
        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn non_blank_or(value: String, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn default_provider_id() -> String {
    GEMINI_PROVIDER_ID.to_string()
}

fn default_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_chunk_url() -> String {
    DEFAULT_CHUNK_URL.to_string()
}

fn default_rag_url() -> String {
    DEFAULT_RAG_URL.to_string()
}

fn default_split_url() -> String {
    DEFAULT_SPLIT_URL.to_string()
}

fn default_threshold_words() -> usize {
    DEFAULT_THRESHOLD_WORDS
}

fn default_widget_quiet_ms() -> u64 {
    DEFAULT_WIDGET_QUIET_MS
}

fn default_full_screen_quiet_ms() -> u64 {
    DEFAULT_FULL_SCREEN_QUIET_MS
}
