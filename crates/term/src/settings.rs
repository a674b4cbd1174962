use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use persona_chat::{
    DEFAULT_PRESET_INDEX, PERSONALITY_PRESETS, Personality, SessionOptions, preset,
};
use persona_llm::{DEFAULT_OPENAI_MODEL, ProviderConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const SETTINGS_DIRECTORY_NAME: &str = "persona-chat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub stream_idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub preset_index: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model_name: default_model_name(),
            temperature: None,
            max_tokens: None,
            stream_idle_timeout_secs: None,
            preset_index: DEFAULT_PRESET_INDEX,
        }
    }
}

impl ChatSettings {
    /// Builds the provider config, falling back to `env_api_key` when the
    /// file has no key. Returns `None` when no key is available at all.
    pub fn to_provider_config(&self, env_api_key: Option<String>) -> Option<ProviderConfig> {
        let api_key = if self.api_key.trim().is_empty() {
            env_api_key.filter(|key| !key.trim().is_empty())?
        } else {
            self.api_key.clone()
        };

        Some(ProviderConfig::new(&self.provider_id, api_key, &self.endpoint))
    }

    pub fn session_options(&self) -> SessionOptions {
        let mut options = SessionOptions::new(self.model_name.clone());
        if let Some(temperature) = self.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        if let Some(seconds) = self.stream_idle_timeout_secs.filter(|seconds| *seconds > 0) {
            options = options.with_stream_idle_timeout(Duration::from_secs(seconds));
        }
        options
    }

    pub fn personality(&self) -> Personality {
        let preset =
            preset(self.preset_index).unwrap_or(&PERSONALITY_PRESETS[DEFAULT_PRESET_INDEX]);
        Personality::from(preset)
    }

    /// Trims string fields, restores defaults for blanks and clamps the preset.
    pub fn normalized(mut self) -> Self {
        self.provider_id = trimmed_or(&self.provider_id, DEFAULT_PROVIDER_ID);
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = trimmed_or(&self.endpoint, DEFAULT_ENDPOINT);
        self.model_name = trimmed_or(&self.model_name, DEFAULT_OPENAI_MODEL);
        if preset(self.preset_index).is_none() {
            self.preset_index = DEFAULT_PRESET_INDEX;
        }
        self
    }
}

/// Live settings plus the JSON file they round-trip through.
pub struct SettingsStore {
    current: ArcSwap<ChatSettings>,
    path: PathBuf,
}

impl SettingsStore {
    /// `<config dir>/persona-chat/settings.json`, or a local fallback.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".persona-chat"))
            .join(SETTINGS_FILE_NAME)
    }

    /// Loads `path`, layering the file over the built-in defaults.
    ///
    /// A missing or unreadable file yields defaults.
    pub fn open(path: PathBuf) -> Self {
        let figment =
            Figment::from(Serialized::defaults(ChatSettings::default())).merge(Json::file(&path));
        let settings = match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "ignoring unreadable settings file");
                ChatSettings::default()
            }
        };

        Self {
            current: ArcSwap::from_pointee(settings),
            path,
        }
    }

    pub fn load() -> Self {
        Self::open(Self::default_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.current.load_full()
    }

    /// Remembers the chosen persona for the next launch.
    pub fn remember_preset(&self, preset_index: usize) -> Result<(), SettingsError> {
        let current = self.settings();
        if current.preset_index == preset_index {
            return Ok(());
        }

        let next = ChatSettings {
            preset_index,
            ..(*current).clone()
        }
        .normalized();
        self.save(&next)?;
        self.current.store(Arc::new(next));
        Ok(())
    }

    /// Writes a sibling temp file, then renames it over the settings file.
    fn save(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).context(IoSnafu {
                stage: "create-settings-dir",
                path: dir.to_path_buf(),
            })?;
        }

        let json = serde_json::to_string_pretty(settings).context(EncodeSnafu {
            stage: "encode-settings",
        })?;
        let staged = self.path.with_extension("json.tmp");
        std::fs::write(&staged, json).context(IoSnafu {
            stage: "write-staged-settings",
            path: staged.clone(),
        })?;
        std::fs::rename(&staged, &self.path).context(IoSnafu {
            stage: "replace-settings",
            path: self.path.clone(),
        })?;

        tracing::debug!(path = ?self.path, preset_index = settings.preset_index, "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("settings io failed for {path:?} on `{stage}`: {source}"))]
    Io {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to encode settings on `{stage}`: {source}"))]
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
}

fn trimmed_or(value: &str, fallback: &str) -> String {
    match value.trim() {
        "" => fallback.to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model_name() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}
