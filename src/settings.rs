use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::MacroGoals;
use crate::render::RenderOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

// Theme preference as stored; "system" is resolved by whoever hosts the notes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

impl ThemeMode {
    pub fn resolve(&self, system_is_dark: bool) -> Theme {
        match self {
            ThemeMode::Light => Theme::Light,
            ThemeMode::Dark => Theme::Dark,
            ThemeMode::System if system_is_dark => Theme::Dark,
            ThemeMode::System => Theme::Light,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmojiSet {
    pub food: String,
    pub calories: String,
    pub protein: String,
    pub carbs: String,
    pub fat: String,
}

impl Default for EmojiSet {
    fn default() -> Self {
        Self {
            food: "🍽️".to_string(),
            calories: "🔥".to_string(),
            protein: "🥩".to_string(),
            carbs: "🍞".to_string(),
            fat: "🥑".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }
}

// App settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub food_log_folder: String,
    pub meals_folder: String,
    pub meals_file: String,
    pub goals: MacroGoals,
    pub emojis: EmojiSet,
    pub theme: ThemeMode,
    pub api: ApiSettings,
    /// Quiet period after the last edit before a meal note is read back
    pub quiescence_ms: u64,
    /// Delay before re-reading a meal note this app just wrote
    pub self_check_ms: u64,
    /// How long the delete lock stays held after a delete finishes
    pub delete_release_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            food_log_folder: "Nutrition/Food Log".to_string(),
            meals_folder: "Nutrition/Meals".to_string(),
            meals_file: "Nutrition/meals.json".to_string(),
            goals: MacroGoals::default(),
            emojis: EmojiSet::default(),
            theme: ThemeMode::default(),
            api: ApiSettings::default(),
            quiescence_ms: 2000,
            self_check_ms: 500,
            delete_release_ms: 300,
        }
    }
}

impl Settings {
    pub fn render_options(&self, system_is_dark: bool) -> RenderOptions {
        RenderOptions {
            theme: self.theme.resolve(system_is_dark),
            goals: self.goals,
            emojis: self.emojis.clone(),
        }
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }

    pub fn self_check_delay(&self) -> Duration {
        Duration::from_millis(self.self_check_ms)
    }

    pub fn delete_release_delay(&self) -> Duration {
        Duration::from_millis(self.delete_release_ms)
    }

    /// Apply `NUTRILOG_*` environment overrides for the estimator.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("NUTRILOG_API_KEY") {
            if !key.trim().is_empty() {
                self.api.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("NUTRILOG_API_BASE_URL") {
            self.api.base_url = url;
        }
        if let Ok(model) = std::env::var("NUTRILOG_MODEL") {
            self.api.model = model;
        }
        self
    }
}

/// Settings shared between components, plus the host's current light/dark signal.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
    system_dark: Arc<AtomicBool>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
            system_dark: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.inner.read().expect("settings read lock").clone()
    }

    pub fn replace(&self, settings: Settings) {
        *self.inner.write().expect("settings write lock") = settings;
    }

    pub fn set_system_dark(&self, dark: bool) {
        self.system_dark.store(dark, Ordering::Relaxed);
    }

    pub fn render_options(&self) -> RenderOptions {
        let dark = self.system_dark.load(Ordering::Relaxed);
        self.inner
            .read()
            .expect("settings read lock")
            .render_options(dark)
    }
}

// Settings file path inside a vault
pub fn settings_path(vault_root: &Path) -> PathBuf {
    vault_root.join(".nutrilog").join("settings.json")
}

// Load settings from disk, falling back to defaults
pub fn load_settings(vault_root: &Path) -> Settings {
    let path = settings_path(vault_root);
    if path.exists() {
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    } else {
        Settings::default()
    }
}

// Save settings to disk
pub fn save_settings(vault_root: &Path, settings: &Settings) -> Result<()> {
    let path = settings_path(vault_root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::storage(parent, e))?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(&path, content).map_err(|e| Error::storage(&path, e))?;
    Ok(())
}
