//! Settings storage
//!
//! Manages persistence of the model configuration surface: model path,
//! GPU layers, context size, chat format and sampling parameters.

use crate::storage::StorageError;
use crate::types::config::ChatFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Runtime settings file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Model loading and inference configuration
    #[serde(default)]
    pub model: ModelSettings,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Path to the GGUF file to load at startup
    pub path: Option<PathBuf>,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// Context window size in tokens
    pub context: u32,
    /// Chat template convention
    pub chat_format: ChatFormat,
    /// Temperature for text generation (0.0 - 1.0)
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    pub top_p: f32,
    /// Top-k sampling parameter
    pub top_k: u32,
    /// Repetition penalty (>= 1.0)
    pub repeat_penalty: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: None,
            gpu_layers: 50,
            context: 4096,
            chat_format: ChatFormat::default(),
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
        }
    }
}

impl Settings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges.
    pub fn validate(&mut self) {
        let model = &mut self.model;

        model.temperature = model.temperature.clamp(0.0, 1.0);
        model.top_p = model.top_p.clamp(0.0, 1.0);

        if model.context < 512 {
            tracing::warn!("Context size {} below minimum, using 4096", model.context);
            model.context = 4096;
        }

        if model.repeat_penalty < 1.0 {
            tracing::warn!(
                "Repeat penalty {} below 1.0, using 1.1",
                model.repeat_penalty
            );
            model.repeat_penalty = 1.1;
        }
    }

    /// Load settings from disk, propagating malformed-file errors
    pub fn load(path: &Path) -> Result<Settings, StorageError> {
        let json = fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&json)?;
        settings.validate();
        tracing::debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Load settings, falling back to defaults if the file is missing
    /// or corrupted
    pub fn load_or_default(path: &Path) -> Settings {
        if !path.exists() {
            tracing::info!("Settings file not found, using defaults");
            return Settings::default();
        }
        match Settings::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Failed to load settings, using defaults: {}", e);
                Settings::default()
            }
        }
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        tracing::debug!("Saved settings to {:?}", path);
        Ok(())
    }
}

/// Read-modify-write of the settings file's `model.gpu_layers` field.
///
/// The rest of the file is preserved; a missing file starts from defaults.
pub fn update_gpu_layers(path: &Path, gpu_layers: u32) -> Result<(), StorageError> {
    let mut settings = Settings::load_or_default(path);
    settings.model.gpu_layers = gpu_layers;
    settings.save(path)?;
    tracing::info!("Saved GPU settings: gpu_layers={}", gpu_layers);
    Ok(())
}

/// Read the persisted GPU-layer preference
pub fn read_gpu_layers(path: &Path) -> Result<u32, StorageError> {
    let settings = Settings::load(path)?;
    Ok(settings.model.gpu_layers)
}
