//! Model catalog
//!
//! Scans a models directory for GGUF artifacts, resolves per-file metadata
//! through the persistent cache, assigns stable 1-based indices and tracks
//! which model was last active.

pub mod metadata;

use crate::storage::{get_data_dir, StorageError};
use crate::types::model::ModelDescriptor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Recognized model artifact extension
const MODEL_EXTENSION: &str = "gguf";

/// Catalog file locations and scan defaults
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Root directory searched recursively for model files
    pub models_dir: PathBuf,
    /// Metadata cache file
    pub cache_path: PathBuf,
    /// Last-active-model pointer file
    pub last_model_path: PathBuf,
    /// Context length assumed when a model declares none
    pub default_context_length: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let base = get_data_dir().unwrap_or_else(|e| {
            tracing::warn!("Falling back to relative paths: {}", e);
            PathBuf::from(".")
        });
        Self {
            models_dir: base.join("models"),
            cache_path: base.join("model_cache.json"),
            last_model_path: base.join("last_model.json"),
            default_context_length: 4096,
        }
    }
}

/// Persisted pointer to the most recently loaded model
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LastModelRecord {
    model_index: usize,
    model_path: String,
}

/// Scans and indexes model artifacts on disk
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    config: CatalogConfig,
}

impl ModelCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Scan the models directory and return descriptors in path order.
    ///
    /// Metadata comes from the cache where the file fingerprint still
    /// matches, else from the file header, else from filename parsing.
    /// The cache is read once up front and written once at the end. An
    /// absent directory yields an empty list, not an error.
    pub fn scan(&self) -> Vec<ModelDescriptor> {
        let files = self.list_model_files();
        let mut cache = metadata::read_cache(&self.config.cache_path);
        let mut models = Vec::with_capacity(files.len());

        for (i, path) in files.iter().enumerate() {
            let meta = metadata::get_or_parse(path, &mut cache);
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();

            let (fallback_quant, fallback_arch) = parse_filename(&name);
            let quantization = meta.quantization.or(fallback_quant);
            let architecture = meta.architecture.or(fallback_arch);
            let context_length = meta
                .context_length
                .or(Some(self.config.default_context_length));

            models.push(ModelDescriptor {
                index: i + 1,
                name,
                path: path.clone(),
                context_length,
                quantization,
                architecture,
            });
        }

        metadata::write_cache(&self.config.cache_path, &cache);
        tracing::info!(
            "Catalog scan found {} model(s) under {:?}",
            models.len(),
            self.config.models_dir
        );
        models
    }

    /// Recursively list model files under the root, sorted by path for
    /// deterministic indexing
    fn list_model_files(&self) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/**/*.{}",
            self.config.models_dir.display(),
            MODEL_EXTENSION
        );
        let mut files: Vec<PathBuf> = match glob::glob(&pattern) {
            Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
            Err(e) => {
                tracing::warn!("Invalid models directory pattern: {}", e);
                Vec::new()
            }
        };
        files.sort();
        files
    }

    /// Persist the pointer to the model that was just loaded
    pub fn save_last_model(&self, model: &ModelDescriptor) -> Result<(), StorageError> {
        let record = LastModelRecord {
            model_index: model.index,
            model_path: model.path.display().to_string(),
        };
        if let Some(parent) = self.config.last_model_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&record)?;
        fs::write(&self.config.last_model_path, json)?;
        tracing::debug!("Saved last model pointer: {}", record.model_path);
        Ok(())
    }

    /// Resolve the persisted pointer against a fresh scan.
    ///
    /// Matches by path equality; a pointer at a path that no longer shows
    /// up in the scan (file moved or deleted) resolves to `None`.
    pub fn load_last_model(&self, models: &[ModelDescriptor]) -> Option<ModelDescriptor> {
        if !self.config.last_model_path.exists() {
            return None;
        }
        let json = match fs::read_to_string(&self.config.last_model_path) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to read last model pointer: {}", e);
                return None;
            }
        };
        let record: LastModelRecord = match serde_json::from_str(&json) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Last model pointer is corrupt: {}", e);
                return None;
            }
        };
        models
            .iter()
            .find(|m| m.path.display().to_string() == record.model_path)
            .cloned()
    }
}

/// Parse quantization and architecture out of a filename stem as a
/// fallback when no header metadata is available.
///
/// Follows the `name-architecture.quantization` convention: the substring
/// after the last `.` is the quantization, the substring between the last
/// `-` and that point is the architecture. Best effort only; filenames
/// that deviate from the convention can misattribute fields.
pub fn parse_filename(name: &str) -> (Option<String>, Option<String>) {
    let (prefix, quantization) = match name.rsplit_once('.') {
        Some((prefix, quant)) => (prefix, Some(quant.to_string())),
        None => (name, None),
    };
    let architecture = prefix
        .rsplit_once('-')
        .map(|(_, arch)| arch.to_string());
    (quantization, architecture)
}

/// Look up a descriptor by its 1-based index
pub fn get_by_index(index: usize, models: &[ModelDescriptor]) -> Option<&ModelDescriptor> {
    models.iter().find(|m| m.index == index)
}
