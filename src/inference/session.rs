//! Model session
//!
//! Owns at most one loaded inference engine, handles load/unload and swap,
//! reconciles requested vs. actual hardware mode, and wraps generation with
//! response memoization and rolling performance metrics.
//!
//! The session is single-consumer by design: engine calls block the caller,
//! and neither the response cache nor the hardware status is synchronized.

use crate::inference::cache::ResponseCache;
use crate::inference::engine::{
    ChatEngine, CompletionRequest, EngineLoader, EngineParams,
};
use crate::inference::streaming::ChatStream;
use crate::storage::settings::{self, Settings};
use crate::storage::StorageError;
use crate::system::gpu;
use crate::types::config::{ChatFormat, SamplingParams};
use crate::types::hardware::{HardwareInfo, HardwareMode, HardwareStatus, PerformanceMetrics};
use crate::types::message::Message;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;

const DEFAULT_GPU_LAYERS: u32 = 50;
const DEFAULT_CONTEXT_SIZE: u32 = 4096;
const MIN_CONTEXT_SIZE: u32 = 512;
const RESPONSE_CACHE_CAPACITY: usize = 100;

/// Generation-time failures surfaced to the caller
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no model loaded")]
    NoModelLoaded,
    #[error("empty message sequence")]
    EmptyPrompt,
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error(transparent)]
    Engine(#[from] crate::inference::engine::EngineError),
}

/// Session around one loaded engine at a time
pub struct ModelSession {
    loader: Box<dyn EngineLoader>,
    engine: Option<Box<dyn ChatEngine>>,
    model_path: Option<PathBuf>,
    sampling: SamplingParams,
    hardware: HardwareStatus,
    metrics: Rc<RefCell<PerformanceMetrics>>,
    cache: ResponseCache,
}

impl ModelSession {
    /// Create a session, probing the host for acceleration capability
    pub fn new(loader: Box<dyn EngineLoader>) -> Self {
        Self::with_sampling(loader, SamplingParams::default())
    }

    pub fn with_sampling(loader: Box<dyn EngineLoader>, sampling: SamplingParams) -> Self {
        let available = gpu::detect_acceleration();
        Self::with_acceleration(loader, sampling, available)
    }

    /// Create a session with an explicit probe result, for embedders that
    /// probe the hardware themselves
    pub fn with_acceleration(
        loader: Box<dyn EngineLoader>,
        sampling: SamplingParams,
        acceleration_available: bool,
    ) -> Self {
        Self {
            loader,
            engine: None,
            model_path: None,
            sampling,
            hardware: HardwareStatus {
                acceleration_available,
                ..HardwareStatus::default()
            },
            metrics: Rc::new(RefCell::new(PerformanceMetrics::default())),
            cache: ResponseCache::new(RESPONSE_CACHE_CAPACITY),
        }
    }

    /// Load a model, replacing any currently loaded engine.
    ///
    /// Out-of-range parameters are clamped to safe defaults rather than
    /// rejected. Returns `false` on any failure; a failed swap leaves the
    /// session unloaded so no partially-initialized engine is ever
    /// exposed. A missing file fails before the old engine is touched.
    pub fn load(
        &mut self,
        path: impl AsRef<Path>,
        gpu_layers: i64,
        context_size: u32,
        chat_format: &str,
    ) -> bool {
        let path = path.as_ref();
        if !path.exists() {
            tracing::error!("Model file not found: {:?}", path);
            return false;
        }

        let gpu_layers = if gpu_layers < 0 {
            tracing::warn!(
                "Invalid GPU layer count {}, using {}",
                gpu_layers,
                DEFAULT_GPU_LAYERS
            );
            DEFAULT_GPU_LAYERS
        } else {
            gpu_layers as u32
        };

        let context_size = if context_size < MIN_CONTEXT_SIZE {
            tracing::warn!(
                "Context size {} below minimum, using {}",
                context_size,
                DEFAULT_CONTEXT_SIZE
            );
            DEFAULT_CONTEXT_SIZE
        } else {
            context_size
        };

        let chat_format: ChatFormat = chat_format.parse().unwrap_or_else(|_| {
            tracing::warn!("Unknown chat format '{}', using chatml", chat_format);
            ChatFormat::ChatMl
        });

        gpu::ensure_acceleration_env(self.hardware.acceleration_available);

        // Drop the old engine before constructing the new one; two native
        // engines must never be live at the same time.
        self.engine = None;
        self.model_path = None;

        let params = EngineParams {
            path: path.to_path_buf(),
            gpu_layers,
            context_size,
            chat_format,
        };
        match self.loader.load(&params) {
            Ok(engine) => {
                self.engine = Some(engine);
                self.model_path = Some(path.to_path_buf());
                self.detect_hardware_mode(gpu_layers);
                tracing::info!(
                    "Model loaded: {:?} in {} mode",
                    path,
                    self.hardware.mode
                );
                if self.hardware.mode == HardwareMode::Gpu {
                    tracing::info!("GPU layers: {}", self.hardware.gpu_layers);
                }
                true
            }
            Err(e) => {
                self.hardware.mode = HardwareMode::Unknown;
                self.hardware.gpu_layers = 0;
                tracing::error!("Failed to load {:?}: {}", path, e);
                false
            }
        }
    }

    /// Apply the configuration surface and load the configured model
    pub fn load_from_settings(&mut self, config: &Settings) -> bool {
        let model = &config.model;
        self.sampling = SamplingParams {
            temperature: model.temperature,
            top_p: model.top_p,
            top_k: model.top_k,
            repeat_penalty: model.repeat_penalty,
        };
        let Some(path) = &model.path else {
            tracing::warn!("No model path configured, nothing to load");
            return false;
        };
        self.load(
            path,
            i64::from(model.gpu_layers),
            model.context,
            &model.chat_format.to_string(),
        )
    }

    /// Drop the loaded engine and reset the hardware mode
    pub fn unload(&mut self) {
        if self.engine.take().is_some() {
            tracing::info!("Engine unloaded");
        }
        self.model_path = None;
        self.hardware.mode = HardwareMode::Unknown;
        self.hardware.gpu_layers = 0;
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.is_some()
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    pub fn set_temperature(&mut self, temperature: f32) {
        let clamped = temperature.clamp(0.0, 1.0);
        if clamped != temperature {
            tracing::warn!(
                "Temperature {} out of range, using {}",
                temperature,
                clamped
            );
        }
        self.sampling.temperature = clamped;
    }

    /// Reconcile requested vs. actual execution mode after a load.
    ///
    /// Prefers the engine's own introspection; when unavailable, infers
    /// GPU mode from probe availability plus a positive requested count.
    fn detect_hardware_mode(&mut self, requested_gpu_layers: u32) {
        let introspected = self.engine.as_ref().and_then(|e| e.active_gpu_layers());
        let (gpu_mode, actual_layers) = match introspected {
            Some(layers) => {
                tracing::debug!("Engine reports {} active GPU layer(s)", layers);
                (layers > 0, layers)
            }
            None if self.hardware.acceleration_available && requested_gpu_layers > 0 => {
                tracing::debug!(
                    "No engine introspection, assuming GPU mode with {} layer(s)",
                    requested_gpu_layers
                );
                (true, requested_gpu_layers)
            }
            None => (false, 0),
        };

        self.hardware.mode = if gpu_mode {
            HardwareMode::Gpu
        } else {
            HardwareMode::Cpu
        };
        self.hardware.gpu_layers = if gpu_mode { actual_layers } else { 0 };
        self.hardware.last_checked = Some(Utc::now());

        if requested_gpu_layers > 0 && !gpu_mode {
            tracing::warn!(
                "GPU acceleration requested ({} layers) but the model is running in CPU mode",
                requested_gpu_layers
            );
        } else if requested_gpu_layers == 0 && gpu_mode {
            tracing::warn!(
                "CPU mode requested but the model is running on GPU with {} layers",
                actual_layers
            );
        }
    }

    /// Generate a full response for an ordered, non-empty message sequence.
    ///
    /// Identical message sequences hit the response cache without invoking
    /// the engine.
    pub fn chat(&mut self, messages: &[Message]) -> Result<String, SessionError> {
        if messages.is_empty() {
            return Err(SessionError::EmptyPrompt);
        }
        if self.engine.is_none() {
            return Err(SessionError::NoModelLoaded);
        }

        let digest = message_digest(messages);
        if let Some(cached) = self.cache.get(&digest) {
            tracing::info!("Returning cached response");
            return Ok(cached.clone());
        }

        let request = self.completion_request(messages);
        let started = Instant::now();
        let engine = self.engine.as_mut().ok_or(SessionError::NoModelLoaded)?;
        let content = engine.complete(&request)?;
        let secs = started.elapsed().as_secs_f64();
        self.metrics.borrow_mut().record_inference(secs);
        tracing::info!("Inference finished in {:.2}s", secs);

        if content.trim().is_empty() {
            return Err(SessionError::EmptyResponse);
        }
        self.cache.insert(digest, content.clone());
        Ok(content)
    }

    /// Generate a response as a lazy fragment stream.
    ///
    /// The stream borrows the session until dropped or exhausted; the
    /// caller concatenates fragments and persists the result to
    /// conversation memory itself.
    pub fn chat_stream(&mut self, messages: &[Message]) -> Result<ChatStream<'_>, SessionError> {
        if messages.is_empty() {
            return Err(SessionError::EmptyPrompt);
        }
        let request = self.completion_request(messages);
        let metrics = Rc::clone(&self.metrics);
        let engine = self.engine.as_mut().ok_or(SessionError::NoModelLoaded)?;
        let inner = engine.complete_stream(&request)?;
        Ok(ChatStream::new(inner, metrics))
    }

    fn completion_request<'m>(&self, messages: &'m [Message]) -> CompletionRequest<'m> {
        let temperature = self.sampling.temperature.clamp(0.0, 1.0);
        if temperature != self.sampling.temperature {
            tracing::warn!(
                "Temperature {} out of range, using {}",
                self.sampling.temperature,
                temperature
            );
        }
        CompletionRequest {
            messages,
            temperature,
            top_p: self.sampling.top_p,
            top_k: self.sampling.top_k,
            repeat_penalty: self.sampling.repeat_penalty,
        }
    }

    pub fn hardware_status(&self) -> &HardwareStatus {
        &self.hardware
    }

    /// Snapshot of the hardware status plus performance metrics
    pub fn get_hardware_info(&self) -> HardwareInfo {
        HardwareInfo {
            mode: self.hardware.mode,
            gpu_layers: self.hardware.gpu_layers,
            acceleration_available: self.hardware.acceleration_available,
            last_checked: self.hardware.last_checked,
            performance_metrics: self.metrics.borrow().clone(),
        }
    }

    pub fn is_gpu_mode(&self) -> bool {
        self.hardware.mode == HardwareMode::Gpu
    }

    pub fn gpu_layers(&self) -> u32 {
        self.hardware.gpu_layers
    }

    /// Persist the effective GPU layer count into the settings file's
    /// `model.gpu_layers` field (read-modify-write)
    pub fn save_gpu_settings(&self, settings_path: &Path) -> Result<(), StorageError> {
        let layers = if self.hardware.mode == HardwareMode::Gpu {
            self.hardware.gpu_layers
        } else {
            0
        };
        settings::update_gpu_layers(settings_path, layers)
    }

    /// Read the persisted GPU layer preference
    pub fn load_gpu_settings(settings_path: &Path) -> Result<u32, StorageError> {
        settings::read_gpu_layers(settings_path)
    }
}

/// Stable content digest of a message sequence, used as the cache key
fn message_digest(messages: &[Message]) -> String {
    let mut hasher = Sha256::new();
    for message in messages {
        hasher.update(message.content.as_bytes());
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::engine::{EngineError, FragmentStream};
    use crate::types::message::Role;
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct MockEngine {
        reply: String,
        fragments: Vec<String>,
        reported_layers: Option<u32>,
        complete_calls: Rc<RefCell<usize>>,
        last_temperature: Rc<RefCell<Option<f32>>>,
    }

    impl ChatEngine for MockEngine {
        fn complete(&mut self, request: &CompletionRequest<'_>) -> Result<String, EngineError> {
            *self.complete_calls.borrow_mut() += 1;
            *self.last_temperature.borrow_mut() = Some(request.temperature);
            Ok(self.reply.clone())
        }

        fn complete_stream<'a>(
            &'a mut self,
            _request: &CompletionRequest<'_>,
        ) -> Result<FragmentStream<'a>, EngineError> {
            let parts: Vec<Result<String, EngineError>> =
                self.fragments.iter().cloned().map(Ok).collect();
            Ok(Box::new(parts.into_iter()))
        }

        fn active_gpu_layers(&self) -> Option<u32> {
            self.reported_layers
        }
    }

    struct MockLoader {
        reply: String,
        fragments: Vec<String>,
        reported_layers: Option<u32>,
        fail: Rc<RefCell<bool>>,
        load_calls: Rc<RefCell<usize>>,
        complete_calls: Rc<RefCell<usize>>,
        last_temperature: Rc<RefCell<Option<f32>>>,
        last_params: Rc<RefCell<Option<EngineParams>>>,
    }

    impl Default for MockLoader {
        fn default() -> Self {
            Self {
                reply: "mock reply".to_string(),
                fragments: vec!["mock ".to_string(), "reply".to_string()],
                reported_layers: None,
                fail: Rc::new(RefCell::new(false)),
                load_calls: Rc::new(RefCell::new(0)),
                complete_calls: Rc::new(RefCell::new(0)),
                last_temperature: Rc::new(RefCell::new(None)),
                last_params: Rc::new(RefCell::new(None)),
            }
        }
    }

    impl EngineLoader for MockLoader {
        fn load(&self, params: &EngineParams) -> Result<Box<dyn ChatEngine>, EngineError> {
            *self.load_calls.borrow_mut() += 1;
            *self.last_params.borrow_mut() = Some(params.clone());
            if *self.fail.borrow() {
                return Err(EngineError::Construction("mock construction failure".into()));
            }
            Ok(Box::new(MockEngine {
                reply: self.reply.clone(),
                fragments: self.fragments.clone(),
                reported_layers: self.reported_layers,
                complete_calls: Rc::clone(&self.complete_calls),
                last_temperature: Rc::clone(&self.last_temperature),
            }))
        }
    }

    fn model_file(dir: &Path) -> PathBuf {
        let path = dir.join("test-llama.Q4_0.gguf");
        std::fs::write(&path, b"GGUF").unwrap();
        path
    }

    fn session_with(loader: MockLoader, acceleration: bool) -> ModelSession {
        ModelSession::with_acceleration(Box::new(loader), SamplingParams::default(), acceleration)
    }

    fn user(content: &str) -> Vec<Message> {
        vec![Message::new(Role::User, content)]
    }

    #[test]
    fn test_load_missing_file_returns_false() {
        let loader = MockLoader::default();
        let load_calls = Rc::clone(&loader.load_calls);
        let mut session = session_with(loader, false);

        assert!(!session.load("missing.bin", 32, 4096, "chatml"));
        assert_eq!(*load_calls.borrow(), 0, "loader must not be invoked");
        assert_eq!(session.hardware_status().mode, HardwareMode::Unknown);
        assert_eq!(session.hardware_status().gpu_layers, 0);
        assert!(!session.is_loaded());
    }

    #[test]
    fn test_load_clamps_parameters() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let loader = MockLoader::default();
        let last_params = Rc::clone(&loader.last_params);
        let mut session = session_with(loader, false);

        assert!(session.load(&path, -5, 100, "bogus-format"));

        let params = last_params.borrow().clone().unwrap();
        assert_eq!(params.gpu_layers, 50);
        assert_eq!(params.context_size, 4096);
        assert_eq!(params.chat_format, ChatFormat::ChatMl);
        assert_eq!(session.model_path(), Some(path.as_path()));
    }

    #[test]
    fn test_gpu_requested_but_engine_reports_cpu() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let loader = MockLoader {
            reported_layers: Some(0),
            ..MockLoader::default()
        };
        let mut session = session_with(loader, false);

        assert!(session.load(&path, 32, 4096, "chatml"));
        let info = session.get_hardware_info();
        assert_eq!(info.mode, HardwareMode::Cpu);
        assert_eq!(info.gpu_layers, 0);
        assert!(info.last_checked.is_some());
        assert!(!session.is_gpu_mode());
    }

    #[test]
    fn test_gpu_mode_inferred_from_probe() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let loader = MockLoader::default();
        let mut session = session_with(loader, true);

        assert!(session.load(&path, 32, 4096, "chatml"));
        assert!(session.is_gpu_mode());
        assert_eq!(session.gpu_layers(), 32);
    }

    #[test]
    fn test_failed_swap_leaves_session_unloaded() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let loader = MockLoader::default();
        let fail = Rc::clone(&loader.fail);
        let mut session = session_with(loader, false);

        assert!(session.load(&path, 0, 4096, "chatml"));
        assert!(session.is_loaded());

        *fail.borrow_mut() = true;
        assert!(!session.load(&path, 0, 4096, "chatml"));
        assert!(!session.is_loaded());
        assert_eq!(session.hardware_status().mode, HardwareMode::Unknown);
        assert!(session.chat(&user("hi")).is_err());
    }

    #[test]
    fn test_chat_requires_model_and_messages() {
        let mut session = session_with(MockLoader::default(), false);
        assert!(matches!(
            session.chat(&user("hi")),
            Err(SessionError::NoModelLoaded)
        ));

        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        assert!(session.load(&path, 0, 4096, "chatml"));
        assert!(matches!(session.chat(&[]), Err(SessionError::EmptyPrompt)));
    }

    #[test]
    fn test_chat_caches_identical_prompts() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let loader = MockLoader::default();
        let complete_calls = Rc::clone(&loader.complete_calls);
        let mut session = session_with(loader, false);
        assert!(session.load(&path, 0, 4096, "chatml"));

        let first = session.chat(&user("hello")).unwrap();
        let second = session.chat(&user("hello")).unwrap();
        assert_eq!(first, second);
        assert_eq!(*complete_calls.borrow(), 1, "second call must hit the cache");

        session.chat(&user("different")).unwrap();
        assert_eq!(*complete_calls.borrow(), 2);
    }

    #[test]
    fn test_chat_clamps_temperature() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let loader = MockLoader::default();
        let last_temperature = Rc::clone(&loader.last_temperature);
        let mut session = ModelSession::with_acceleration(
            Box::new(loader),
            SamplingParams {
                temperature: 3.0,
                ..SamplingParams::default()
            },
            false,
        );
        assert!(session.load(&path, 0, 4096, "chatml"));

        session.chat(&user("hi")).unwrap();
        assert_eq!(*last_temperature.borrow(), Some(1.0));
    }

    #[test]
    fn test_empty_reply_is_an_error_and_not_cached() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let loader = MockLoader {
            reply: "   ".to_string(),
            ..MockLoader::default()
        };
        let complete_calls = Rc::clone(&loader.complete_calls);
        let mut session = session_with(loader, false);
        assert!(session.load(&path, 0, 4096, "chatml"));

        assert!(matches!(
            session.chat(&user("hi")),
            Err(SessionError::EmptyResponse)
        ));
        // A retry reaches the engine again instead of a cached blank.
        let _ = session.chat(&user("hi"));
        assert_eq!(*complete_calls.borrow(), 2);
    }

    #[test]
    fn test_chat_records_metrics() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let mut session = session_with(MockLoader::default(), false);
        assert!(session.load(&path, 0, 4096, "chatml"));

        session.chat(&user("hi")).unwrap();
        let info = session.get_hardware_info();
        assert!(info.performance_metrics.last_inference_secs.is_some());
        assert!(info.performance_metrics.avg_inference_secs.is_some());
    }

    #[test]
    fn test_chat_stream_concatenates_to_reply() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let mut session = session_with(MockLoader::default(), false);
        assert!(session.load(&path, 0, 4096, "chatml"));

        let stream = session.chat_stream(&user("hi")).unwrap();
        let full: String = stream.collect();
        assert_eq!(full, "mock reply");

        let metrics = session.get_hardware_info().performance_metrics;
        assert!(metrics.tokens_per_second.is_some());
    }

    #[test]
    fn test_chat_stream_empty_yields_sentinel() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let loader = MockLoader {
            fragments: Vec::new(),
            ..MockLoader::default()
        };
        let mut session = session_with(loader, false);
        assert!(session.load(&path, 0, 4096, "chatml"));

        let fragments: Vec<String> = session.chat_stream(&user("hi")).unwrap().collect();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0], crate::inference::streaming::NO_OUTPUT_SENTINEL);
    }

    #[test]
    fn test_unload_resets_state() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let mut session = session_with(MockLoader::default(), false);
        assert!(session.load(&path, 0, 4096, "chatml"));

        session.unload();
        assert!(!session.is_loaded());
        assert!(session.model_path().is_none());
        assert_eq!(session.hardware_status().mode, HardwareMode::Unknown);
    }

    #[test]
    fn test_load_from_settings_applies_sampling() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let mut config = Settings::default();
        config.model.path = Some(path.clone());
        config.model.temperature = 0.2;
        config.model.top_k = 20;

        let mut session = session_with(MockLoader::default(), false);
        assert!(session.load_from_settings(&config));
        assert_eq!(session.sampling().temperature, 0.2);
        assert_eq!(session.sampling().top_k, 20);

        config.model.path = None;
        assert!(!session.load_from_settings(&config));
    }

    #[test]
    fn test_gpu_settings_round_trip() {
        let dir = tempdir().unwrap();
        let path = model_file(dir.path());
        let settings_path = dir.path().join("settings.json");
        let loader = MockLoader {
            reported_layers: Some(28),
            ..MockLoader::default()
        };
        let mut session = session_with(loader, true);
        assert!(session.load(&path, 28, 4096, "chatml"));
        assert!(session.is_gpu_mode());

        session.save_gpu_settings(&settings_path).unwrap();
        assert_eq!(ModelSession::load_gpu_settings(&settings_path).unwrap(), 28);
    }

    #[test]
    fn test_set_temperature_clamps() {
        let mut session = session_with(MockLoader::default(), false);
        session.set_temperature(0.4);
        assert_eq!(session.sampling().temperature, 0.4);
        session.set_temperature(9.0);
        assert_eq!(session.sampling().temperature, 1.0);
    }

    #[test]
    fn test_message_digest_is_order_sensitive() {
        let a = vec![
            Message::new(Role::User, "one"),
            Message::new(Role::Assistant, "two"),
        ];
        let b = vec![
            Message::new(Role::User, "two"),
            Message::new(Role::Assistant, "one"),
        ];
        assert_ne!(message_digest(&a), message_digest(&b));
        assert_eq!(message_digest(&a), message_digest(&a));
    }
}
