//! Process-wide settings: LLM endpoint configuration, prompt templates, and
//! retrieval configuration, persisted as one JSON document with
//! backup-rename replacement.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::Metric;
use crate::llm::PayloadKind;
use crate::persist;
use crate::prompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fi,
}

/// Connection and generation defaults for the LLM endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub url:          String,
    pub model:        String,
    pub payload_type: PayloadKind,
    /// Per-call timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout:      u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens:   u32,
    #[serde(default = "default_temperature")]
    pub temperature:  f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p:        Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k:        Option<u32>,
    #[serde(default = "default_headers")]
    pub headers:      BTreeMap<String, String>,
}

fn default_timeout() -> u64 {
    300
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_temperature() -> f32 {
    0.3
}
fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())])
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url:          "http://localhost:11434/v1/chat/completions".to_string(),
            model:        "qwen".to_string(),
            payload_type: PayloadKind::Message,
            timeout:      default_timeout(),
            max_tokens:   default_max_tokens(),
            temperature:  default_temperature(),
            top_p:        Some(0.90),
            top_k:        Some(20),
            headers:      default_headers(),
        }
    }
}

/// Vector retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub enabled:         bool,
    pub embedding_model: String,
    pub dimension:       usize,
    #[serde(default)]
    pub metric:          Metric,
    pub index_path:      PathBuf,
    pub metadata_path:   PathBuf,
    #[serde(default = "default_hit_target")]
    pub hit_target:      usize,
    #[serde(default = "default_top_k")]
    pub top_k:           usize,
    #[serde(default = "default_step")]
    pub step:            f32,
    #[serde(default = "default_true")]
    pub use_dynamic_threshold: bool,
    #[serde(default)]
    pub store_task_outputs:    bool,
    #[serde(default = "default_max_context_length")]
    pub max_context_length:    usize,
}

fn default_hit_target() -> usize {
    3
}
fn default_top_k() -> usize {
    10
}
fn default_step() -> f32 {
    0.05
}
fn default_true() -> bool {
    true
}
fn default_max_context_length() -> usize {
    5000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled:         false,
            embedding_model: "TurkuNLP/sbert-cased-finnish-paraphrase".to_string(),
            dimension:       768,
            metric:          Metric::InnerProduct,
            index_path:      PathBuf::from("data/vectors.bin"),
            metadata_path:   PathBuf::from("data/metadata.json"),
            hit_target:      default_hit_target(),
            top_k:           default_top_k(),
            step:            default_step(),
            use_dynamic_threshold: true,
            store_task_outputs:    false,
            max_context_length:    default_max_context_length(),
        }
    }
}

/// Partial update for the retrieval configuration; absent fields keep their
/// current values. Validation runs on the merged result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrievalConfigPatch {
    pub enabled:               Option<bool>,
    pub embedding_model:       Option<String>,
    pub dimension:             Option<usize>,
    pub metric:                Option<Metric>,
    pub index_path:            Option<PathBuf>,
    pub metadata_path:         Option<PathBuf>,
    pub hit_target:            Option<usize>,
    pub top_k:                 Option<usize>,
    pub step:                  Option<f32>,
    pub use_dynamic_threshold: Option<bool>,
    pub store_task_outputs:    Option<bool>,
    pub max_context_length:    Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub language:  Language,
    #[serde(default)]
    pub llm:       LlmConfig,
    #[serde(default = "default_prompts")]
    pub prompts:   BTreeMap<String, String>,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language:  Language::En,
            llm:       LlmConfig::default(),
            prompts:   default_prompts(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

fn default_prompts() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("hidden_context".to_string(), String::new()),
        (
            "phase_0_planning".to_string(),
            "You are {agent_name}, an AI journalist.\n\
             Additional context: {agent_context}\n\n\
             Plan your next piece of work as an ordered tasklist. Respond with a JSON \
             object only, no additional text:\n\
             {\"goal\": \"one-sentence goal\", \"tasks\": [{\"id\": 1, \"name\": \"...\", \
             \"description\": \"...\", \"expected_output\": \"...\"}]}"
                .to_string(),
        ),
        (
            "task_execution_first".to_string(),
            "You are {agent_name}, an AI journalist.\n\
             Overall Goal: {goal}\n\n\
             Current Task: {task_name}\n\
             Description: {task_description}\n\
             Expected Output: {expected_output}\n\n\
             Relevant background:\n{context}\n\n\
             Complete this task and provide the output as described. Be thorough and \
             follow the expected output format."
                .to_string(),
        ),
        (
            "task_execution_sequential".to_string(),
            "You are {agent_name}, an AI journalist.\n\
             Overall Goal: {goal}\n\n\
             Current Task {task_id}: {task_name}\n\
             Description: {task_description}\n\
             Expected Output: {expected_output}\n\n\
             Output of previous tasks:\n{previous_tasks_context}\n\n\
             Relevant background:\n{additional_context}\n\n\
             Complete this task and provide the output as described. Be thorough and \
             follow the expected output format."
                .to_string(),
        ),
        (
            "task_validation".to_string(),
            "You are a quality assurance reviewer. Your job is to determine if a task \
             output meets the expected requirements.\n\n\
             Task Name: {task_name}\n\
             Task Description: {task_description}\n\
             Expected Output: {expected_output}\n\n\
             Actual Output:\n{actual_output}\n\n\
             Evaluate if the actual output meets the expected output requirements. \
             Respond with a JSON object:\n\
             {\"is_valid\": true/false, \"score\": 0-100, \"reason\": \"brief explanation\"}\n\n\
             Only respond with the JSON object, no additional text."
                .to_string(),
        ),
    ])
}

/// Loads, validates, and persists the settings document.
pub struct SettingsStore {
    path:  PathBuf,
    inner: RwLock<Settings>,
}

impl SettingsStore {
    /// Reads the document at `path`, writing defaults when it is missing. A
    /// corrupt document is replaced in memory by defaults (the file is left
    /// untouched for inspection).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str(&raw) {
                    Ok(settings) => {
                        tracing::info!(path = %path.display(), "loaded settings");
                        settings
                    }
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "failed to parse settings, using defaults");
                        Settings::default()
                    }
                },
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "failed to read settings, using defaults");
                    Settings::default()
                }
            }
        } else {
            tracing::warn!(path = %path.display(), "settings file not found, writing defaults");
            let settings = Settings::default();
            Self::write(&path, &settings)?;
            settings
        };

        Ok(Self { path, inner: RwLock::new(settings) })
    }

    fn write(path: &Path, settings: &Settings) -> Result<()> {
        let json = serde_json::to_vec_pretty(settings)?;
        persist::write_atomic(path, &json)
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        Self::write(&self.path, settings)?;
        tracing::info!(path = %self.path.display(), "saved settings");
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Settings> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn get_language(&self) -> Language {
        self.read().language
    }

    pub fn get_llm_config(&self) -> LlmConfig {
        self.read().llm.clone()
    }

    pub fn get_retrieval_config(&self) -> RetrievalConfig {
        self.read().retrieval.clone()
    }

    pub fn get_prompt(&self, name: &str) -> Result<String> {
        self.read()
            .prompts
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownPrompt(name.to_string()))
    }

    pub fn get_all_prompts(&self) -> BTreeMap<String, String> {
        self.read().prompts.clone()
    }

    pub fn get_all(&self) -> Settings {
        self.read().clone()
    }

    // ── Mutators ─────────────────────────────────────────────────────────

    pub fn update_language(&self, language: Language) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.language = language;
        self.save(&inner)
    }

    pub fn update_llm_config(&self, config: LlmConfig) -> Result<()> {
        if config.url.trim().is_empty() {
            return Err(Error::Config("LLM url must not be empty".into()));
        }
        if config.model.trim().is_empty() {
            return Err(Error::Config("LLM model must not be empty".into()));
        }
        if config.timeout == 0 {
            return Err(Error::Config("timeout must be a positive number of seconds".into()));
        }
        if !(0.0..=2.0).contains(&config.temperature) {
            return Err(Error::Config("temperature must be between 0 and 2".into()));
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.llm = config;
        self.save(&inner)?;
        tracing::info!("updated LLM configuration");
        Ok(())
    }

    pub fn update_retrieval_config(&self, patch: RetrievalConfigPatch) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut merged = inner.retrieval.clone();

        if let Some(v) = patch.enabled {
            merged.enabled = v;
        }
        if let Some(v) = patch.embedding_model {
            merged.embedding_model = v;
        }
        if let Some(v) = patch.dimension {
            merged.dimension = v;
        }
        if let Some(v) = patch.metric {
            merged.metric = v;
        }
        if let Some(v) = patch.index_path {
            merged.index_path = v;
        }
        if let Some(v) = patch.metadata_path {
            merged.metadata_path = v;
        }
        if let Some(v) = patch.hit_target {
            merged.hit_target = v;
        }
        if let Some(v) = patch.top_k {
            merged.top_k = v;
        }
        if let Some(v) = patch.step {
            merged.step = v;
        }
        if let Some(v) = patch.use_dynamic_threshold {
            merged.use_dynamic_threshold = v;
        }
        if let Some(v) = patch.store_task_outputs {
            merged.store_task_outputs = v;
        }
        if let Some(v) = patch.max_context_length {
            merged.max_context_length = v;
        }

        if merged.embedding_model.trim().is_empty() {
            return Err(Error::Config("embedding_model must not be empty".into()));
        }
        if merged.dimension == 0 {
            return Err(Error::Config("dimension must be a positive integer".into()));
        }
        if merged.index_path.as_os_str().is_empty() || merged.metadata_path.as_os_str().is_empty() {
            return Err(Error::Config("index_path and metadata_path must be set".into()));
        }
        if merged.hit_target == 0 {
            return Err(Error::Config("hit_target must be a positive integer".into()));
        }
        if merged.top_k == 0 {
            return Err(Error::Config("top_k must be a positive integer".into()));
        }
        if !(merged.step > 0.0 && merged.step <= 1.0) {
            return Err(Error::Config("step must be a number between 0 and 1".into()));
        }

        inner.retrieval = merged;
        self.save(&inner)?;
        tracing::info!("updated retrieval configuration");
        Ok(())
    }

    pub fn update_prompt(&self, name: &str, content: &str) -> Result<()> {
        self.validate_prompt(name, content)?;
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.prompts.insert(name.to_string(), content.to_string());
        self.save(&inner)?;
        tracing::info!(prompt = name, "updated prompt");
        Ok(())
    }

    /// Updates several prompts at once; all are validated before any is
    /// applied.
    pub fn update_prompts(&self, prompts: &BTreeMap<String, String>) -> Result<()> {
        for (name, content) in prompts {
            self.validate_prompt(name, content)?;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for (name, content) in prompts {
            inner.prompts.insert(name.clone(), content.clone());
        }
        self.save(&inner)?;
        tracing::info!(count = prompts.len(), "updated prompts");
        Ok(())
    }

    fn validate_prompt(&self, name: &str, content: &str) -> Result<()> {
        let missing = prompt::missing_variables(name, content);
        if !missing.is_empty() {
            return Err(Error::PromptVariables {
                name:    name.to_string(),
                missing: missing.join(", "),
            });
        }
        Ok(())
    }

    pub fn reset_to_defaults(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = Settings::default();
        self.save(&inner)?;
        tracing::info!("reset settings to defaults");
        Ok(())
    }

    /// Re-reads the document from disk, discarding in-memory state.
    pub fn reload(&self) -> Result<()> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Persist { path: self.path.clone(), source: e })?;
        let settings: Settings = serde_json::from_str(&raw)?;
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = settings;
        Ok(())
    }
}
