//! TOML configuration.
//!
//! A single file drives every command and the HTTP server. Only `[db]` is
//! mandatory; every other section falls back to defaults that reproduce the
//! behaviour of the production deployment.
//!
//! ```toml
//! [db]
//! path = "./data/vrag.sqlite"
//!
//! [embedding]
//! provider = "local"
//! model = "multilingual-e5-small"
//!
//! [generation]
//! provider = "ollama"
//! model = "llama3.2:3b"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_n_results")]
    pub default_n_results: usize,
    #[serde(default = "default_max_n_results")]
    pub max_n_results: usize,
    /// Raw candidates fetched per requested result in team-scoped retrieval.
    #[serde(default = "default_overfetch_multiplier")]
    pub overfetch_multiplier: usize,
    /// Minimum raw candidates fetched in team-scoped retrieval.
    #[serde(default = "default_overfetch_floor")]
    pub overfetch_floor: usize,
    /// Largest number of match records expected for a single team. When set,
    /// the over-fetch floor must cover it.
    #[serde(default)]
    pub expected_max_records_per_team: Option<usize>,
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_n_results: default_n_results(),
            max_n_results: default_max_n_results(),
            overfetch_multiplier: default_overfetch_multiplier(),
            overfetch_floor: default_overfetch_floor(),
            expected_max_records_per_team: None,
            context_max_chars: default_context_max_chars(),
        }
    }
}

fn default_n_results() -> usize {
    10
}
fn default_max_n_results() -> usize {
    20
}
fn default_overfetch_multiplier() -> usize {
    5
}
fn default_overfetch_floor() -> usize {
    50
}
fn default_context_max_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 32,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            timeout_secs: default_generation_timeout(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_generation_timeout() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.5
}
fn default_max_output_tokens() -> u32 {
    400
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Optional overrides for the query classifier vocabulary.
///
/// Any list left unset keeps the built-in table from
/// [`crate::classifier::Vocabulary::default`].
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub infer_type_filter: bool,
    #[serde(default)]
    pub entities: Option<Vec<EntityPatternConfig>>,
    #[serde(default)]
    pub past_keywords: Option<Vec<String>>,
    #[serde(default)]
    pub future_keywords: Option<Vec<String>>,
    #[serde(default)]
    pub singular_next: Option<Vec<String>>,
    #[serde(default)]
    pub plural_next: Option<Vec<String>>,
    #[serde(default)]
    pub standing_keywords: Option<Vec<String>>,
    #[serde(default)]
    pub match_keywords: Option<Vec<String>>,
}

/// One row of the entity table: a regex over the upper-cased question and
/// the entity it resolves to (`$1`-style capture references allowed).
#[derive(Debug, Deserialize, Clone)]
pub struct EntityPatternConfig {
    pub pattern: String,
    pub entity: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_matches_path")]
    pub matches_path: PathBuf,
    #[serde(default = "default_standings_path")]
    pub standings_path: PathBuf,
    /// Name fragments identifying the tracked organisation's teams.
    #[serde(default = "default_tracked_patterns")]
    pub tracked_patterns: Vec<String>,
    /// `"league"` for one record per league table, `"team"` for one per row.
    #[serde(default = "default_standings_granularity")]
    pub standings: String,
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryRule>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            matches_path: default_matches_path(),
            standings_path: default_standings_path(),
            tracked_patterns: default_tracked_patterns(),
            standings: default_standings_granularity(),
            categories: default_categories(),
        }
    }
}

/// Maps markers found in a tracked team's name to its age division.
#[derive(Debug, Deserialize, Clone)]
pub struct CategoryRule {
    pub markers: Vec<String>,
    pub label: String,
}

fn default_matches_path() -> PathBuf {
    PathBuf::from("./data/matches.csv")
}
fn default_standings_path() -> PathBuf {
    PathBuf::from("./data/standings.json")
}
fn default_tracked_patterns() -> Vec<String> {
    vec!["RM VOLLEY".to_string(), "RMVOLLEY".to_string()]
}
fn default_standings_granularity() -> String {
    "league".to_string()
}
fn default_categories() -> Vec<CategoryRule> {
    let rule = |markers: &[&str], label: &str| CategoryRule {
        markers: markers.iter().map(|m| m.to_string()).collect(),
        label: label.to_string(),
    };
    vec![
        rule(&["#18", " 18"], "Under 18 Women"),
        rule(&["#16", " 16"], "Under 16 Women"),
        rule(&["#14", " 14", " 13", " 15"], "Under 14 Women"),
        rule(&["#2", " 2"], "Second Division Women"),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_request_timeout() -> u64 {
    90
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// A config with every section at its default and the database under
    /// `./data`. Used by tests and by commands that run without a file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/vrag.sqlite"),
            },
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            classifier: ClassifierConfig::default(),
            indexing: IndexingConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let retrieval = &config.retrieval;
    if retrieval.default_n_results == 0 {
        bail!("retrieval.default_n_results must be >= 1");
    }
    if retrieval.default_n_results > retrieval.max_n_results {
        bail!("retrieval.default_n_results must be <= retrieval.max_n_results");
    }
    if retrieval.overfetch_multiplier == 0 {
        bail!("retrieval.overfetch_multiplier must be >= 1");
    }
    if retrieval.overfetch_floor == 0 {
        bail!("retrieval.overfetch_floor must be >= 1");
    }
    if let Some(expected) = retrieval.expected_max_records_per_team {
        if retrieval.overfetch_floor < expected {
            bail!(
                "retrieval.overfetch_floor ({}) must cover retrieval.expected_max_records_per_team ({})",
                retrieval.overfetch_floor,
                expected
            );
        }
    }
    if retrieval.context_max_chars == 0 {
        bail!("retrieval.context_max_chars must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.generation.provider.as_str() {
        "disabled" | "ollama" | "groq" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, ollama, or groq.",
            other
        ),
    }
    if !(0.0..=1.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 1.0]");
    }

    if let Some(entities) = &config.classifier.entities {
        for e in entities {
            Regex::new(&e.pattern).with_context(|| {
                format!("classifier.entities: invalid pattern '{}'", e.pattern)
            })?;
        }
    }

    match config.indexing.standings.as_str() {
        "league" | "team" => {}
        other => bail!(
            "indexing.standings must be 'league' or 'team', got '{}'",
            other
        ),
    }

    Ok(())
}
