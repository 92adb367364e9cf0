//! Request orchestration: classify → retrieve → assemble → generate.
//!
//! [`RagService`] is built once per process (by the CLI or the server) and
//! shared behind an `Arc`. It holds no per-request state, so any number of
//! requests may run through it concurrently. Each request owns its own
//! [`ResultSet`] and drops it when done; nothing is written, so an abandoned
//! request needs no cleanup.
//!
//! The routing decision is [`plan`], a pure function of the classification:
//!
//! | Entity | Temporal | Plan |
//! |--------|----------|------|
//! | yes | past | [`RetrievalPlan::TeamPlayed`] with `n` results |
//! | yes | future | [`RetrievalPlan::TeamUpcoming`] with 1 result when the question is singular, else `n` |
//! | otherwise | | [`RetrievalPlan::Semantic`] over the whole index |

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::classifier::{Classification, EntityRef, QueryClassifier, TemporalIntent};
use crate::config::Config;
use crate::context::format_context;
use crate::db;
use crate::embedding;
use crate::error::{AskError, RetrievalError, RetrievalResult};
use crate::generation::{self, AnswerGenerator};
use crate::models::{DocKind, Metadata, ResultSet};
use crate::retriever::{OverFetch, Retriever, TemporalScope};
use crate::store::{MetadataFilter, SqliteIndex, VectorIndex};

/// Request-independent knobs, taken from `[retrieval]` and `[generation]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AskSettings {
    pub default_n_results: usize,
    pub max_n_results: usize,
    pub context_max_chars: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for AskSettings {
    fn default() -> Self {
        Self {
            default_n_results: 10,
            max_n_results: 20,
            context_max_chars: 2000,
            temperature: 0.5,
            max_output_tokens: 400,
        }
    }
}

impl AskSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_n_results: config.retrieval.default_n_results,
            max_n_results: config.retrieval.max_n_results,
            context_max_chars: config.retrieval.context_max_chars,
            temperature: config.generation.temperature,
            max_output_tokens: config.generation.max_output_tokens,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub n_results: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Restricts plain semantic search to one record kind. Takes precedence
    /// over any kind the classifier infers.
    #[serde(default)]
    pub filter_type: Option<DocKind>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RetrievalPlan {
    TeamPlayed { team: EntityRef, k: usize },
    TeamUpcoming { team: EntityRef, k: usize },
    Semantic { k: usize, filter_type: Option<DocKind> },
}

/// Choose the retrieval strategy for a classified question asking for `n`
/// results.
pub fn plan(classification: &Classification, n: usize, filter_type: Option<DocKind>) -> RetrievalPlan {
    match (&classification.entity, classification.temporal) {
        (Some(team), TemporalIntent::Past) => RetrievalPlan::TeamPlayed {
            team: team.clone(),
            k: n,
        },
        (Some(team), TemporalIntent::Future) => RetrievalPlan::TeamUpcoming {
            team: team.clone(),
            k: if classification.wants_single { 1 } else { n },
        },
        _ => RetrievalPlan::Semantic {
            k: n,
            filter_type: filter_type.or(classification.type_filter),
        },
    }
}

/// Everything the generation step needs, plus how it was obtained.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedContext {
    pub query: String,
    pub classification: Classification,
    pub plan: RetrievalPlan,
    #[serde(skip)]
    pub results: ResultSet,
    pub context: String,
}

impl PreparedContext {
    pub fn sources(&self) -> Vec<Metadata> {
        self.results.sources()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<Metadata>,
    pub context_used: String,
    pub query: String,
    pub timestamp: String,
}

pub struct RagService {
    retriever: Retriever,
    classifier: QueryClassifier,
    generator: Arc<dyn AnswerGenerator>,
    settings: AskSettings,
}

impl RagService {
    pub fn new(
        retriever: Retriever,
        classifier: QueryClassifier,
        generator: Arc<dyn AnswerGenerator>,
        settings: AskSettings,
    ) -> Self {
        Self {
            retriever,
            classifier,
            generator,
            settings,
        }
    }

    /// Open the SQLite index and create the providers named in `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteIndex::open(pool).await?);
        let embedder = embedding::create_provider(&config.embedding)?;
        let generator = generation::create_generator(&config.generation)?;
        let classifier = QueryClassifier::from_config(&config.classifier)?;
        let overfetch = OverFetch {
            multiplier: config.retrieval.overfetch_multiplier,
            floor: config.retrieval.overfetch_floor,
        };

        info!(
            embedding = embedder.model_name(),
            generation = generator.model_name(),
            "retrieval service ready"
        );

        Ok(Self::new(
            Retriever::new(embedder, index, overfetch),
            classifier,
            generator,
            AskSettings::from_config(config),
        ))
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn classifier(&self) -> &QueryClassifier {
        &self.classifier
    }

    pub fn generator(&self) -> &Arc<dyn AnswerGenerator> {
        &self.generator
    }

    pub fn settings(&self) -> &AskSettings {
        &self.settings
    }

    /// Resolve a requested result count against the configured bounds.
    pub fn resolve_n_results(&self, requested: Option<usize>) -> RetrievalResult<usize> {
        let n = requested.unwrap_or(self.settings.default_n_results);
        if n == 0 || n > self.settings.max_n_results {
            return Err(RetrievalError::InvalidRequest(format!(
                "n_results must be between 1 and {}",
                self.settings.max_n_results
            )));
        }
        Ok(n)
    }

    /// Classify, plan, retrieve, and assemble the context for `request`.
    pub async fn prepare(&self, request: &AskRequest) -> RetrievalResult<PreparedContext> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(RetrievalError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }
        let n = self.resolve_n_results(request.n_results)?;

        let classification = self.classifier.classify(question);
        let plan = plan(&classification, n, request.filter_type);
        info!(
            entity = classification.entity.as_ref().map(|e| e.as_str()),
            temporal = ?classification.temporal,
            plan = ?plan,
            "retrieval plan"
        );

        let results = self.execute(question, &plan).await?;
        let context = format_context(&results, self.settings.context_max_chars);

        Ok(PreparedContext {
            query: question.to_string(),
            classification,
            plan,
            results,
            context,
        })
    }

    async fn execute(&self, question: &str, plan: &RetrievalPlan) -> RetrievalResult<ResultSet> {
        match plan {
            RetrievalPlan::TeamPlayed { team, k } => {
                self.retriever
                    .retrieve_team(team.as_str(), *k, TemporalScope::Played)
                    .await
            }
            RetrievalPlan::TeamUpcoming { team, k } => {
                self.retriever
                    .retrieve_team(team.as_str(), *k, TemporalScope::Upcoming)
                    .await
            }
            RetrievalPlan::Semantic { k, filter_type } => {
                let filter = (*filter_type).map(MetadataFilter::kind).unwrap_or_default();
                self.retriever.retrieve(question, *k, &filter).await
            }
        }
    }

    /// Full pipeline including answer generation.
    pub async fn ask(&self, request: &AskRequest) -> Result<AskResponse, AskError> {
        let temperature = request.temperature.unwrap_or(self.settings.temperature);
        if !(0.0..=1.0).contains(&temperature) {
            return Err(RetrievalError::InvalidRequest(
                "temperature must be between 0.0 and 1.0".to_string(),
            )
            .into());
        }
        if !self.generator.is_enabled() {
            return Err(AskError::GenerationDisabled);
        }

        let prepared = self.prepare(request).await?;
        if prepared.results.is_empty() {
            info!(query = %prepared.query, "no matching records; generating from empty context");
        }

        let answer = self
            .generator
            .generate(
                &prepared.query,
                &prepared.context,
                temperature,
                self.settings.max_output_tokens,
            )
            .await
            .map_err(|e| {
                warn!(error = %e, model = self.generator.model_name(), "answer generation failed");
                AskError::Generation(format!("{:#}", e))
            })?;

        Ok(AskResponse {
            answer,
            sources: prepared.sources(),
            context_used: prepared.context,
            query: prepared.query,
            timestamp: chrono::Local::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification(entity: Option<&str>, temporal: TemporalIntent, single: bool) -> Classification {
        Classification {
            entity: entity.map(EntityRef::new),
            temporal,
            type_filter: None,
            wants_single: single,
        }
    }

    #[test]
    fn test_plan_past_team() {
        let c = classification(Some("RM VOLLEY #18"), TemporalIntent::Past, false);
        assert_eq!(
            plan(&c, 7, None),
            RetrievalPlan::TeamPlayed {
                team: EntityRef::new("RM VOLLEY #18"),
                k: 7
            }
        );
    }

    #[test]
    fn test_plan_future_singular_and_plural() {
        let single = classification(Some("RM VOLLEY #18"), TemporalIntent::Future, true);
        let plural = classification(Some("RM VOLLEY #18"), TemporalIntent::Future, false);
        assert!(matches!(plan(&single, 10, None), RetrievalPlan::TeamUpcoming { k: 1, .. }));
        assert!(matches!(plan(&plural, 10, None), RetrievalPlan::TeamUpcoming { k: 10, .. }));
    }

    #[test]
    fn test_plan_entity_without_intent_is_semantic() {
        let c = classification(Some("RM VOLLEY #18"), TemporalIntent::Neutral, false);
        assert_eq!(
            plan(&c, 5, None),
            RetrievalPlan::Semantic {
                k: 5,
                filter_type: None
            }
        );
    }

    #[test]
    fn test_plan_request_filter_wins_over_inferred() {
        let mut c = classification(None, TemporalIntent::Neutral, false);
        c.type_filter = Some(DocKind::Standing);
        assert_eq!(
            plan(&c, 5, Some(DocKind::Match)),
            RetrievalPlan::Semantic {
                k: 5,
                filter_type: Some(DocKind::Match)
            }
        );
        assert_eq!(
            plan(&c, 5, None),
            RetrievalPlan::Semantic {
                k: 5,
                filter_type: Some(DocKind::Standing)
            }
        );
    }

    #[test]
    fn test_ask_request_deserializes_with_defaults() {
        let req: AskRequest =
            serde_json::from_str(r#"{"question": "classifica", "filter_type": "standing"}"#).unwrap();
        assert_eq!(req.n_results, None);
        assert_eq!(req.filter_type, Some(DocKind::Standing));
    }
}
