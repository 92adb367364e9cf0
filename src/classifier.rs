//! Query classification.
//!
//! Turns a raw question into a [`Classification`]: the team it mentions (if
//! any), whether it asks about past results or upcoming fixtures, and
//! optionally which record kind it targets.
//!
//! All vocabulary lives in ordered tables inside [`Vocabulary`]. Tables are
//! evaluated top to bottom and the first hit wins, so extending the
//! vocabulary never touches control flow. [`QueryClassifier::classify`] is a
//! pure function of its input.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

use crate::config::ClassifierConfig;
use crate::models::DocKind;

/// A tracked team as named in a question, in canonical form
/// (e.g. `RM VOLLEY #18`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EntityRef(String);

impl EntityRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalIntent {
    /// Result-seeking: what already happened.
    Past,
    /// Schedule-seeking: what is still to be played.
    Future,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub entity: Option<EntityRef>,
    pub temporal: TemporalIntent,
    pub type_filter: Option<DocKind>,
    /// Future questions phrased in the singular ("the next match") want
    /// exactly one fixture. Always `false` for other intents.
    pub wants_single: bool,
}

/// Regex over the upper-cased question and the canonical entity it yields.
/// The entity may reference capture groups (`$1`).
#[derive(Debug, Clone)]
pub struct EntityRule {
    pattern: Regex,
    entity: String,
}

impl EntityRule {
    pub fn new(pattern: &str, entity: &str) -> Result<Self> {
        let pattern =
            Regex::new(pattern).with_context(|| format!("invalid entity pattern '{}'", pattern))?;
        Ok(Self {
            pattern,
            entity: entity.to_string(),
        })
    }

    fn apply(&self, upper: &str) -> Option<EntityRef> {
        let caps = self.pattern.captures(upper)?;
        let mut out = String::new();
        caps.expand(&self.entity, &mut out);
        Some(EntityRef(out.trim().to_string()))
    }
}

/// Keywords (lower-case, substring-matched) mapped to a value.
#[derive(Debug, Clone)]
pub struct KeywordRule<T> {
    pub keywords: Vec<String>,
    pub value: T,
}

impl<T: Copy> KeywordRule<T> {
    fn new(keywords: &[&str], value: T) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            value,
        }
    }

    fn hit(&self, lower: &str) -> Option<T> {
        contains_any(lower, &self.keywords).then_some(self.value)
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| !n.is_empty() && haystack.contains(n.as_str()))
}

fn first_hit<T: Copy>(rules: &[KeywordRule<T>], lower: &str) -> Option<T> {
    rules.iter().find_map(|rule| rule.hit(lower))
}

fn lowered(words: &[String]) -> Vec<String> {
    words.iter().map(|w| w.to_lowercase()).collect()
}

#[derive(Debug, Clone)]
pub struct Vocabulary {
    pub entities: Vec<EntityRule>,
    /// Future rules come first: a question matching both sets is
    /// schedule-seeking.
    pub temporal: Vec<KeywordRule<TemporalIntent>>,
    pub singular_next: Vec<String>,
    pub plural_next: Vec<String>,
    pub types: Vec<KeywordRule<DocKind>>,
}

const DEFAULT_ENTITIES: &[(&str, &str)] = &[
    (r"RM\s*VOLLEY\s*#?(\d+)", "RM VOLLEY #$1"),
    (r"RMVOLLEY\s*#?(\d+)", "RM VOLLEY #$1"),
    (r"RM\s*VOLLEY\s*PIACENZA", "RM VOLLEY PIACENZA"),
];

const FUTURE_KEYWORDS: &[&str] = &[
    "next",
    "upcoming",
    "schedule",
    "when does it play",
    "future",
    "to be played",
    "prossima",
    "prossime",
    "prossimo",
    "calendario",
    "quando gioca",
    "futura",
    "da giocare",
];

const PAST_KEYWORDS: &[&str] = &[
    "recent",
    "played",
    "performance",
    "result",
    "last",
    "yesterday",
    "against",
    "how did it go",
    "won",
    "lost",
    "tied",
    "score",
    "recente",
    "giocato",
    "giocata",
    "risultat",
    "ultima",
    "ieri",
    "scorsa",
    "contro",
    "com'è andata",
    "come è andata",
    "vinto",
    "perso",
    "pareggio",
    "punteggio",
];

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            entities: DEFAULT_ENTITIES
                .iter()
                .filter_map(|(pattern, entity)| EntityRule::new(pattern, entity).ok())
                .collect(),
            temporal: vec![
                KeywordRule::new(FUTURE_KEYWORDS, TemporalIntent::Future),
                KeywordRule::new(PAST_KEYWORDS, TemporalIntent::Past),
            ],
            singular_next: vec![
                "next match".to_string(),
                "next game".to_string(),
                "prossima".to_string(),
            ],
            plural_next: vec![
                "next matches".to_string(),
                "next games".to_string(),
                "prossime".to_string(),
            ],
            types: vec![
                KeywordRule::new(
                    &["standing", "classifica", "ranking", "table"],
                    DocKind::Standing,
                ),
                KeywordRule::new(&["match", "game", "partita"], DocKind::Match),
            ],
        }
    }
}

impl Vocabulary {
    /// Default tables with any lists set in `[classifier]` swapped in.
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        let mut vocab = Self::default();

        if let Some(entities) = &config.entities {
            vocab.entities = entities
                .iter()
                .map(|e| EntityRule::new(&e.pattern, &e.entity))
                .collect::<Result<_>>()?;
        }
        if let Some(words) = &config.future_keywords {
            vocab.temporal[0].keywords = lowered(words);
        }
        if let Some(words) = &config.past_keywords {
            vocab.temporal[1].keywords = lowered(words);
        }
        if let Some(words) = &config.singular_next {
            vocab.singular_next = lowered(words);
        }
        if let Some(words) = &config.plural_next {
            vocab.plural_next = lowered(words);
        }
        if let Some(words) = &config.standing_keywords {
            vocab.types[0].keywords = lowered(words);
        }
        if let Some(words) = &config.match_keywords {
            vocab.types[1].keywords = lowered(words);
        }

        Ok(vocab)
    }
}

#[derive(Debug, Clone)]
pub struct QueryClassifier {
    vocab: Vocabulary,
    infer_type_filter: bool,
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new(Vocabulary::default(), false)
    }
}

impl QueryClassifier {
    pub fn new(vocab: Vocabulary, infer_type_filter: bool) -> Self {
        Self {
            vocab,
            infer_type_filter,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        Ok(Self::new(
            Vocabulary::from_config(config)?,
            config.infer_type_filter,
        ))
    }

    pub fn classify(&self, question: &str) -> Classification {
        let upper = question.to_uppercase();
        let lower = question.to_lowercase();

        let entity = self
            .vocab
            .entities
            .iter()
            .find_map(|rule| rule.apply(&upper));

        let temporal = first_hit(&self.vocab.temporal, &lower).unwrap_or(TemporalIntent::Neutral);

        let wants_single = temporal == TemporalIntent::Future
            && contains_any(&lower, &self.vocab.singular_next)
            && !contains_any(&lower, &self.vocab.plural_next);

        let type_filter = if self.infer_type_filter {
            first_hit(&self.vocab.types, &lower)
        } else {
            None
        };

        Classification {
            entity,
            temporal,
            type_filter,
            wants_single,
        }
    }
}
