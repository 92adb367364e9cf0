//! Retrieval: semantic search plus the team-aware temporal re-ranking pass.
//!
//! [`Retriever::retrieve`] is a plain nearest-neighbour search. The
//! team-scoped variant treats that search as a coarse pre-filter only: it
//! over-fetches candidates, then keeps matches whose `rm_team` contains the
//! requested team, drops records without a usable date, applies the
//! played/upcoming cut against the current moment, and orders by date.
//!
//! A `Retriever` holds shared handles only and is safe to use from many
//! requests at once.

use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{RetrievalError, RetrievalResult};
use crate::models::{DocKind, QueryResultItem, ResultSet};
use crate::store::{MetadataFilter, VectorIndex};

/// Which side of "now" a team-scoped retrieval keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalScope {
    /// Every dated match, most recent first.
    Any,
    /// Matches dated at or before now, most recent first.
    Played,
    /// Matches dated after now, soonest first.
    Upcoming,
}

impl TemporalScope {
    /// Map the `only_played` / `only_future` flag pair. Setting both is
    /// rejected: no date satisfies both.
    pub fn from_flags(only_played: bool, only_future: bool) -> RetrievalResult<Self> {
        match (only_played, only_future) {
            (true, true) => Err(RetrievalError::ConflictingTemporalScope),
            (true, false) => Ok(TemporalScope::Played),
            (false, true) => Ok(TemporalScope::Upcoming),
            (false, false) => Ok(TemporalScope::Any),
        }
    }

    fn keeps(&self, date: NaiveDateTime, now: NaiveDateTime) -> bool {
        match self {
            TemporalScope::Any => true,
            TemporalScope::Played => date <= now,
            TemporalScope::Upcoming => date > now,
        }
    }
}

/// Size of the raw candidate window for team-scoped retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverFetch {
    pub multiplier: usize,
    pub floor: usize,
}

impl Default for OverFetch {
    fn default() -> Self {
        Self {
            multiplier: 5,
            floor: 50,
        }
    }
}

impl OverFetch {
    pub fn window(&self, k: usize) -> usize {
        k.saturating_mul(self.multiplier).max(self.floor)
    }
}

/// Strip every whitespace character and upper-case, so spacing variants of
/// one team name compare equal.
pub fn normalize_team_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// `true` when `candidate` names the team `entity`, tolerating spacing and
/// case differences. Containment, not equality.
pub fn team_matches(candidate: &str, entity: &str) -> bool {
    let needle = normalize_team_name(entity);
    !needle.is_empty() && normalize_team_name(candidate).contains(&needle)
}

const DATE_FORMATS: &[&str] = &["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M"];

/// Parse a day/month/year match date, with or without a time of day.
/// A bare date is taken as midnight.
pub fn parse_match_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for format in DATE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%d/%m/%Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    overfetch: OverFetch,
    now: Option<NaiveDateTime>,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        overfetch: OverFetch,
    ) -> Self {
        Self {
            embedder,
            index,
            overfetch,
            now: None,
        }
    }

    /// Pin "now" instead of reading the local clock.
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    fn now(&self) -> NaiveDateTime {
        self.now
            .unwrap_or_else(|| chrono::Local::now().naive_local())
    }

    async fn embed(&self, text: &str) -> RetrievalResult<Vec<f32>> {
        self.embedder
            .embed(text)
            .await
            .map_err(|e| RetrievalError::Embedding(format!("{:#}", e)))
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> RetrievalResult<ResultSet> {
        self.index
            .search(vector, k, filter)
            .await
            .map_err(|e| RetrievalError::Index(format!("{:#}", e)))
    }

    /// Top `k` records for `query`, nearest first, restricted by `filter`.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> RetrievalResult<ResultSet> {
        if k == 0 {
            return Err(RetrievalError::InvalidRequest(
                "n_results must be at least 1".to_string(),
            ));
        }
        let vector = self.embed(query).await?;
        let results = self.search(&vector, k, filter).await?;
        debug!(k, filtered = !filter.is_empty(), returned = results.len(), "semantic retrieval");
        Ok(results)
    }

    pub async fn retrieve_matches(&self, query: &str, k: usize) -> RetrievalResult<ResultSet> {
        self.retrieve(query, k, &MetadataFilter::kind(DocKind::Match))
            .await
    }

    pub async fn retrieve_standings(&self, query: &str, k: usize) -> RetrievalResult<ResultSet> {
        self.retrieve(query, k, &MetadataFilter::kind(DocKind::Standing))
            .await
    }

    /// Flag-based form of [`retrieve_team`](Self::retrieve_team).
    pub async fn retrieve_by_team(
        &self,
        entity: &str,
        k: usize,
        only_played: bool,
        only_future: bool,
    ) -> RetrievalResult<ResultSet> {
        let scope = TemporalScope::from_flags(only_played, only_future)?;
        self.retrieve_team(entity, k, scope).await
    }

    /// Matches of one team, date-filtered and date-ordered per `scope`,
    /// at most `k`. No surviving record yields an empty set.
    pub async fn retrieve_team(
        &self,
        entity: &str,
        k: usize,
        scope: TemporalScope,
    ) -> RetrievalResult<ResultSet> {
        if normalize_team_name(entity).is_empty() {
            return Err(RetrievalError::InvalidRequest(
                "team name must not be empty".to_string(),
            ));
        }
        if k == 0 {
            return Err(RetrievalError::InvalidRequest(
                "n_results must be at least 1".to_string(),
            ));
        }

        let window = self.overfetch.window(k);
        let vector = self
            .embed(&format!("matches and statistics for {}", entity))
            .await?;
        let candidates = self
            .search(&vector, window, &MetadataFilter::kind(DocKind::Match))
            .await?;

        if candidates.len() >= window {
            warn!(
                team = entity,
                window,
                "team retrieval filled the over-fetch window; older or later matches may be missing"
            );
        }

        let now = self.now();
        let raw = candidates.len();
        let mut dated: Vec<(NaiveDateTime, QueryResultItem)> = candidates
            .items
            .into_iter()
            .filter(|item| item.metadata.kind() == Some(DocKind::Match))
            .filter(|item| {
                item.metadata
                    .get_str("rm_team")
                    .is_some_and(|team| team_matches(team, entity))
            })
            .filter_map(|item| {
                let date = item.metadata.get_str("date").and_then(parse_match_date)?;
                Some((date, item))
            })
            .filter(|(date, _)| scope.keeps(*date, now))
            .collect();

        // Stable sorts: equal dates keep their similarity order.
        match scope {
            TemporalScope::Upcoming => dated.sort_by(|a, b| a.0.cmp(&b.0)),
            TemporalScope::Played | TemporalScope::Any => dated.sort_by(|a, b| b.0.cmp(&a.0)),
        }
        dated.truncate(k);

        debug!(
            team = entity,
            ?scope,
            raw,
            kept = dated.len(),
            "team retrieval"
        );

        Ok(ResultSet::new(dated.into_iter().map(|(_, item)| item).collect()))
    }

    /// Semantic search restricted to one league; no temporal logic.
    pub async fn retrieve_by_league(&self, league: &str, k: usize) -> RetrievalResult<ResultSet> {
        if league.trim().is_empty() {
            return Err(RetrievalError::InvalidRequest(
                "league name must not be empty".to_string(),
            ));
        }
        self.retrieve(
            &format!("standings and matches in {}", league),
            k,
            &MetadataFilter::none().and("league", league),
        )
        .await
    }

    pub async fn count(&self) -> RetrievalResult<usize> {
        self.index
            .count()
            .await
            .map_err(|e| RetrievalError::Index(format!("{:#}", e)))
    }
}
