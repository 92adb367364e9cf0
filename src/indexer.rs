//! Indexing pipeline: match sheet and standings → embedded records.
//!
//! Reads the federation match export (CSV) and the standings file (JSON),
//! renders one text per fact, embeds in batches, and upserts into the
//! index. Record ids derive from natural keys (`match_<number>`,
//! `standing_<league>`), so re-running never duplicates a record.
//!
//! Runs are incremental: a record whose content hash is unchanged since the
//! last run is neither re-embedded nor rewritten. `--full` re-embeds
//! everything and then replaces the index contents, dropping records no
//! longer in the sources.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{CategoryRule, Config, IndexingConfig};
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::{DocKind, DocumentRecord, Metadata};
use crate::store::{content_hash, SqliteIndex, VectorIndex};

/// A rendered record awaiting its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// One row of the match export. Italian headers as exported by the
/// federation portal; English headers are accepted too.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchRow {
    #[serde(rename = "Gara N", alias = "match_number", default)]
    pub number: Option<String>,
    #[serde(rename = "Data", alias = "date", default)]
    pub date: Option<String>,
    #[serde(rename = "SquadraCasa", alias = "home_team", default)]
    pub home_team: Option<String>,
    #[serde(rename = "SquadraOspite", alias = "away_team", default)]
    pub away_team: Option<String>,
    #[serde(rename = "Risultato", alias = "result", default)]
    pub result: Option<String>,
    #[serde(rename = "Parziali", alias = "sets", default)]
    pub sets: Option<String>,
    #[serde(rename = "Impianto", alias = "venue", default)]
    pub venue: Option<String>,
    #[serde(rename = "Campionato", alias = "league", default)]
    pub league: Option<String>,
    #[serde(rename = "StatoDescrizione", alias = "status", default)]
    pub status: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// First tracked-team pattern contained in `team` (case-insensitive).
fn is_tracked(team: &str, patterns: &[String]) -> bool {
    let upper = team.to_uppercase();
    patterns.iter().any(|p| upper.contains(&p.to_uppercase()))
}

/// Age-division label for a tracked team name; first matching rule wins.
pub fn team_category<'a>(team: &str, rules: &'a [CategoryRule]) -> Option<&'a str> {
    rules
        .iter()
        .find(|rule| rule.markers.iter().any(|m| team.contains(m.as_str())))
        .map(|rule| rule.label.as_str())
}

/// Human-readable match status.
fn normalize_status(status: &str) -> String {
    let lower = status.to_lowercase();
    if lower.contains("gara omologata") {
        "official result".to_string()
    } else if lower.contains("risultato ufficioso") {
        "unofficial result".to_string()
    } else if lower.contains("da disputare") || lower.contains("da giocare") {
        "to be played".to_string()
    } else {
        status.to_string()
    }
}

/// `"3-1"` → `(3, 1)`.
fn parse_score(result: &str) -> Option<(u32, u32)> {
    let (home, away) = result.split_once('-')?;
    Some((home.trim().parse().ok()?, away.trim().parse().ok()?))
}

fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

pub fn match_record(row: &MatchRow, config: &IndexingConfig) -> PendingRecord {
    let date = non_empty(&row.date).unwrap_or("unknown date");
    let home = non_empty(&row.home_team).unwrap_or("Unknown");
    let away = non_empty(&row.away_team).unwrap_or("Unknown");

    // Home side first, as the export lists it.
    let tracked = if is_tracked(home, &config.tracked_patterns) {
        Some((home, away, true))
    } else if is_tracked(away, &config.tracked_patterns) {
        Some((away, home, false))
    } else {
        None
    };
    let category = tracked.and_then(|(team, _, _)| team_category(team, &config.categories));

    let mut lines = Vec::new();
    match category {
        Some(label) => lines.push(format!(
            "Match on {}: {} vs {} ({} team)",
            date, home, away, label
        )),
        None => lines.push(format!("Match on {}: {} vs {}", date, home, away)),
    }

    let result = non_empty(&row.result);
    if let Some(result) = result {
        lines.push(format!("Final result: {}", result));
        if let (Some((team, opponent, is_home)), Some((home_sets, away_sets))) =
            (tracked, parse_score(result))
        {
            let won = if is_home {
                home_sets > away_sets
            } else {
                away_sets > home_sets
            };
            let who = match category {
                Some(label) => format!("{} ({})", team, label),
                None => team.to_string(),
            };
            let outcome = if won { "won" } else { "lost" };
            lines.push(format!("{} {} {} against {}", who, outcome, result, opponent));
        }
    }
    if let Some(sets) = non_empty(&row.sets) {
        lines.push(format!("Set scores: {}", sets));
    }
    if let Some(venue) = non_empty(&row.venue) {
        lines.push(format!("Venue: {}", venue));
    }
    let league = non_empty(&row.league).unwrap_or_default();
    if !league.is_empty() {
        lines.push(format!("League: {}", league));
    }
    let status = non_empty(&row.status).unwrap_or_default();
    if !status.is_empty() {
        lines.push(format!("Status: {}", normalize_status(status)));
    }

    let number = non_empty(&row.number);
    let mut metadata = Metadata::new()
        .with("type", DocKind::Match.as_str())
        .with("match_id", number.unwrap_or_default())
        .with("date", date)
        .with("home_team", home)
        .with("away_team", away)
        .with("league", league)
        .with("status", status);
    if let Some((team, opponent, is_home)) = tracked {
        metadata.insert("rm_team", team);
        metadata.insert("opponent", opponent);
        metadata.insert("is_home", is_home);
        if let Some(label) = category {
            metadata.insert("team_category", label);
        }
    }
    if let Some(result) = result {
        metadata.insert("result", result);
    }

    let id = match number {
        Some(n) => format!("match_{}", n),
        None => format!("match_{}", short_hash(&[date, home, away])),
    };

    PendingRecord {
        id,
        text: format!("{}.", lines.join(". ")),
        metadata,
    }
}

/// Read every row of a match CSV.
pub fn read_matches(path: &Path) -> Result<Vec<MatchRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open match file: {}", path.display()))?;

    let mut rows = Vec::new();
    for (line, row) in reader.deserialize::<MatchRow>().enumerate() {
        match row {
            Ok(row) => rows.push(row),
            // Header is line 1, first data row line 2.
            Err(e) => warn!(line = line + 2, error = %e, "skipping malformed match row"),
        }
    }
    Ok(rows)
}

/// Integer view of a standings cell. Blank, `-`, and non-numeric cells read
/// as 0.
fn cell_int(row: &Value, key: &str) -> i64 {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn cell_str<'a>(row: &'a Value, key: &str) -> &'a str {
    row.get(key).and_then(Value::as_str).unwrap_or("Unknown")
}

fn league_slug(league: &str) -> String {
    league.trim().replace([' ', '-'], "_")
}

struct StandingRow<'a> {
    team: &'a str,
    position: i64,
    points: i64,
    played: i64,
    wins: i64,
    losses: i64,
    sets_for: i64,
    sets_against: i64,
}

impl<'a> StandingRow<'a> {
    fn from_value(row: &'a Value) -> Self {
        Self {
            team: cell_str(row, "Squadra"),
            position: cell_int(row, "Pos."),
            points: cell_int(row, "Punti"),
            played: cell_int(row, "PG"),
            wins: cell_int(row, "PV"),
            losses: cell_int(row, "PP"),
            sets_for: cell_int(row, "SF"),
            sets_against: cell_int(row, "SS"),
        }
    }
}

/// One record holding a whole league table, rows in position order.
pub fn league_standing_record(league: &str, rows: &[Value]) -> Option<PendingRecord> {
    if rows.is_empty() {
        return None;
    }
    let mut table: Vec<StandingRow> = rows.iter().map(StandingRow::from_value).collect();
    // Unknown positions sort last.
    table.sort_by_key(|r| if r.position > 0 { r.position } else { i64::MAX });

    let mut lines = vec![
        format!(
            "What are the {league} standings? Here is the current {league} table:"
        ),
        format!("Positions and points in {league}:"),
        String::new(),
    ];
    for r in &table {
        lines.push(format!(
            "{}. {} - {} points ({} wins, {} losses, sets {}-{})",
            r.position, r.team, r.points, r.wins, r.losses, r.sets_for, r.sets_against
        ));
    }

    let metadata = Metadata::new()
        .with("type", DocKind::Standing.as_str())
        .with("league", league)
        .with("num_teams", table.len() as i64)
        .with("leader", table.first().map(|r| r.team).unwrap_or_default());

    Some(PendingRecord {
        id: format!("standing_{}", league_slug(league)),
        text: lines.join("\n"),
        metadata,
    })
}

/// One record per team row.
pub fn team_standing_records(league: &str, rows: &[Value]) -> Vec<PendingRecord> {
    rows.iter()
        .map(StandingRow::from_value)
        .map(|r| {
            let diff = r.sets_for - r.sets_against;
            let diff = if diff > 0 {
                format!("+{}", diff)
            } else {
                diff.to_string()
            };
            let text = format!(
                "{} standings: {} is in position {} with {} points. \
                 Record: {} wins, {} losses in {} matches played. Sets: {}-{} (difference {})",
                league,
                r.team,
                r.position,
                r.points,
                r.wins,
                r.losses,
                r.played,
                r.sets_for,
                r.sets_against,
                diff
            );
            let metadata = Metadata::new()
                .with("type", DocKind::Standing.as_str())
                .with("league", league)
                .with("team", r.team)
                .with("position", r.position)
                .with("points", r.points)
                .with("wins", r.wins)
                .with("losses", r.losses)
                .with("played", r.played)
                .with("sets_for", r.sets_for)
                .with("sets_against", r.sets_against);
            PendingRecord {
                id: format!("standing_{}_{}", league_slug(league), r.position),
                text,
                metadata,
            }
        })
        .collect()
}

/// Read a standings file (`{league: [row, ...]}`) into records.
pub fn read_standings(path: &Path, config: &IndexingConfig) -> Result<Vec<PendingRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read standings file: {}", path.display()))?;
    let leagues: BTreeMap<String, Vec<Value>> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid standings JSON: {}", path.display()))?;

    let per_team = config.standings == "team";
    let mut records = Vec::new();
    for (league, rows) in &leagues {
        if per_team {
            records.extend(team_standing_records(league, rows));
        } else {
            records.extend(league_standing_record(league, rows));
        }
    }
    Ok(records)
}

/// Later records replace earlier ones with the same id.
fn dedup_by_id(records: Vec<PendingRecord>) -> Vec<PendingRecord> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut out: Vec<PendingRecord> = Vec::with_capacity(records.len());
    for record in records {
        match seen.get(&record.id) {
            Some(&i) => {
                warn!(id = %record.id, "duplicate record id in source; keeping the last one");
                out[i] = record;
            }
            None => {
                seen.insert(record.id.clone(), out.len());
                out.push(record);
            }
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub total: usize,
    pub unchanged: usize,
    pub embedded: usize,
}

/// Embed one batch, checking the provider returned a vector per text.
async fn embed_batch(
    batch: &[PendingRecord],
    embedder: &dyn EmbeddingProvider,
) -> Result<Vec<DocumentRecord>> {
    let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
    let vectors = embedder.embed_many(&texts).await?;
    if vectors.len() != batch.len() {
        bail!(
            "embedding provider returned {} vectors for {} texts",
            vectors.len(),
            batch.len()
        );
    }

    Ok(batch
        .iter()
        .zip(vectors)
        .map(|(r, embedding)| DocumentRecord {
            id: r.id.clone(),
            text: r.text.clone(),
            embedding,
            metadata: r.metadata.clone(),
        })
        .collect())
}

/// Embed and upsert `records`, skipping those whose content hash matches
/// the stored one unless `full`.
///
/// A full run embeds everything before touching the index and then swaps
/// the contents in one step, so a failed run leaves the previous index
/// serving.
pub async fn index_records(
    records: Vec<PendingRecord>,
    embedder: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    batch_size: usize,
    full: bool,
) -> Result<IndexReport> {
    let records = dedup_by_id(records);
    let total = records.len();
    let batch_size = batch_size.max(1);

    if full {
        let mut documents = Vec::with_capacity(total);
        for batch in records.chunks(batch_size) {
            documents.extend(embed_batch(batch, embedder).await?);
            debug!(embedded = documents.len(), total, "embedded batch");
        }
        index.replace_all(&documents, embedder.model_name()).await?;

        info!(total, embedded = documents.len(), "full rebuild complete");
        return Ok(IndexReport {
            total,
            unchanged: 0,
            embedded: documents.len(),
        });
    }

    let stored = index.content_hashes().await?;
    let pending: Vec<PendingRecord> = records
        .into_iter()
        .filter(|r| stored.get(&r.id) != Some(&content_hash(&r.text, &r.metadata)))
        .collect();
    let unchanged = total - pending.len();

    let mut embedded = 0;
    for batch in pending.chunks(batch_size) {
        let documents = embed_batch(batch, embedder).await?;
        index.upsert(&documents, embedder.model_name()).await?;
        embedded += documents.len();
        debug!(batch = documents.len(), embedded, "indexed batch");
    }

    info!(total, unchanged, embedded, "indexing complete");
    Ok(IndexReport {
        total,
        unchanged,
        embedded,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    pub matches: bool,
    pub standings: bool,
    pub full: bool,
    pub dry_run: bool,
}

/// Collect records from the configured source files. A missing file is
/// reported and skipped.
pub fn collect_records(config: &Config, opts: &IndexOptions) -> Result<(usize, usize, Vec<PendingRecord>)> {
    let indexing = &config.indexing;
    let mut records = Vec::new();

    let mut match_count = 0;
    if opts.matches {
        if indexing.matches_path.exists() {
            let rows = read_matches(&indexing.matches_path)?;
            match_count = rows.len();
            records.extend(rows.iter().map(|row| match_record(row, indexing)));
        } else {
            eprintln!(
                "Warning: match file not found: {}",
                indexing.matches_path.display()
            );
        }
    }

    let mut standing_count = 0;
    if opts.standings {
        if indexing.standings_path.exists() {
            let standings = read_standings(&indexing.standings_path, indexing)?;
            standing_count = standings.len();
            records.extend(standings);
        } else {
            eprintln!(
                "Warning: standings file not found: {}",
                indexing.standings_path.display()
            );
        }
    }

    Ok((match_count, standing_count, records))
}

pub async fn run_index(config: &Config, opts: IndexOptions) -> Result<()> {
    let (match_count, standing_count, records) = collect_records(config, &opts)?;

    if opts.dry_run {
        println!("index (dry-run)");
        println!("  match rows: {}", match_count);
        println!("  standing records: {}", standing_count);
        println!("  records: {}", records.len());
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Indexing requires embeddings. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let index = SqliteIndex::open(pool.clone()).await?;
    let embedder = embedding::create_provider(&config.embedding)?;

    let report = index_records(
        records,
        embedder.as_ref(),
        &index,
        config.embedding.batch_size,
        opts.full,
    )
    .await?;

    println!("index");
    println!("  match rows: {}", match_count);
    println!("  standing records: {}", standing_count);
    println!("  unchanged: {}", report.unchanged);
    println!("  embedded: {}", report.embedded);
    println!("  model: {}", embedder.model_name());
    println!("  records in index: {}", index.count().await?);
    println!("ok");

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryIndex, MetadataFilter};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    fn row(number: &str, home: &str, away: &str, result: &str, status: &str) -> MatchRow {
        MatchRow {
            number: Some(number.to_string()).filter(|s| !s.is_empty()),
            date: Some("18/01/2026".to_string()),
            home_team: Some(home.to_string()),
            away_team: Some(away.to_string()),
            result: Some(result.to_string()).filter(|s| !s.is_empty()),
            sets: None,
            venue: Some("PalaRM".to_string()),
            league: Some("UNDER 18 FEMMINILE".to_string()),
            status: Some(status.to_string()),
        }
    }

    #[test]
    fn test_match_record_tracked_away_team() {
        let config = IndexingConfig::default();
        let rec = match_record(
            &row("1234", "VOLLEY ROSSO", "RMVOLLEY#18", "1-3", "Gara omologata"),
            &config,
        );
        assert_eq!(rec.id, "match_1234");
        assert_eq!(rec.metadata.get_str("rm_team"), Some("RMVOLLEY#18"));
        assert_eq!(rec.metadata.get_str("opponent"), Some("VOLLEY ROSSO"));
        assert_eq!(rec.metadata.get_bool("is_home"), Some(false));
        assert_eq!(rec.metadata.get_str("team_category"), Some("Under 18 Women"));
        assert_eq!(rec.metadata.get_str("result"), Some("1-3"));
        assert!(rec.text.contains("RMVOLLEY#18 (Under 18 Women) won 1-3 against VOLLEY ROSSO"));
        assert!(rec.text.contains("Status: official result"));
    }

    #[test]
    fn test_scheduled_match_has_no_result() {
        let config = IndexingConfig::default();
        let rec = match_record(
            &row("77", "RM VOLLEY PIACENZA", "OTHER", "", "Da disputare"),
            &config,
        );
        assert_eq!(rec.metadata.get_str("result"), None);
        assert_eq!(rec.metadata.get_bool("is_home"), Some(true));
        assert!(rec.text.contains("Status: to be played"));
        assert!(!rec.text.contains("Final result"));
    }

    #[test]
    fn test_untracked_match_has_no_team_fields() {
        let rec = match_record(
            &row("9", "A", "B", "3-0", ""),
            &IndexingConfig::default(),
        );
        assert_eq!(rec.metadata.get_str("rm_team"), None);
        assert_eq!(rec.metadata.kind(), Some(DocKind::Match));
    }

    #[test]
    fn test_missing_number_gets_stable_hash_id() {
        let config = IndexingConfig::default();
        let a = match_record(&row("", "A", "B", "", ""), &config);
        let b = match_record(&row("", "A", "B", "", ""), &config);
        let c = match_record(&row("", "A", "C", "", ""), &config);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), "match_".len() + 12);
    }

    #[test]
    fn test_category_rules_in_order() {
        let rules = IndexingConfig::default().categories;
        assert_eq!(team_category("RMVOLLEY#16", &rules), Some("Under 16 Women"));
        assert_eq!(team_category("RM VOLLEY 13", &rules), Some("Under 14 Women"));
        assert_eq!(team_category("RMVOLLEY#2", &rules), Some("Second Division Women"));
        assert_eq!(team_category("RM VOLLEY PIACENZA", &rules), None);
    }

    #[test]
    fn test_league_standing_sorted_by_position() {
        let rows = vec![
            json!({"Pos.": "2", "Squadra": "RM VOLLEY PIACENZA", "Punti": 20}),
            json!({"Pos.": 1, "Squadra": "LEADERS", "Punti": "25", "PV": "-"}),
        ];
        let rec = league_standing_record("DF Gir. A", &rows).unwrap();
        assert_eq!(rec.id, "standing_DF_Gir._A");
        assert_eq!(rec.metadata.get_str("leader"), Some("LEADERS"));
        assert_eq!(rec.metadata.get_i64("num_teams"), Some(2));
        let leaders = rec.text.find("1. LEADERS - 25 points (0 wins").unwrap();
        let second = rec.text.find("2. RM VOLLEY PIACENZA").unwrap();
        assert!(leaders < second);
    }

    #[test]
    fn test_team_standing_records() {
        let rows = vec![json!({"Pos.": 3, "Squadra": "RMVOLLEY#16", "Punti": 12, "PG": 6,
                               "PV": 4, "PP": 2, "SF": 14, "SS": 9})];
        let recs = team_standing_records("U16 F", &rows);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].id, "standing_U16_F_3");
        assert_eq!(recs[0].metadata.get_i64("sets_for"), Some(14));
        assert!(recs[0].text.contains("(difference +5)"));
    }

    #[test]
    fn test_read_matches_csv_with_english_headers() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("m.csv");
        std::fs::write(
            &path,
            "match_number,date,home_team,away_team,result,league,status\n\
             5,01/02/2026,RM VOLLEY #16,X,,U16,Da disputare\n",
        )
        .unwrap();
        let rows = read_matches(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].number.as_deref(), Some("5"));
        assert_eq!(non_empty(&rows[0].result), None);
    }

    #[tokio::test]
    async fn test_incremental_indexing_skips_unchanged() {
        let config = IndexingConfig::default();
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
        };
        let index = InMemoryIndex::new();
        let records = vec![
            match_record(&row("1", "RM VOLLEY #18", "A", "3-0", ""), &config),
            match_record(&row("2", "RM VOLLEY #18", "B", "", "Da disputare"), &config),
        ];

        let first = index_records(records.clone(), &embedder, &index, 1, false)
            .await
            .unwrap();
        assert_eq!(first.embedded, 2);

        let mut changed = records.clone();
        changed[1] = match_record(&row("2", "RM VOLLEY #18", "B", "3-2", "Gara omologata"), &config);
        let second = index_records(changed, &embedder, &index, 8, false).await.unwrap();
        assert_eq!(second, IndexReport { total: 2, unchanged: 1, embedded: 1 });
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(index.count().await.unwrap(), 2);

        let full = index_records(records, &embedder, &index, 8, true).await.unwrap();
        assert_eq!(full.embedded, 2);
        let hits = index
            .search(&[1.0], 10, &MetadataFilter::kind(DocKind::Match))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    struct UnreachableEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnreachableEmbedder {
        fn model_name(&self) -> &str {
            "unreachable"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed_many(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_failed_full_rebuild_keeps_existing_records() {
        let config = IndexingConfig::default();
        let index = InMemoryIndex::new();
        let seeded = vec![match_record(&row("1", "RM VOLLEY #18", "A", "3-0", ""), &config)];
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
        };
        index_records(seeded, &embedder, &index, 8, false).await.unwrap();

        let records = vec![
            match_record(&row("1", "RM VOLLEY #18", "A", "3-0", ""), &config),
            match_record(&row("2", "RM VOLLEY #18", "B", "", "Da disputare"), &config),
        ];
        let err = index_records(records, &UnreachableEmbedder, &index, 1, true).await;

        assert!(err.is_err());
        assert_eq!(index.count().await.unwrap(), 1);
        assert!(index.content_hashes().await.unwrap().contains_key("match_1"));
    }

    #[tokio::test]
    async fn test_full_rebuild_drops_records_missing_from_sources() {
        let config = IndexingConfig::default();
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
        };
        let index = InMemoryIndex::new();
        let records = vec![
            match_record(&row("1", "RM VOLLEY #18", "A", "3-0", ""), &config),
            match_record(&row("2", "RM VOLLEY #18", "B", "", "Da disputare"), &config),
        ];
        index_records(records.clone(), &embedder, &index, 8, false)
            .await
            .unwrap();

        let report = index_records(records[1..].to_vec(), &embedder, &index, 8, true)
            .await
            .unwrap();

        assert_eq!(report, IndexReport { total: 1, unchanged: 0, embedded: 1 });
        let hashes = index.content_hashes().await.unwrap();
        assert_eq!(hashes.len(), 1);
        assert!(hashes.contains_key("match_2"));
    }

    #[test]
    fn test_dedup_keeps_last() {
        let rec = |id: &str, text: &str| PendingRecord {
            id: id.to_string(),
            text: text.to_string(),
            metadata: Metadata::new(),
        };
        let out = dedup_by_id(vec![rec("a", "old"), rec("b", "x"), rec("a", "new")]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "new");
    }
}
