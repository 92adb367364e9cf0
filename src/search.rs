//! CLI front-ends for the retrieval commands: `search`, `ask`, `team`,
//! `league`. Each builds a [`RagService`] from config, runs one request, and
//! prints the outcome.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::models::{DocKind, ResultSet};
use crate::pipeline::{AskRequest, RagService};
use crate::retriever::TemporalScope;
use crate::store::MetadataFilter;

fn require_embeddings(config: &Config, command: &str) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!(
            "'{}' requires embeddings. Set [embedding] provider in config.",
            command
        );
    }
    Ok(())
}

fn parse_kind(kind: Option<&str>) -> Result<Option<DocKind>> {
    match kind {
        Some(k) => k.parse().map(Some).map_err(anyhow::Error::msg),
        None => Ok(None),
    }
}

fn print_results(results: &ResultSet) {
    if results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, item) in results.items.iter().enumerate() {
        let kind = item
            .metadata
            .kind()
            .map(|k| k.as_str())
            .unwrap_or("document");
        let league = item.metadata.get_str("league").unwrap_or("-");

        println!("{}. [{:.3}] {} / {}", i + 1, item.distance, kind, league);
        if let Some(date) = item.metadata.get_str("date") {
            println!("    date: {}", date);
        }
        if let Some(team) = item.metadata.get_str("rm_team") {
            println!("    team: {}", team);
        }
        let excerpt: String = item.document.replace('\n', " ").chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.trim());
        println!("    id: {}", item.id);
        println!();
    }
}

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    kind: Option<&str>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    let filter = parse_kind(kind)?
        .map(MetadataFilter::kind)
        .unwrap_or_default();
    require_embeddings(config, "search")?;

    let service = RagService::from_config(config).await?;
    let k = service.resolve_n_results(Some(limit.unwrap_or(5)))?;
    let results = service.retriever().retrieve(query, k, &filter).await?;
    print_results(&results);
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    question: &str,
    limit: Option<usize>,
    temperature: Option<f32>,
    kind: Option<&str>,
    context_only: bool,
) -> Result<()> {
    require_embeddings(config, "ask")?;
    let request = AskRequest {
        question: question.to_string(),
        n_results: limit,
        temperature,
        filter_type: parse_kind(kind)?,
    };
    let service = RagService::from_config(config).await?;

    if context_only {
        let prepared = service.prepare(&request).await?;
        println!("plan: {}", serde_json::to_string(&prepared.plan)?);
        println!("records: {}", prepared.results.len());
        println!();
        if prepared.context.is_empty() {
            println!("(empty context)");
        } else {
            println!("{}", prepared.context);
        }
        return Ok(());
    }

    let response = service.ask(&request).await?;
    println!("{}", response.answer.trim());
    println!();
    println!("sources: {}", response.sources.len());
    for source in &response.sources {
        let id = source
            .get_str("match_id")
            .filter(|m| !m.is_empty())
            .map(|m| format!("match {}", m))
            .or_else(|| source.get_str("league").map(|l| format!("standings {}", l)))
            .unwrap_or_else(|| "record".to_string());
        println!("  - {}", id);
    }
    Ok(())
}

pub async fn run_team(
    config: &Config,
    name: &str,
    limit: Option<usize>,
    played: bool,
    upcoming: bool,
) -> Result<()> {
    require_embeddings(config, "team")?;
    let scope = TemporalScope::from_flags(played, upcoming)?;
    let service = RagService::from_config(config).await?;
    let k = limit.unwrap_or(10);
    let results = service.retriever().retrieve_team(name, k, scope).await?;
    print_results(&results);
    Ok(())
}

pub async fn run_league(config: &Config, name: &str, limit: Option<usize>) -> Result<()> {
    require_embeddings(config, "league")?;
    let service = RagService::from_config(config).await?;
    let k = limit.unwrap_or(10);
    let results = service.retriever().retrieve_by_league(name, k).await?;
    print_results(&results);
    Ok(())
}
