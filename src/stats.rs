//! Index statistics.
//!
//! Summarises what is indexed: record counts per kind, which embedding
//! models produced the vectors, and when the index was last written. Used by
//! `vrag stats` to confirm an indexing run did what it should.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::store::{SqliteIndex, VectorIndex};

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let index = SqliteIndex::open(pool.clone()).await?;

    let total = index.count().await?;
    let by_kind = index.count_by_kind().await?;
    let models = index.models().await?;
    let last_indexed = index.last_indexed_at().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("vrag index stats");
    println!("================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Records:     {}", total);
    for (kind, n) in &by_kind {
        println!("    {:<10} {:>6}", kind, n);
    }
    println!(
        "  Last index:  {}",
        match last_indexed {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        }
    );

    if !models.is_empty() {
        println!();
        println!("  By model:");
        println!("  {:<32} {:>6} {:>8}", "MODEL", "DIMS", "RECORDS");
        println!("  {}", "-".repeat(48));
        for (model, dims, n) in &models {
            println!("  {:<32} {:>6} {:>8}", model, dims, n);
        }
        if models.len() > 1 {
            eprintln!(
                "Warning: index holds vectors from {} models; only records matching the query model's dimension are searchable.",
                models.len()
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
