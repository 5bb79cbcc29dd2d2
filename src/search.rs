//! `recall search` and `recall context` entry points.
//!
//! Both build a [`Retriever`] over the SQLite store and the configured
//! provider. `search` prints ranked results with their per-signal scores;
//! `context` prints the assembled, token-budgeted context (or JSON).

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

use companion_recall_core::context::AssembledContext;
use companion_recall_core::search::{ContextOptions, Retriever, SearchMode, SearchOptions};
use companion_recall_core::store::SearchFilter;

use crate::config::Config;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// Maximum excerpt length, in characters, printed per result.
const EXCERPT_CHARS: usize = 200;

/// Filter flags shared by `search` and `context`.
#[derive(Debug, Clone, Default)]
pub struct FilterArgs {
    pub source: Option<String>,
    /// `YYYY-MM-DD`, inclusive.
    pub since: Option<String>,
    pub tag: Option<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> Result<SearchFilter> {
        Ok(SearchFilter {
            source: self.source.clone(),
            since: self.since.as_deref().map(parse_since).transpose()?,
            tag: self.tag.clone(),
        })
    }
}

/// Midnight UTC of a `YYYY-MM-DD` date.
pub fn parse_since(date: &str) -> Result<DateTime<Utc>> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{date}', expected YYYY-MM-DD"))?;
    Ok(day.and_time(chrono::NaiveTime::MIN).and_utc())
}

pub fn parse_mode(mode: Option<&str>) -> Result<Option<SearchMode>> {
    Ok(mode.map(str::parse::<SearchMode>).transpose()?)
}

pub async fn open_retriever(config: &Config) -> Result<(Arc<SqliteStore>, Retriever)> {
    let params = config.retrieval_params()?;
    let store = Arc::new(SqliteStore::open(config).await?);
    let provider = embedding::create_provider(&config.embedding)?;
    let retriever = Retriever::new(store.clone(), provider, params);
    Ok((store, retriever))
}

pub async fn run_search(
    config: &Config,
    query: &str,
    mode: Option<&str>,
    filter: &FilterArgs,
    limit: Option<usize>,
) -> Result<()> {
    let options = SearchOptions {
        mode: parse_mode(mode)?,
        top_k: limit,
        weights: None,
        filter: filter.to_filter()?,
    };

    let (store, retriever) = open_retriever(config).await?;
    let response = retriever.search(query, &options).await;
    store.pool().close().await;
    let response = response?;

    if response.degraded {
        eprintln!(
            "warning: hybrid search degraded to {} only",
            response.mode_used
        );
    }
    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in response.results.iter().enumerate() {
        let part = if result.document_id.is_some() {
            format!(" (part {})", result.chunk_index + 1)
        } else {
            String::new()
        };
        println!(
            "{}. [{:.4}] {} / {}{}",
            i + 1,
            result.fused_score,
            result.source,
            result.title,
            part
        );
        println!(
            "    vector: {}  keyword: {}",
            signal(result.vector_score, result.rank_vector),
            signal(result.keyword_score, result.rank_keyword)
        );
        println!("    excerpt: \"{}\"", excerpt(&result.content));
        println!("    id: {}", result.id);
        if let Some(document_id) = &result.document_id {
            println!("    document: {}", document_id);
        }
        println!();
    }
    Ok(())
}

pub async fn run_context(
    config: &Config,
    query: &str,
    mode: Option<&str>,
    filter: &FilterArgs,
    limit: Option<usize>,
    max_tokens: Option<usize>,
    json: bool,
) -> Result<()> {
    let options = ContextOptions {
        mode: parse_mode(mode)?,
        top_k: limit,
        max_tokens,
        filter: filter.to_filter()?,
    };

    let (store, retriever) = open_retriever(config).await?;
    let assembled = retriever.get_context(query, &options).await;
    store.pool().close().await;
    let assembled = assembled?;

    if json {
        println!("{}", serde_json::to_string_pretty(&assembled)?);
    } else {
        print_context(&assembled);
    }
    Ok(())
}

fn print_context(assembled: &AssembledContext) {
    let meta = &assembled.metadata;
    if !meta.has_results {
        println!("No results.");
        return;
    }

    println!("{}", assembled.context);
    println!();
    println!("--- Sources ---");
    for source in &assembled.sources {
        println!(
            "[{}] {} / {} ({:.4})",
            source.position, source.source, source.title, source.fused_score
        );
    }
    println!();
    println!(
        "used {}/{} results, ~{} tokens{}{}",
        meta.chunks_used,
        meta.chunks_found,
        meta.estimated_tokens,
        if meta.budget_exceeded { ", budget exceeded" } else { "" },
        if meta.degraded { ", degraded" } else { "" },
    );
}

fn signal(score: Option<f64>, rank: Option<usize>) -> String {
    match (score, rank) {
        (Some(score), Some(rank)) => format!("{score:.3} (#{rank})"),
        _ => "-".to_string(),
    }
}

fn excerpt(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}
