//! Subcommand execution and output rendering.

use std::fmt::Write as _;

use schoolintel_core::{CacheStats, LookupCache};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::cli::Command;

/// Errors in arguments that clap cannot check.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{field} is not valid JSON: {source}")]
    InvalidJson {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),
}

fn parse_json(field: &'static str, raw: &str) -> Result<Value, CliError> {
    serde_json::from_str(raw).map_err(|source| CliError::InvalidJson { field, source })
}

fn render_json<T: Serialize>(value: &T) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Run one subcommand and return what should be printed on stdout.
pub async fn run(cache: &LookupCache, command: &Command, json: bool) -> Result<String, CliError> {
    match command {
        Command::Stats => {
            let stats = cache.get_stats().await;
            if json { render_json(&stats) } else { Ok(render_stats(&stats)) }
        }
        Command::ClearExpired => {
            let sweep = cache.clear_expired().await;
            let stats = cache.get_stats().await;
            if json {
                render_json(&serde_json::json!({ "sweep": sweep, "stats": stats }))
            } else {
                Ok(format!(
                    "removed {} expired entries and {} stale verifications\n{}",
                    sweep.entries_removed,
                    sweep.verifications_removed,
                    render_stats(&stats)
                ))
            }
        }
        Command::Get { entity, kind } => match cache.get(entity, kind).await {
            Some(hit) if json => render_json(&hit),
            Some(hit) => Ok(format!(
                "{}\nsources: {}\nexpires: {}\nhits: {}",
                serde_json::to_string_pretty(&hit.data)?,
                hit.source_urls.join(", "),
                hit.expires_at.to_rfc3339(),
                hit.hit_count
            )),
            None if json => Ok("null".into()),
            None => Ok("miss".into()),
        },
        Command::Inspect { entity } => {
            let entries = cache.entries_for(entity).await;
            if json {
                return render_json(&entries);
            }
            if entries.is_empty() {
                return Ok(format!("no entries for {entity}"));
            }
            let mut out = String::new();
            for entry in &entries {
                let _ = writeln!(
                    out,
                    "{:<14} hits={:<4} expires={} key={}",
                    entry.data_kind,
                    entry.hit_count,
                    entry.expires_at.to_rfc3339(),
                    &entry.key[..12]
                );
            }
            Ok(out.trim_end().to_string())
        }
        Command::Set { entity, kind, payload, urls, ttl_hours } => {
            let payload = parse_json("payload", payload)?;
            cache.set(entity, kind, &payload, urls, *ttl_hours).await;
            Ok("ok".into())
        }
        Command::VerifyGet { identifier, identifier_type } => {
            match cache.get_verification(identifier, identifier_type).await {
                Some(entry) if json => render_json(&entry),
                Some(entry) => Ok(format!(
                    "valid: {}\nconfidence: {:.2}\nverified: {}",
                    entry.is_valid,
                    entry.confidence_score,
                    entry.verified_at.to_rfc3339()
                )),
                None if json => Ok("null".into()),
                None => Ok("miss".into()),
            }
        }
        Command::VerifySet { identifier, identifier_type, is_valid, confidence, details } => {
            let details = details.as_deref().map(|raw| parse_json("details", raw)).transpose()?;
            cache
                .set_verification(identifier, identifier_type, *is_valid, *confidence, details.as_ref())
                .await;
            Ok("ok".into())
        }
    }
}

fn render_stats(stats: &CacheStats) -> String {
    if !stats.enabled {
        return "cache disabled".into();
    }
    if let Some(error) = &stats.error {
        return format!("cache error: {error}");
    }
    let Some(s) = &stats.summary else {
        return "no statistics".into();
    };

    let mut out = String::new();
    let _ = writeln!(
        out,
        "entries:       {} active / {} expired / {} total",
        s.active_entries, s.expired_entries, s.total_entries
    );
    let _ = writeln!(out, "hits:          {} total, {:.2} avg, {} max", s.total_hits, s.average_hits, s.max_hits);
    let _ = writeln!(out, "hit rate:      {:.1}% (smoothed)", s.hit_rate * 100.0);
    let _ = writeln!(out, "verifications: {}", s.verification_entries);
    let _ = write!(out, "size:          {} MB", s.cache_size_mb);
    out
}
