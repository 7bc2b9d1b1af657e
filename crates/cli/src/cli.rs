//! Command-line argument parsing for schoolintel.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Operational tooling for the school intelligence lookup cache.
#[derive(Parser, Debug)]
#[command(name = "schoolintel")]
#[command(about = "Inspect and maintain the school intelligence lookup cache")]
#[command(version)]
pub struct Cli {
    /// TOML config file (overrides SCHOOLINTEL_CONFIG_FILE)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Show cache health statistics
    Stats,

    /// Delete expired entries and stale verifications, then compact
    ClearExpired,

    /// Read an entry (counts as a hit)
    Get {
        /// School or trust name
        entity: String,
        /// Data kind, e.g. ofsted, financial, contacts
        kind: String,
    },

    /// List every stored entry for a school without counting hits
    Inspect {
        /// School or trust name
        entity: String,
    },

    /// Store an entry
    Set {
        /// School or trust name
        entity: String,
        /// Data kind, e.g. ofsted, financial, contacts
        kind: String,
        /// Payload as JSON text
        payload: String,
        /// Source URL; repeat for several
        #[arg(long = "url", value_name = "URL")]
        urls: Vec<String>,
        /// Lifetime in hours (defaults to the configured TTL)
        #[arg(long)]
        ttl_hours: Option<i64>,
    },

    /// Read a verification outcome
    VerifyGet {
        identifier: String,
        /// Identifier type, e.g. phone or email
        identifier_type: String,
    },

    /// Record a verification outcome
    VerifySet {
        identifier: String,
        /// Identifier type, e.g. phone or email
        identifier_type: String,
        /// true or false
        #[arg(action = ArgAction::Set)]
        is_valid: bool,
        /// Confidence between 0 and 1
        confidence: f64,
        /// Extra details as JSON text
        #[arg(long)]
        details: Option<String>,
    },
}
