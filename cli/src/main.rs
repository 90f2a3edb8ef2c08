use std::fs;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use revledger_kernel::codec::{CompactJsonCodec, PayloadCodec};
use revledger_kernel::config::{SchemaVersion, SessionConfig};
use revledger_kernel::hash::{AlphabetEncoder, Base64UrlEncoder, ContentHasher, DigestEncoder};
use revledger_kernel::record::Payload;
use revledger_kernel::store::{InMemoryWarehouse, Row};
use revledger_kernel::LedgerSession;

/// Revledger CLI
#[derive(Parser, Debug)]
#[command(name = "revledger")]
#[command(about = "Versioned JSON ledger (dry-run against an in-memory warehouse)", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Buffer mutations from a file and commit them under one revision
    Commit {
        /// Target dataset
        #[arg(long)]
        dataset: String,

        /// Path to a JSON array of mutations
        #[arg(long)]
        input: String,

        /// Path to session config JSON
        #[arg(long)]
        config: Option<String>,

        /// Dataset location (US or EU)
        #[arg(long)]
        location: Option<String>,

        /// Positive partition key
        #[arg(long)]
        partition: Option<i64>,

        /// Payload schema version
        #[arg(long)]
        schema_version: Option<String>,

        #[arg(long, value_enum, default_value_t = EncoderKind::Base62)]
        encoder: EncoderKind,

        /// Include committed rows in the output
        #[arg(long)]
        rows: bool,
    },

    /// Print the content hash of a single record
    Hash {
        #[arg(long)]
        uid: String,

        /// Payload as a JSON object
        #[arg(long)]
        json: String,

        #[arg(long)]
        parent_uid: Option<String>,

        #[arg(long, default_value = "1.0.0")]
        schema_version: String,

        #[arg(long, value_enum, default_value_t = EncoderKind::Base62)]
        encoder: EncoderKind,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EncoderKind {
    Base62,
    Base64url,
}

impl EncoderKind {
    fn build(self) -> Box<dyn DigestEncoder> {
        match self {
            EncoderKind::Base62 => Box::new(AlphabetEncoder::base62()),
            EncoderKind::Base64url => Box::new(Base64UrlEncoder),
        }
    }
}

/// One line of the mutation file.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Mutation {
    Add {
        table: String,
        uid: String,
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        parent_uid: Option<String>,
    },
    Delete {
        table: String,
        uid: String,
    },
}

#[derive(Debug, Serialize)]
struct TableOutput {
    table: String,
    rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    committed: Option<Vec<Row>>,
}

#[derive(Debug, Serialize)]
struct CommitOutput {
    dataset: String,
    revision: u64,
    tables: Vec<TableOutput>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Command::Commit {
            dataset,
            input,
            config,
            location,
            partition,
            schema_version,
            encoder,
            rows,
        } => {
            // ----------------------------
            // Load config
            // ----------------------------
            let config = match config {
                Some(path) => {
                    let data = fs::read_to_string(&path)
                        .with_context(|| format!("reading config {path}"))?;
                    SessionConfig::from_json(&data)?
                }
                None => SessionConfig::default(),
            };

            let store = InMemoryWarehouse::new();
            let mut session = LedgerSession::with_config(store.clone(), config);
            if let Some(location) = location {
                session.set_location(&location)?;
            }
            if let Some(partition) = partition {
                session.set_partition(partition)?;
            }
            if let Some(version) = schema_version {
                session.set_version(&version)?;
            }
            session.set_encoder(encoder.build());

            // ----------------------------
            // Load mutations
            // ----------------------------
            let data = fs::read_to_string(&input)
                .with_context(|| format!("reading mutations {input}"))?;
            let mutations: Vec<Mutation> = serde_json::from_str(&data)?;

            // ----------------------------
            // Run session
            // ----------------------------
            session.start(&dataset)?;
            for mutation in mutations {
                match mutation {
                    Mutation::Add {
                        table,
                        uid,
                        payload,
                        parent_uid,
                    } => session.add(&table, &uid, payload, parent_uid.as_deref())?,
                    Mutation::Delete { table, uid } => session.delete(&table, &uid),
                }
            }
            let report = session.flush()?;

            // ----------------------------
            // Output
            // ----------------------------
            let output = CommitOutput {
                dataset: dataset.clone(),
                revision: report.revision.get(),
                tables: report
                    .tables
                    .into_iter()
                    .map(|t| TableOutput {
                        committed: rows.then(|| store.rows(&dataset, &t.table)),
                        table: t.table,
                        rows: t.rows,
                    })
                    .collect(),
            };

            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Hash {
            uid,
            json,
            parent_uid,
            schema_version,
            encoder,
        } => {
            let version = SchemaVersion::parse(&schema_version)?;
            let payload = Payload::from_value(serde_json::from_str(&json)?)?;
            let json = CompactJsonCodec.encode(&payload)?;

            let hasher = ContentHasher::new(encoder.build());
            let hash = hasher.digest(&uid, parent_uid.as_deref(), version.as_str(), &json);
            println!("{hash}");
        }
    }

    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
