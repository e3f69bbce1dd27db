use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use finsight::memory::ContextRequest;
use finsight::models::budget::budget_for;
use finsight::models::payload::NewDecision;
use finsight::models::profile::{ProfileUpdate, RiskTolerance, TradingStyle};
use finsight::models::semantic::Document;
use finsight::models::session::Role;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "finsight", about = "FinSight tiered memory for financial assistants")]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a query and print its intent, tiers and budget
    Classify {
        query: String,
    },
    /// Assemble context for a query from every relevant tier
    Context {
        query: String,
        #[arg(long)]
        session: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        run: Option<String>,
        /// Replace the intent's total token budget
        #[arg(long)]
        budget: Option<u32>,
        /// Print the rendered prompt block instead of JSON
        #[arg(long)]
        render: bool,
    },
    /// Append a conversation turn to the session
    Message {
        #[arg(long)]
        session: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "user")]
        role: Role,
        content: String,
        /// Also append the turn to the durable conversation log
        #[arg(long)]
        persist: bool,
    },
    /// Record a decision read as NewDecision JSON from a file or stdin
    Decision {
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Update a user's stored preferences
    Preferences {
        #[arg(long)]
        user: String,
        #[arg(long)]
        risk: Option<RiskTolerance>,
        #[arg(long)]
        style: Option<TradingStyle>,
        /// Comma-separated sector list
        #[arg(long, value_delimiter = ',')]
        sectors: Option<Vec<String>>,
        #[arg(long)]
        avg_position_size: Option<Decimal>,
    },
    /// Index Document JSON lines from a file or stdin
    Ingest {
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Index the session's recent turns as a memory for the user
    Remember {
        #[arg(long)]
        session: String,
        #[arg(long)]
        user: String,
    },
    /// Drop every cached tool result of a finished run
    FinishRun {
        run: String,
    },
}

fn read_input(path: Option<&str>) -> Result<String> {
    if let Some(path) = path {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read input: {path}"))
    } else {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read from stdin")?;
        Ok(buf)
    }
}

fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = finsight::load_config(cli.config.as_deref())?;
    let memory = finsight::build_memory(&config).context("Failed to build memory subsystem")?;

    let output = match cli.command {
        Command::Classify { query } => {
            let classification = memory.aggregator.classifier().classify(&query).await;
            let budget = budget_for(classification.intent);
            json!({ "classification": classification, "budget": budget })
        }
        Command::Context {
            query,
            session,
            user,
            run,
            budget,
            render,
        } => {
            let mut request = ContextRequest::new(&query, &session, &user);
            if let Some(run) = run {
                request = request.run_id(run);
            }
            if let Some(budget) = budget {
                request = request.budget_override(budget);
            }
            let context = memory.aggregator.get_context(&request).await?;
            if render {
                println!("{}", context.to_prompt_context());
                return Ok(());
            }
            serde_json::to_value(&context)?
        }
        Command::Message {
            session,
            user,
            role,
            content,
            persist,
        } => {
            memory
                .ingestor
                .store_message(&session, &user, role, &content, None)
                .await?;
            let log_id = if persist {
                Some(
                    memory
                        .ingestor
                        .persist_message(&user, Some(&session), role, &content, None)
                        .await?,
                )
            } else {
                None
            };
            json!({ "stored": true, "log_id": log_id })
        }
        Command::Decision { input } => {
            let raw = read_input(input.as_deref())?;
            let decision: NewDecision =
                serde_json::from_str(&raw).context("Failed to parse NewDecision JSON")?;
            let outcome = memory.ingestor.store_decision(&decision).await?;
            json!({
                "id": outcome.id,
                "version": outcome.version,
                "summaries_current": outcome.summaries_current,
            })
        }
        Command::Preferences {
            user,
            risk,
            style,
            sectors,
            avg_position_size,
        } => {
            let update = ProfileUpdate {
                risk_tolerance: risk,
                preferred_sectors: sectors,
                avg_position_size,
                trading_style: style,
                increment_decisions: false,
            };
            let version = memory.ingestor.update_preferences(&user, &update).await?;
            json!({ "user_id": user, "version": version })
        }
        Command::Ingest { input } => {
            let raw = read_input(input.as_deref())?;
            let mut chunk_ids = Vec::new();
            for (line_no, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let document: Document = serde_json::from_str(line)
                    .with_context(|| format!("Failed to parse Document on line {}", line_no + 1))?;
                chunk_ids.extend(memory.ingestor.ingest_document(document).await?);
            }
            json!({ "chunks": chunk_ids.len(), "ids": chunk_ids })
        }
        Command::Remember { session, user } => {
            let id = memory
                .ingestor
                .ingest_conversation_summary(&user, &session)
                .await?;
            json!({ "memory_id": id })
        }
        Command::FinishRun { run } => {
            let removed = memory.ingestor.finish_run(&run).await?;
            json!({ "run_id": run, "removed": removed })
        }
    };

    print_json(&output, cli.pretty)
}
