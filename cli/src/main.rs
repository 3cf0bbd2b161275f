//! Promptloom CLI
//!
//! Organizes a growing corpus of prompts into families and canonical
//! templates: dedup on ingest, periodic full clustering, incremental
//! assignment, and threshold-triggered template extraction.
//!
//! Commands:
//! - promptloom add "Write a python script to ..."
//! - promptloom ingest --source file prompts.txt
//! - promptloom run [--limit N]
//! - promptloom full-classify
//! - promptloom classify-worker [--interval M] [--batch-size N]
//! - promptloom ingest-worker [--interval M]
//! - promptloom prompts | families | family <id> | template <id> | evolve <id> | stats

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use promptloom_core::types::TickMode;
use promptloom_core::Config;
use promptloom_engine::template::builder::CanonicalTemplate;
use promptloom_engine::template::render::param_schema;
use promptloom_engine::{
    CachedEmbedder, CancelFlag, ClassifyWorker, Embedder, FamilyNamer, HashEmbedder, HttpEmbedder,
    ProviderWithFallback, TemplateEngine,
};
use promptloom_ingest::{add_and_classify, read_file, IngestOutcome, IngestWorker, Ingestor, LogExportClient};
use promptloom_store::Database;

#[derive(Parser)]
#[command(name = "promptloom")]
#[command(about = "Prompt corpus classification and templating")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dedup and store a single prompt; assigns a family once bootstrapped
    Add {
        /// Prompt text
        text: String,
    },

    /// Bulk ingest with dedup
    Ingest {
        /// Path to the import file (txt, csv, json, jsonl)
        path: Option<String>,

        /// Source type: file or export
        #[arg(long, default_value = "file")]
        source: String,
    },

    /// One-shot processing of pending prompts
    Run {
        /// Maximum pending prompts to process
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Force a full clustering pass
    FullClassify,

    /// Start the incremental-assignment worker loop
    ClassifyWorker {
        /// Tick interval in minutes
        #[arg(long)]
        interval: Option<u64>,

        /// Minimum pending prompts per tick
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Start the log-export ingestion worker loop
    IngestWorker {
        /// Tick interval in minutes
        #[arg(long, default_value = "10")]
        interval: u64,
    },

    /// Null out all stored embeddings (for an embedding model change)
    ClearEmbeddings {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Run the template engine across all families
    UpdateTemplates,

    /// List recent prompts
    Prompts {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List families
    Families {
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Output format: table or json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Inspect one family
    Family {
        /// Family id
        id: String,
    },

    /// Show a family's active template
    Template {
        /// Family id
        id: String,

        /// Extract a template now if none exists
        #[arg(long)]
        extract: bool,
    },

    /// Trace a prompt's evolution chain
    Evolve {
        /// Prompt id
        id: String,
    },

    /// Corpus statistics
    Stats {
        /// Output format: table or json
        #[arg(long, default_value = "table")]
        format: String,
    },
}

/// Shared handles built once per invocation.
struct App {
    config: Config,
    db: Arc<Database>,
    embedder: Arc<dyn Embedder>,
    provider: Arc<ProviderWithFallback>,
    namer: Arc<FamilyNamer>,
}

impl App {
    fn new() -> Result<Self> {
        let config = Config::from_env();
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

        let db = Arc::new(Database::open(config.db_path())?);

        let embedder: Arc<dyn Embedder> = match config.embedding_endpoint {
            Some(ref endpoint) => Arc::new(CachedEmbedder::new(
                HttpEmbedder::new(
                    endpoint.clone(),
                    config.embedding_api_key.clone(),
                    config.embedding_model.clone(),
                    config.embedding_dim,
                )?,
                config.cache_dir.clone(),
            )),
            None => Arc::new(CachedEmbedder::new(
                HashEmbedder::new(config.embedding_dim),
                config.cache_dir.clone(),
            )),
        };

        let provider = Arc::new(ProviderWithFallback::from_config(&config));
        let namer = Arc::new(FamilyNamer::from_config(&config));

        Ok(Self {
            config,
            db,
            embedder,
            provider,
            namer,
        })
    }

    fn worker(&self) -> ClassifyWorker {
        ClassifyWorker::new(
            self.db.clone(),
            self.embedder.clone(),
            self.namer.clone(),
            self.provider.clone(),
            self.config.clone(),
        )
    }

    fn template_engine(&self) -> TemplateEngine {
        TemplateEngine::new(self.db.clone(), self.provider.clone())
    }

    fn export_client(&self) -> Result<LogExportClient> {
        let base_url = self
            .config
            .export_base_url
            .clone()
            .context("PROMPTLOOM_EXPORT_BASE_URL is not configured")?;
        let api_key = self
            .config
            .export_api_key
            .clone()
            .context("PROMPTLOOM_EXPORT_API_KEY is not configured")?;
        Ok(LogExportClient::new(
            base_url,
            api_key,
            self.config.export_poll_secs,
        )?)
    }
}

/// Cancel flag wired to Ctrl+C.
fn cancel_on_ctrl_c() -> CancelFlag {
    let cancel = CancelFlag::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            signal.cancel();
        }
    });
    cancel
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("promptloom=info".parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let app = App::new()?;

    match cli.command {
        Commands::Add { text } => {
            let result =
                add_and_classify(&app.db, app.embedder.as_ref(), &app.config, &text, None).await?;
            match result.outcome {
                IngestOutcome::Saved(prompt) => {
                    println!("Added prompt {}", prompt.prompt_id);
                    match result.assigned {
                        Some((family_id, similarity)) => {
                            println!("Assigned to family {} (similarity {:.2})", family_id, similarity);
                        }
                        None => println!("Pending classification; run 'promptloom run' or the worker."),
                    }
                }
                IngestOutcome::ExactDuplicate { prompt_id } => {
                    println!("Exact duplicate of {}; not stored", prompt_id);
                }
                IngestOutcome::NearDuplicate { prompt_id, distance } => {
                    println!(
                        "Near duplicate of {} (Hamming distance {}); not stored",
                        prompt_id, distance
                    );
                }
                IngestOutcome::Empty => bail!("Prompt is empty after normalization"),
            }
        }

        Commands::Ingest { path, source } => {
            let report = match source.as_str() {
                "file" => {
                    let path = path.context("ingest --source file requires a path")?;
                    let records = read_file(std::path::Path::new(&path))?;
                    println!("Ingesting {} records from {}", records.len(), path);
                    let mut ingestor = Ingestor::new(app.db.clone(), app.config.hamming_threshold)?;
                    ingestor.ingest_many(&records)?
                }
                "export" | "portkey" => {
                    let client = app.export_client()?;
                    let cancel = cancel_on_ctrl_c();
                    let since = chrono::Utc::now() - chrono::Duration::hours(24);
                    let records = client.fetch_logs(since, &cancel).await?;
                    println!("Ingesting {} exported records", records.len());
                    let mut ingestor = Ingestor::new(app.db.clone(), app.config.hamming_threshold)?;
                    ingestor.ingest_many(&records)?
                }
                other => bail!("Unknown source '{}'; expected file or export", other),
            };
            println!(
                "Done: saved={} exact_duplicates={} near_duplicates={}",
                report.saved, report.exact_duplicates, report.near_duplicates
            );
        }

        Commands::Run { limit } => {
            let worker = app.worker();
            let cancel = cancel_on_ctrl_c();
            let stats = worker.run_tick(&cancel, true, Some(limit)).await?;
            match stats.mode {
                TickMode::FullClassification => {
                    println!("Bootstrap: full clustering pass");
                    println!("  Clusters: {}", stats.clusters_created);
                }
                _ => println!("Processed {} pending prompts", stats.processed),
            }
            println!("  Assigned: {}", stats.assigned);
            println!("  Unclustered: {}", stats.unclustered);
            println!("  Templates updated: {}", stats.templates_updated);
        }

        Commands::FullClassify => {
            let worker = app.worker();
            let stats = worker.full_clusterer().run().await?;
            let templates = app.template_engine().sweep(false).await?;
            println!("Full classification complete");
            println!("  Total prompts: {}", stats.total_prompts);
            println!("  Newly embedded: {}", stats.embedded);
            println!("  Clusters: {}", stats.clusters_created);
            println!("  Assigned: {}", stats.assigned);
            println!("  Unclustered: {}", stats.unclustered);
            println!("  Templates updated: {}", templates);
        }

        Commands::ClassifyWorker {
            interval,
            batch_size,
        } => {
            let mut config = app.config.clone();
            if let Some(minutes) = interval {
                config.tick_interval_secs = minutes * 60;
            }
            if let Some(batch) = batch_size {
                config.batch_size = batch;
            }
            let worker = ClassifyWorker::new(
                app.db.clone(),
                app.embedder.clone(),
                app.namer.clone(),
                app.provider.clone(),
                config,
            );
            let cancel = cancel_on_ctrl_c();
            worker.run_loop(cancel).await;
        }

        Commands::IngestWorker { interval } => {
            let client = app.export_client()?;
            let worker = IngestWorker::new(
                app.db.clone(),
                client,
                app.config.state_path(),
                app.config.hamming_threshold,
                Duration::from_secs(interval * 60),
            );
            let cancel = cancel_on_ctrl_c();
            worker.run_loop(cancel).await;
        }

        Commands::ClearEmbeddings { yes } => {
            if !yes {
                print!("This nulls every stored embedding. Type 'yes' to confirm: ");
                std::io::stdout().flush()?;
                let mut line = String::new();
                std::io::stdin().read_line(&mut line)?;
                if line.trim() != "yes" {
                    bail!("Aborted");
                }
            }
            let cleared = app.db.clear_embeddings()?;
            println!("Cleared {} embeddings", cleared);
        }

        Commands::UpdateTemplates => {
            let updated = app.template_engine().sweep(false).await?;
            println!("Templates created or updated: {}", updated);
        }

        Commands::Prompts { limit } => {
            let prompts = app.db.latest_prompts(limit)?;
            if prompts.is_empty() {
                println!("No prompts found");
                return Ok(());
            }
            println!("{} prompts:", prompts.len());
            for p in prompts {
                println!(
                    "{}  {}  {}",
                    p.prompt_id,
                    p.created_at,
                    truncate(&p.original_text, 70)
                );
            }
        }

        Commands::Families { limit, format } => {
            let mut families = app.db.all_families()?;
            families.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            families.truncate(limit);

            if families.is_empty() {
                println!("No families yet; ingest prompts and run 'promptloom full-classify'");
                return Ok(());
            }

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&families)?);
            } else {
                println!("{:<38} {:<28} {:>8} {:>8}", "ID", "Name", "Members", "Version");
                for f in &families {
                    println!(
                        "{:<38} {:<28} {:>8} {:>8}",
                        f.family_id,
                        truncate(&f.family_name, 26),
                        f.member_count,
                        f.version
                    );
                }
            }
        }

        Commands::Family { id } => {
            let family = app
                .db
                .get_family(&id)?
                .with_context(|| format!("Family {} not found", id))?;
            let members = app.db.prompts_by_family(&id)?;
            let template = app.db.active_template(&id)?;

            println!("Family: {}", family.family_name);
            println!("  ID: {}", family.family_id);
            println!("  Members: {}", family.member_count);
            if let Some(ref description) = family.description {
                println!("  Description: {}", description);
            }
            println!("  Version: {}", family.version);
            println!("  Created: {}", family.created_at);

            if let Some(template) = template {
                println!("\nActive template (v{}):", template.version_string());
                println!("  {}", template.template_text);
            }

            println!("\nMember prompts ({}):", members.len());
            for (i, member) in members.iter().take(10).enumerate() {
                println!("  {}. {}", i + 1, truncate(&member.original_text, 70));
            }
            if members.len() > 10 {
                println!("  ... and {} more", members.len() - 10);
            }
        }

        Commands::Template { id, extract } => {
            let family = app
                .db
                .get_family(&id)?
                .with_context(|| format!("Family {} not found", id))?;

            let mut template = app.db.active_template(&id)?;
            if template.is_none() {
                if extract {
                    println!("Extracting template...");
                    app.template_engine().process_family(&id, true).await?;
                    template = app.db.active_template(&id)?;
                } else {
                    bail!(
                        "Family {} has no template yet; re-run with --extract",
                        id
                    );
                }
            }
            let template =
                template.with_context(|| format!("Family {} has no extractable template", id))?;

            println!("Template for family: {}", family.family_name);
            println!("  ID: {}", template.template_id);
            println!("  Version: {}", template.version_string());
            if template.is_refined {
                println!("  Refined: yes");
            }
            println!("\n  {}", template.template_text);

            if !template.slots.is_empty() {
                println!("\nSlots:");
                for slot in &template.slots {
                    let examples = slot
                        .examples
                        .iter()
                        .take(2)
                        .map(|e| e.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    println!(
                        "  {{{{{}}}}}  type={}  examples=[{}]",
                        slot.name,
                        slot.slot_type.as_str(),
                        examples
                    );
                }

                let canonical = CanonicalTemplate {
                    text: template.template_text.clone(),
                    slots: template.slots.clone(),
                };
                println!("\nParameter schema:");
                println!("{}", serde_json::to_string_pretty(&param_schema(&canonical))?);
            }

            let chain = app.db.template_chain(&id)?;
            if chain.len() > 1 {
                println!("\nVersion chain:");
                for entry in &chain {
                    println!(
                        "  v{}  {}  {}",
                        entry.version_string(),
                        if entry.is_active { "active" } else { "retired" },
                        entry.created_at
                    );
                }
            }
        }

        Commands::Evolve { id } => {
            let prompt = app
                .db
                .get_prompt(&id)?
                .with_context(|| format!("Prompt {} not found", id))?;

            println!("Evolution chain for {}", id);
            println!("  Text: {}", truncate(&prompt.original_text, 70));
            match prompt.family_id {
                Some(ref family_id) => println!("  Family: {}", family_id),
                None => println!("  Family: not assigned"),
            }

            let chain = app.db.lineage_chain(&id)?;
            if chain.len() <= 1 {
                println!("  No lineage recorded");
                return Ok(());
            }
            println!("\nChain:");
            for entry in chain {
                let mutation = entry
                    .mutation
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  [{:?}] {}  mutation={}  confidence={:.2}",
                    entry.direction, entry.prompt_id, mutation, entry.confidence
                );
            }
        }

        Commands::Stats { format } => {
            let total_prompts = app.db.prompt_count()?;
            let pending = app.db.pending_count()?;
            let classified = app.db.classified_count()?;
            let families = app.db.all_families()?;
            let total_templates = app.db.template_count()?;
            let total_lineage = app.db.lineage_count()?;
            let last_ingestion = app
                .db
                .latest_prompts(1)?
                .first()
                .map(|p| p.created_at.clone());

            let average = if families.is_empty() {
                0.0
            } else {
                families.iter().map(|f| f.member_count).sum::<i64>() as f64 / families.len() as f64
            };

            let stats = promptloom_core::types::CorpusStats {
                total_prompts,
                pending_prompts: pending,
                classified_prompts: classified,
                total_families: families.len() as u64,
                average_family_size: average,
                total_templates,
                total_lineage_edges: total_lineage,
                last_ingestion,
            };

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Prompts:");
                println!("  Total: {}", stats.total_prompts);
                println!("  Pending: {}", stats.pending_prompts);
                println!("  Classified: {}", stats.classified_prompts);
                println!("Families:");
                println!("  Total: {}", stats.total_families);
                println!("  Average size: {:.2}", stats.average_family_size);
                println!("Templates:");
                println!("  Extracted: {}", stats.total_templates);
                println!("Lineage edges: {}", stats.total_lineage_edges);
                if let Some(last) = stats.last_ingestion {
                    println!("Last ingestion: {}", last);
                }
            }
        }
    }

    Ok(())
}
