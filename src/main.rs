mod blocklist;
mod cascade;
mod config;
mod db;
mod dedup;
mod error;
mod fetch;
mod geo;
mod models;
mod parse;
mod run;
mod similarity;
mod source;
#[cfg(test)]
mod testing;
mod voyager;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use db::{Database, GeoStore};
use models::{BlocklistKind, SearchParams, TimeWindow, WorkplaceType};
use similarity::{ContentComparator, LevenshteinComparator};
use source::ListingSource;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voyager::VoyagerClient;

use crate::blocklist::Blocklist;
use crate::config::{SessionConfig, Settings};
use crate::run::RunCoordinator;

#[derive(Parser)]
#[command(name = "sweep")]
#[command(about = "Triage job listings - dismiss what you will never apply to, once")]
struct Cli {
    /// Database path (defaults to the user data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// File holding the session Cookie header
    #[arg(long, global = true, default_value = "~/.sweep_cookie.txt")]
    cookie_file: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Search, classify, and dismiss listings
    Run {
        /// Search keywords
        #[arg(short, long, default_value = "")]
        keywords: String,

        /// Place name, or "worldwide"
        #[arg(short, long, default_value = "Canada")]
        location: String,

        /// Posted-within window
        #[arg(short, long, value_enum, default_value = "all")]
        time: TimeWindow,

        /// Maximum listings to scan (0 = everything available)
        #[arg(short = 'n', long, default_value = "0")]
        limit: usize,

        /// Only easy-apply listings
        #[arg(long)]
        easy_apply: bool,

        /// Sort by relevance instead of recency
        #[arg(long)]
        relevant: bool,

        /// Workplace types (comma separated)
        #[arg(short, long, value_enum, value_delimiter = ',')]
        workplace: Vec<WorkplaceType>,

        /// Extra title keywords to dismiss for this run (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        dismiss: Vec<String>,

        /// Extra companies to dismiss for this run (slug or company URL, comma separated)
        #[arg(short = 'c', long, value_delimiter = ',')]
        block_company: Vec<String>,

        /// Skip description comparison for near-duplicates
        #[arg(long)]
        no_compare: bool,
    },

    /// Restore dismissed listings
    Undo {
        /// Listing ID
        #[arg(long, conflicts_with = "title")]
        id: Option<String>,

        /// Restore every recorded listing whose title contains this text
        #[arg(long)]
        title: Option<String>,
    },

    /// Show dismissed listings, newest first
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(short, long, default_value = "0")]
        offset: usize,
    },

    /// Manage title and company blocklists
    Blocklist {
        #[command(subcommand)]
        command: BlocklistCommands,
    },

    /// Manage the location cache
    Geo {
        #[command(subcommand)]
        command: GeoCommands,
    },

    /// Print the description similarity of two listings
    Compare {
        id_a: String,
        id_b: String,
    },

    /// Show recent runs
    Runs {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum BlocklistCommands {
    /// List entries
    List {
        #[arg(value_enum)]
        kind: Option<BlocklistKind>,
    },

    /// Add an entry
    Add {
        #[arg(value_enum)]
        kind: BlocklistKind,
        item: String,
    },

    /// Remove an entry
    Remove {
        #[arg(value_enum)]
        kind: BlocklistKind,
        item: String,
    },

    /// Replace a list with the lines of a file
    Import {
        #[arg(value_enum)]
        kind: BlocklistKind,
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum GeoCommands {
    /// List cached locations
    List,

    /// Drop a cached location
    Forget { query: String },

    /// Pin the refined id of a cached location (omit to clear it)
    Override {
        query: String,
        sub_region_id: Option<String>,
    },

    /// List known sub-region candidates for a region
    Candidates { region_id: String },

    /// Set the corrected name of a candidate
    Rename { id: String, name: String },

    /// Delete a candidate
    DropCandidate { id: String },
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

/// Session problems are the only fatal startup error.
fn connect(cookie_file: &str, settings: &Settings) -> Result<Arc<VoyagerClient>> {
    let session = SessionConfig::from_cookie_file(&expand_home(cookie_file))
        .context("No usable session; export the Cookie header of a logged-in browser tab")?;
    let client = VoyagerClient::new(&session, &settings.base_url)?;
    Ok(Arc::new(client))
}

fn load_blocklist(
    db: &Database,
    user: Option<&str>,
    extra_titles: &[String],
    extra_companies: &[String],
) -> Result<Blocklist> {
    let mut titles = db.blocklist(BlocklistKind::JobTitle, user)?;
    titles.extend(extra_titles.iter().cloned());
    let mut companies = db.blocklist(BlocklistKind::Company, user)?;
    companies.extend(extra_companies.iter().cloned());
    Blocklist::new(&titles, &companies)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sweep=info".parse()?))
        .init();

    let cli = Cli::parse();
    let db = Arc::new(Database::open(cli.db.clone())?);
    let mut settings = Settings::from_env();
    let user = settings.user.clone();

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at: {}", db.path().display());
        }

        Commands::Run {
            keywords,
            location,
            time,
            limit,
            easy_apply,
            relevant,
            workplace,
            dismiss,
            block_company,
            no_compare,
        } => {
            db.ensure_initialized()?;
            if no_compare {
                settings.compare_descriptions = false;
            }
            let source = connect(&cli.cookie_file, &settings)?;
            let blocklist = load_blocklist(&db, user.as_deref(), &dismiss, &block_company)?;
            if blocklist.is_empty() {
                warn!("No blocklist entries; only applied, upstream-dismissed and duplicate listings will be dismissed");
            }
            info!(
                titles = blocklist.title_keywords().count(),
                companies = blocklist.companies().len(),
                "Loaded blocklists"
            );

            let params = SearchParams {
                keywords,
                location,
                time_window: time,
                limit,
                easy_apply,
                relevance: relevant,
                workplace_types: workplace,
            };

            let cancel = CancellationToken::new();
            let token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping after the current page");
                    token.cancel();
                }
            });

            let coordinator = RunCoordinator::new(db.clone(), source, settings, cancel);
            let outcome = coordinator.run(&params, blocklist).await?;
            let stats = &outcome.stats;

            println!("\nRun #{} {}", outcome.run_id, outcome.status.as_str());
            println!("  Processed:          {}", stats.processed);
            println!("  Dismissed:          {}", stats.suppressed);
            println!("  Synced (upstream):  {}", stats.synced);
            println!("  Already recorded:   {}", stats.skipped);
            println!("  Reposted:           {}", stats.reposted);
            println!("  Easy apply:         {}", stats.easy_apply);
            println!("  Early applicant:    {}", stats.early_applicant);
            println!("  Actively reviewing: {}", stats.actively_reviewing);
            println!("  Applied:            {}", stats.applied);
            println!("  Viewed:             {}", stats.viewed);
            let failures = stats.dismiss_failures
                + stats.classify_failures
                + stats.pages_failed
                + stats.persist_failures;
            if failures > 0 {
                println!(
                    "  Failures:           {} dismiss, {} classify, {} pages, {} writes",
                    stats.dismiss_failures,
                    stats.classify_failures,
                    stats.pages_failed,
                    stats.persist_failures
                );
            }
        }

        Commands::Undo { id, title } => {
            db.ensure_initialized()?;
            let targets: Vec<(String, String)> = match (id, title) {
                (Some(id), _) => {
                    let title = db
                        .get_dismissal(&id)?
                        .map(|r| r.title)
                        .unwrap_or_else(|| "(not recorded)".to_string());
                    vec![(id, title)]
                }
                (None, Some(fragment)) => db
                    .find_dismissals_by_title(&fragment)?
                    .into_iter()
                    .map(|r| (r.listing_id, r.title))
                    .collect(),
                (None, None) => return Err(anyhow!("Specify --id or --title")),
            };
            if targets.is_empty() {
                println!("No recorded listings match.");
                return Ok(());
            }

            let source = connect(&cli.cookie_file, &settings)?;
            let mut restored = 0;
            for (i, (listing_id, title)) in targets.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(settings.action_delay).await;
                }
                match source.undo_dismiss(listing_id).await {
                    Ok(()) => {
                        db.delete_dismissal(listing_id)?;
                        restored += 1;
                        println!("Restored #{} {}", listing_id, title);
                    }
                    Err(e) => println!("Failed to restore #{} {}: {}", listing_id, title, e),
                }
            }
            println!("\nRestored {} of {}", restored, targets.len());
        }

        Commands::History { limit, offset } => {
            db.ensure_initialized()?;
            let total = db.history_count()?;
            let records = db.history(limit, offset)?;
            if records.is_empty() {
                println!("No dismissed listings.");
            } else {
                println!(
                    "{:<12} {:<30} {:<20} {:<24} {:<19}",
                    "ID", "TITLE", "COMPANY", "REASON", "DISMISSED"
                );
                println!("{}", "-".repeat(109));
                for r in &records {
                    println!(
                        "{:<12} {:<30} {:<20} {:<24} {:<19}",
                        r.listing_id,
                        truncate(&r.title, 28),
                        truncate(&r.company, 18),
                        truncate(&r.reason, 22),
                        r.dismissed_at
                    );
                }
                println!(
                    "\nShowing {}-{} of {}",
                    offset + 1,
                    offset + records.len(),
                    total
                );
            }
        }

        Commands::Blocklist { command } => {
            db.ensure_initialized()?;
            match command {
                BlocklistCommands::List { kind } => {
                    let kinds = match kind {
                        Some(kind) => vec![kind],
                        None => vec![BlocklistKind::JobTitle, BlocklistKind::Company],
                    };
                    for kind in kinds {
                        let items = db.blocklist(kind, user.as_deref())?;
                        println!("{} ({}):", kind.as_str(), items.len());
                        for item in items {
                            println!("  {}", item);
                        }
                    }
                }

                BlocklistCommands::Add { kind, item } => {
                    if db.add_blocklist_item(kind, user.as_deref(), &item)? {
                        println!("Added '{}' to {}.", item.trim(), kind.as_str());
                    } else {
                        println!("'{}' is already in {}.", item.trim(), kind.as_str());
                    }
                }

                BlocklistCommands::Remove { kind, item } => {
                    if db.remove_blocklist_item(kind, user.as_deref(), &item)? {
                        println!("Removed '{}' from {}.", item.trim(), kind.as_str());
                    } else {
                        println!("'{}' not found in {}.", item.trim(), kind.as_str());
                    }
                }

                BlocklistCommands::Import { kind, file } => {
                    let content = std::fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read blocklist file: {}", file.display()))?;
                    let items: Vec<String> = content.lines().map(str::to_string).collect();
                    let count = db.replace_blocklist(kind, user.as_deref(), &items)?;
                    println!("Imported {} entries into {}.", count, kind.as_str());
                }
            }
        }

        Commands::Geo { command } => {
            db.ensure_initialized()?;
            match command {
                GeoCommands::List => {
                    let entries = db.list_geo_cache()?;
                    if entries.is_empty() {
                        println!("No cached locations.");
                    } else {
                        println!("{:<30} {:<12} {:<12} {:>10}", "QUERY", "REGION", "REFINED", "CANDIDATES");
                        println!("{}", "-".repeat(67));
                        for (entry, candidates) in entries {
                            println!(
                                "{:<30} {:<12} {:<12} {:>10}",
                                truncate(&entry.query, 28),
                                entry.region_id,
                                entry.sub_region_id.as_deref().unwrap_or("-"),
                                candidates
                            );
                        }
                    }
                }

                GeoCommands::Forget { query } => {
                    if db.delete_geo_cache(&query)? {
                        println!("Forgot '{}'.", query);
                    } else {
                        println!("'{}' is not cached.", query);
                    }
                }

                GeoCommands::Override { query, sub_region_id } => {
                    if db.override_geo_cache(&query, sub_region_id.as_deref())? {
                        let entry = db.geo_cache(&query)?;
                        let refined = entry
                            .and_then(|e| e.sub_region_id)
                            .unwrap_or_else(|| "-".to_string());
                        println!("'{}' now refines to {}.", query, refined);
                    } else {
                        println!("'{}' is not cached; run a search for it first.", query);
                    }
                }

                GeoCommands::Candidates { region_id } => {
                    let candidates = db.candidates_for_region(&region_id)?;
                    if candidates.is_empty() {
                        println!("No candidates for region {}.", region_id);
                    } else {
                        println!("{:<12} {:<32} {:<32}", "ID", "NAME", "CORRECTED");
                        println!("{}", "-".repeat(78));
                        for c in candidates {
                            println!(
                                "{:<12} {:<32} {:<32}",
                                c.id,
                                truncate(&c.name, 30),
                                truncate(c.corrected_name.as_deref().unwrap_or("-"), 30)
                            );
                        }
                    }
                }

                GeoCommands::Rename { id, name } => {
                    if db.update_candidate_name(&id, &name)? {
                        println!("Candidate {} now matches as '{}'.", id, name.trim());
                    } else {
                        println!("Candidate {} not found.", id);
                    }
                }

                GeoCommands::DropCandidate { id } => {
                    if db.delete_candidate(&id)? {
                        println!("Deleted candidate {}.", id);
                    } else {
                        println!("Candidate {} not found.", id);
                    }
                }
            }
        }

        Commands::Compare { id_a, id_b } => {
            let source = connect(&cli.cookie_file, &settings)?;
            let a = source
                .fetch_description(&id_a)
                .await?
                .ok_or_else(|| anyhow!("No description for #{}", id_a))?;
            tokio::time::sleep(settings.action_delay).await;
            let b = source
                .fetch_description(&id_b)
                .await?
                .ok_or_else(|| anyhow!("No description for #{}", id_b))?;

            let score = LevenshteinComparator.similarity(&a, &b);
            let verdict = if score >= settings.similarity_threshold {
                "duplicate"
            } else {
                "distinct"
            };
            println!(
                "#{} vs #{}: similarity {:.4} ({} at threshold {:.2})",
                id_a, id_b, score, verdict, settings.similarity_threshold
            );
        }

        Commands::Runs { limit } => {
            db.ensure_initialized()?;
            let runs = db.list_runs(limit)?;
            if runs.is_empty() {
                println!("No runs recorded.");
            } else {
                println!(
                    "{:<6} {:<10} {:>9} {:>10} {:>8} {:<19} {:<30}",
                    "ID", "STATUS", "PROCESSED", "SUPPRESSED", "SKIPPED", "STARTED", "PARAMS"
                );
                println!("{}", "-".repeat(98));
                for run in runs {
                    println!(
                        "{:<6} {:<10} {:>9} {:>10} {:>8} {:<19} {:<30}",
                        run.id,
                        run.status,
                        run.processed,
                        run.suppressed,
                        run.skipped,
                        run.started_at,
                        truncate(&run.params, 30)
                    );
                }
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
