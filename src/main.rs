//! mailrag CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use mailrag::{
    commands::{
        append_latency_log, cmd_ask, cmd_clear, cmd_clear_ingestion, cmd_ingest, cmd_init,
        cmd_list_ingestions, cmd_reconcile, cmd_reindex, cmd_status, cmd_sync,
        parse_message_export, print_ask_outcome, print_clear_outcome, print_ingest_outcome,
        print_ingestion_completions, print_ingestions, print_init_outcome, print_reconcile_stats,
        print_reindex_stats, print_search_results, print_status, print_sync_outcome, search_timed,
        AskRequest, IngestRequest, InitOptions, ReconcileOptions, ReindexOptions, SyncRequest,
        DEFAULT_FOLDER,
    },
    config::Config,
    embed::create_embedder,
    error::{Error, Result},
    generate::OllamaGenerator,
    graph::GraphClient,
    mcp::McpServer,
    meta::MetaDb,
    progress::LogWriterFactory,
    store::{QdrantStore, VectorStore},
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mailrag")]
#[command(version, about = "Local RAG assistant over your mailbox", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit log lines as JSON on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize mailrag configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,

        /// Do not try to create the Qdrant collection
        #[arg(long)]
        skip_collection: bool,
    },

    /// Ingest messages from an exported Graph JSON file
    Ingest {
        /// JSON array of messages, or a Graph page with a `value` array
        file: PathBuf,

        /// Folder the messages came from
        #[arg(long)]
        folder: Option<String>,

        /// Ingestion run id (defaults to ingest_<unix seconds>)
        #[arg(long)]
        ingestion_id: Option<String>,

        /// Human readable label for the run
        #[arg(long)]
        label: Option<String>,

        /// Run mode tag (FULL, INCREMENTAL)
        #[arg(long)]
        mode: Option<String>,
    },

    /// Pull messages from Microsoft Graph and ingest them
    ///
    /// The access token is read from the environment variable named by graph.token_env.
    Sync {
        /// Folder id or well-known name
        #[arg(long, default_value = DEFAULT_FOLDER)]
        folder: String,

        /// Maximum messages to fetch from the folder
        #[arg(short, long, default_value = "100")]
        limit: usize,

        /// Fetch exactly these message ids (comma separated)
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<String>>,

        /// Clear the index before ingesting
        #[arg(long)]
        full: bool,

        /// Ingestion run id
        #[arg(long)]
        ingestion_id: Option<String>,

        /// Human readable label for the run
        #[arg(long)]
        label: Option<String>,
    },

    /// Semantic search over indexed email
    Search {
        /// The search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Answer a question from indexed email with the local model
    Ask {
        /// The question
        question: String,

        /// Number of emails retrieved as context
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Maximum answer tokens
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Print the answer only once it is complete
        #[arg(long)]
        no_stream: bool,
    },

    /// Show index status
    Status,

    /// List ingestion runs
    Ingestions {
        /// Maximum runs to list
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output only ingestion IDs (one per line, for scripting)
        #[arg(long)]
        ids_only: bool,

        /// Output ingestion IDs with descriptions for shell completions
        #[arg(long, value_enum, hide = true)]
        completion: Option<Shell>,
    },

    /// Delete every email, ingestion run and vector
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Delete one ingestion run with its emails and vectors
    ///
    /// Use 'mailrag ingestions --ids-only' to list available ingestion IDs
    ClearIngestion {
        /// Ingestion ID to remove
        ingestion_id: String,
    },

    /// Re-embed every stored email
    Reindex {
        /// Batch size for embedding
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Repair drift between the database and the vector store
    Reconcile {
        /// Dry run - report without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Do not embed emails that have no vector
        #[arg(long)]
        no_reembed: bool,

        /// Batch size for re-embedding
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Start MCP server on stdio
    Mcp,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Manage Qdrant vector database
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

/// Database management actions
#[derive(Subcommand)]
enum DbAction {
    /// Initialize/create the Qdrant collection
    Init,

    /// Show Qdrant collection status
    Status,

    /// Reset the collection (delete all vectors and recreate)
    Reset {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, log_json: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(LogWriterFactory))
            .init();
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    // Init runs before any config exists
    if let Commands::Init {
        force,
        skip_collection,
    } = cli.command
    {
        let base_dir = init_base_dir(cli.config.as_deref());
        let outcome = cmd_init(InitOptions {
            base_dir,
            force,
            create_collection: !skip_collection,
        })
        .await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        } else {
            print_init_outcome(&outcome);
        }
        return Ok(());
    }

    // Completions need no config/db/store
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "mailrag", &mut std::io::stdout());
        print_completion_extras(shell);
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let db = MetaDb::new(&config.paths.db_file).await?;
    let store = QdrantStore::connect(&config).await?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Ingest {
            file,
            folder,
            ingestion_id,
            label,
            mode,
        } => {
            let content = std::fs::read_to_string(&file)?;
            let messages = parse_message_export(&content)?;
            let embedder = create_embedder(&config.embedding)?;

            let outcome = cmd_ingest(
                &db,
                &store,
                embedder.as_ref(),
                IngestRequest {
                    messages,
                    folder_id: folder,
                    ingestion_id,
                    label,
                    mode,
                },
            )
            .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_ingest_outcome(&outcome);
            }
        }

        Commands::Sync {
            folder,
            limit,
            ids,
            full,
            ingestion_id,
            label,
        } => {
            let token = config.graph_token().ok_or_else(|| {
                Error::Config(format!(
                    "No Graph access token: set the {} environment variable",
                    config.graph.token_env
                ))
            })?;
            let graph = GraphClient::new(&config.graph)?;
            let embedder = create_embedder(&config.embedding)?;

            let outcome = cmd_sync(
                &db,
                &store,
                embedder.as_ref(),
                &graph,
                &token,
                SyncRequest {
                    folder_id: folder,
                    limit,
                    message_ids: ids,
                    full,
                    ingestion_id,
                    label,
                },
            )
            .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_sync_outcome(&outcome);
            }
        }

        Commands::Search { query, limit } => {
            let embedder = create_embedder(&config.embedding)?;
            let limit = result_limit(&config, limit);

            let outcome = search_timed(
                &db,
                &store,
                embedder.as_ref(),
                &query,
                limit,
                config.query.snippet_chars,
            )
            .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_search_results(&outcome);
            }
        }

        Commands::Ask {
            question,
            limit,
            max_tokens,
            no_stream,
        } => {
            let embedder = create_embedder(&config.embedding)?;
            let generator = OllamaGenerator::new(&config.generation)?;

            let mut request = AskRequest::new(
                question,
                result_limit(&config, limit),
                max_tokens.unwrap_or(config.generation.max_tokens),
            );
            request.snippet_chars = config.query.snippet_chars;

            let stream = !cli.json && !no_stream;
            if stream {
                println!("\nAnswer:\n");
            }
            let mut on_token = |fragment: &str| {
                if stream {
                    print!("{}", fragment);
                    let _ = std::io::stdout().flush();
                }
            };

            let outcome = cmd_ask(
                &db,
                &store,
                embedder.as_ref(),
                &generator,
                request,
                &mut on_token,
            )
            .await?;

            if let Err(e) = append_latency_log(&config.paths.latency_log, &outcome) {
                warn!("Failed to write latency log: {}", e);
            }

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_ask_outcome(&outcome, stream);
            }
        }

        Commands::Status => {
            let status = cmd_status(&config, &db, &store).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }

        Commands::Ingestions {
            limit,
            ids_only,
            completion,
        } => {
            let runs = cmd_list_ingestions(&db, limit).await?;

            if let Some(shell) = completion {
                print_ingestion_completions(&runs, shell);
            } else if ids_only {
                for run in &runs {
                    println!("{}", run.ingestion_id);
                }
            } else if cli.json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else {
                print_ingestions(&runs);
            }
        }

        Commands::Clear { yes } => {
            if !yes {
                eprintln!("⚠️  This will delete ALL indexed emails and vectors!");
                eprintln!("Run with --yes to confirm.");
                std::process::exit(1);
            }
            let outcome = cmd_clear(&db, &store).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_clear_outcome(&outcome);
            }
        }

        Commands::ClearIngestion { ingestion_id } => {
            let outcome = cmd_clear_ingestion(&db, &store, &ingestion_id).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_clear_outcome(&outcome);
            }
        }

        Commands::Reindex { batch_size } => {
            let embedder = create_embedder(&config.embedding)?;
            let options = ReindexOptions {
                batch_size: batch_size.unwrap_or(config.embedding.batch_size),
                show_progress: !cli.json,
            };

            let stats = cmd_reindex(&db, &store, embedder.as_ref(), options).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_reindex_stats(&stats);
            }
        }

        Commands::Reconcile {
            dry_run,
            no_reembed,
            batch_size,
        } => {
            let embedder = create_embedder(&config.embedding)?;
            let options = ReconcileOptions {
                dry_run,
                reembed_missing: !no_reembed,
                batch_size: batch_size.unwrap_or(config.embedding.batch_size),
            };

            let stats = cmd_reconcile(&db, &store, embedder.as_ref(), options).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_reconcile_stats(&stats);
            }
        }

        Commands::Db { action } => {
            handle_db_action(&store, action, cli.json).await?;
        }

        Commands::Mcp => {
            let embedder = create_embedder(&config.embedding)?;
            let generator = OllamaGenerator::new(&config.generation)?;
            let server = McpServer::new(
                config,
                db,
                Box::new(store),
                embedder,
                Box::new(generator),
            );
            server.run().await?;
        }
    }

    Ok(())
}

/// Requested result count, defaulted and capped by the query config
fn result_limit(config: &Config, requested: Option<usize>) -> usize {
    let limit = requested.unwrap_or(config.query.default_k);
    if limit > config.query.max_results {
        warn!(
            "Limiting results to {} (query.max_results)",
            config.query.max_results
        );
        return config.query.max_results;
    }
    limit
}

fn print_completion_extras(shell: Shell) {
    match shell {
        Shell::Bash => {
            println!();
            println!("{raw}", raw = r#"# Dynamic completion for 'mailrag clear-ingestion' ids"#);
            println!("{raw}", raw = r#"_mailrag_dynamic() {"#);
            println!("{raw}", raw = r#"    local cur="${COMP_WORDS[COMP_CWORD]}""#);
            println!("{raw}", raw = r#"    local prev="${COMP_WORDS[COMP_CWORD-1]}""#);
            println!("{raw}", raw = r#"    if [[ "$prev" == "clear-ingestion" ]]; then"#);
            println!(
                "{raw}",
                raw = r#"        COMPREPLY=( $(compgen -W "$(mailrag ingestions --completion bash 2>/dev/null)" -- "$cur") )"#
            );
            println!("{raw}", raw = r#"        return 0"#);
            println!("{raw}", raw = r#"    fi"#);
            println!("{raw}", raw = r#"    _mailrag "$@""#);
            println!("{raw}", raw = r#"}"#);
            println!(
                "{raw}",
                raw = r#"complete -F _mailrag_dynamic -o bashdefault -o default mailrag"#
            );
        }
        Shell::Zsh => {
            println!();
            println!("{}", r#"# Dynamic completion for 'mailrag clear-ingestion' ids"#);
            println!("{}", r#"_mailrag_ingestion_ids() {"#);
            println!("{}", r#"    local -a entries"#);
            println!(
                "{}",
                r#"    entries=("${(@f)$(mailrag ingestions --completion zsh 2>/dev/null)}")"#
            );
            println!("{}", r#"    _describe -t ingestions 'ingestion ids' entries"#);
            println!("{}", r#"}"#);
            println!("{}", r#"compdef _mailrag_ingestion_ids 'mailrag clear-ingestion'"#);
        }
        Shell::Fish => {
            println!();
            println!("{}", r#"# Dynamic completion for 'mailrag clear-ingestion' ids"#);
            println!(
                "{}",
                r#"complete -c mailrag -n '__fish_seen_subcommand_from clear-ingestion' -a '(mailrag ingestions --completion fish 2>/dev/null)'"#
            );
        }
        _ => {}
    }
}

/// Base directory for `init`: the parent of a given .toml path, a given directory, or the default
fn init_base_dir(path: Option<&Path>) -> PathBuf {
    match path {
        Some(p) if p.extension().is_some_and(|e| e == "toml") => p
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(Config::default_base_dir),
        Some(p) => p.to_path_buf(),
        None => Config::default_base_dir(),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}

async fn handle_db_action(store: &QdrantStore, action: DbAction, json: bool) -> Result<()> {
    match action {
        DbAction::Init => {
            store.ensure_collection().await?;
            if json {
                println!(r#"{{"status": "ok", "message": "Collection initialized"}}"#);
            } else {
                println!("✓ Qdrant collection initialized ({})", store.describe());
            }
        }
        DbAction::Status => {
            if store.collection_exists().await? {
                let points = store.count().await?;
                if json {
                    println!(
                        r#"{{"exists": true, "points_count": {}, "dimension": {}}}"#,
                        points,
                        store.dimension()
                    );
                } else {
                    println!("Qdrant Collection Status:");
                    println!("  Collection: {}", store.describe());
                    println!("  Points: {}", points);
                    println!("  Dimension: {}", store.dimension());
                }
            } else if json {
                println!(r#"{{"exists": false}}"#);
            } else {
                println!("Collection does not exist. Run 'mailrag db init' to create it.");
            }
        }
        DbAction::Reset { yes } => {
            if !yes {
                eprintln!("⚠️  This will delete ALL vectors!");
                eprintln!("Run with --yes to confirm.");
                std::process::exit(1);
            }
            store.recreate().await?;
            if json {
                println!(r#"{{"status": "ok", "message": "Collection reset"}}"#);
            } else {
                println!("✓ Qdrant collection reset");
                println!("  Stored emails are untouched; run 'mailrag reindex' to rebuild vectors.");
            }
        }
    }

    Ok(())
}
