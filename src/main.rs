use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use vigil::config::Config;
use vigil::db::models::{ContentKind, NewAttachedFile, NewContentItem};
use vigil::db::thread::build_thread;
use vigil::db::ContentStore;
use vigil::output::terminal;
use vigil::pipeline::{Pipeline, Scheduler, TickOutcome};

/// Vigil: scheduled content moderation.
///
/// Periodically pulls unanalyzed articles and comments, screens them for
/// profanity, NSFW images and phone numbers, and records a verdict for each.
#[derive(Parser)]
#[command(name = "vigil", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Add an article or comment to the moderation queue
    Add(AddArgs),

    /// Run a single pipeline pass over pending content
    RunOnce,

    /// Run the scheduler until interrupted
    Serve(ServeArgs),

    /// Show queue counts and the last run
    Status,

    /// List recent content items
    Items {
        /// Number of items to show (default: 20)
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// List recent analysis results
    Results {
        /// Number of results to show (default: 20)
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show one item with its attachments, thread and verdicts
    Show {
        /// Content item id
        id: i64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Article,
    Comment,
}

impl From<KindArg> for ContentKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Article => ContentKind::Article,
            KindArg::Comment => ContentKind::Comment,
        }
    }
}

#[derive(Args)]
struct AddArgs {
    /// Article or comment
    #[arg(value_enum)]
    kind: KindArg,

    /// Author reference (user id or handle)
    #[arg(long)]
    author: String,

    /// Body text (HTML allowed)
    #[arg(long, conflicts_with = "body_file")]
    body: Option<String>,

    /// Read the body from a file instead
    #[arg(long)]
    body_file: Option<PathBuf>,

    /// Article title
    #[arg(long)]
    title: Option<String>,

    /// Owning article (required for comments)
    #[arg(long)]
    article: Option<i64>,

    /// Parent comment, for replies
    #[arg(long)]
    parent: Option<i64>,

    /// Attach a file (repeatable)
    #[arg(long = "attach")]
    attachments: Vec<PathBuf>,
}

#[derive(Args)]
struct ServeArgs {
    /// Also serve the admin API
    #[cfg(feature = "web")]
    #[arg(long)]
    web: bool,

    /// Admin API port (default: 8080)
    #[cfg(feature = "web")]
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Admin API bind address (default: 127.0.0.1)
    #[cfg(feature = "web")]
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vigil=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing Vigil database...");
            let config = Config::load()?;
            let store = init_store(&config).await?;
            let table_count = store.table_count().await?;
            println!("Database initialized at: {}", config.db_display());
            println!("Tables created: {table_count}");
            println!("\nVigil is ready. Next step: set up your .env file");
            println!("  (see .env.example for the classifier endpoints)");
            println!("\nThen run: vigil serve");
        }

        Commands::Add(args) => {
            let config = Config::load()?;
            let store = open_store(&config).await?;
            let id = add_item(&*store, args).await?;
            println!("{} Added content item {}", "✓".green(), id.to_string().bold());
        }

        Commands::RunOnce => {
            let config = Config::load()?;
            config.require_classifiers()?;
            let store = open_store(&config).await?;
            let pipeline = build_pipeline(&config, store)?;

            match pipeline.run_once().await? {
                TickOutcome::Completed(report) => terminal::display_tick_report(&report),
                TickOutcome::Suppressed => {
                    println!("{}", "Another run is already in progress.".yellow())
                }
            }
        }

        Commands::Serve(args) => {
            let config = Config::load()?;
            config.require_classifiers()?;
            let store = open_store(&config).await?;
            let pipeline = Arc::new(build_pipeline(&config, store.clone())?);
            serve(&config, store, pipeline, args).await?;
        }

        Commands::Status => {
            let config = Config::load()?;
            let store = open_store(&config).await?;
            let sqlite_path = (!config.uses_postgres()).then_some(config.db_path.as_str());
            vigil::status::show(&store, &config.db_display(), sqlite_path).await?;
        }

        Commands::Items { limit } => {
            let config = Config::load()?;
            let store = open_store(&config).await?;
            let items = store.list_items(limit).await?;
            terminal::display_item_list(&items);
        }

        Commands::Results { limit } => {
            let config = Config::load()?;
            let store = open_store(&config).await?;
            let results = store.recent_results(limit).await?;
            terminal::display_results(&results);
        }

        Commands::Show { id } => {
            let config = Config::load()?;
            let store = open_store(&config).await?;
            let item = store
                .get_item(id)
                .await?
                .with_context(|| format!("No content item with id {id}"))?;
            let files = store.files_for(id).await?;
            let thread = if item.kind == ContentKind::Article {
                build_thread(store.comments_for_article(id).await?)
            } else {
                Vec::new()
            };
            let results = store.results_for(id).await?;
            terminal::display_item_detail(&item, &files, &thread, &results);
        }
    }

    Ok(())
}

/// Run the scheduler (and optionally the admin API) until Ctrl-C, then
/// stop gracefully: in-flight items finish, nothing new is dispatched.
async fn serve(
    config: &Config,
    store: Arc<dyn ContentStore>,
    pipeline: Arc<Pipeline>,
    args: ServeArgs,
) -> Result<()> {
    let scheduler = Scheduler::new(pipeline.clone(), config.interval, config.run_on_start);
    scheduler.start().await?;
    println!(
        "Scheduler running every {}s against {}. Press Ctrl-C to stop.",
        config.interval.as_secs(),
        config.db_display()
    );

    #[cfg(feature = "web")]
    if args.web {
        let state = vigil::web::AppState { store, pipeline };
        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        let served = vigil::web::run_server(state, &args.bind, args.port, shutdown).await;
        println!("\nStopping scheduler (waiting for in-flight items)...");
        scheduler.stop().await;
        return served;
    }

    #[cfg(not(feature = "web"))]
    let _ = (store, args);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!("\nStopping scheduler (waiting for in-flight items)...");
    scheduler.stop().await;
    println!("{}", "Stopped.".green());
    Ok(())
}

fn build_pipeline(config: &Config, store: Arc<dyn ContentStore>) -> Result<Pipeline> {
    Ok(Pipeline::new(
        store,
        config.text_classifier()?,
        config.image_classifier()?,
        config.pipeline_config(),
    ))
}

/// Validate and insert one item plus its attachments.
async fn add_item(store: &dyn ContentStore, args: AddArgs) -> Result<i64> {
    let body = match (args.body, args.body_file) {
        (Some(body), _) => body,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => anyhow::bail!("Provide the content with --body or --body-file"),
    };

    let kind = ContentKind::from(args.kind);
    match kind {
        ContentKind::Article => {
            if args.article.is_some() || args.parent.is_some() {
                anyhow::bail!("Articles can't have --article or --parent");
            }
        }
        ContentKind::Comment => {
            let article_id = args
                .article
                .context("Comments need --article <id> for the article they belong to")?;
            let article = store.get_item(article_id).await?;
            if !matches!(article, Some(ref a) if a.kind == ContentKind::Article) {
                anyhow::bail!("Item {article_id} is not an article");
            }
            if let Some(parent_id) = args.parent {
                let parent = store.get_item(parent_id).await?;
                if !matches!(parent, Some(ref p) if p.article_id == Some(article_id)) {
                    anyhow::bail!("Comment {parent_id} is not on article {article_id}");
                }
            }
        }
    }

    // Read attachments before inserting so a bad path leaves nothing behind
    let mut files = Vec::with_capacity(args.attachments.len());
    for path in &args.attachments {
        let payload = std::fs::read(path)
            .with_context(|| format!("Failed to read attachment {}", path.display()))?;
        files.push((display_name(path), guess_mime(path), payload));
    }

    let id = store
        .insert_item(&NewContentItem {
            kind,
            title: args.title,
            body,
            author_ref: args.author,
            article_id: args.article,
            parent_id: args.parent,
        })
        .await?;

    for (idx, (display_name, mime_type, payload)) in files.into_iter().enumerate() {
        store
            .attach_file(&NewAttachedFile {
                owner_content_id: id,
                stored_name: format!("{id}-{idx}-{display_name}"),
                display_name,
                payload,
                mime_type: mime_type.to_string(),
            })
            .await?;
    }

    Ok(id)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string())
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Select the storage backend based on configuration.
///
/// When DATABASE_URL is set and points to PostgreSQL, uses the Postgres backend
/// (requires the `postgres` feature). Otherwise, falls back to SQLite.
async fn open_store(config: &Config) -> Result<Arc<dyn ContentStore>> {
    if config.uses_postgres() {
        return connect_postgres(config).await;
    }
    open_sqlite(config)
}

/// Initialize the store (create if needed).
async fn init_store(config: &Config) -> Result<Arc<dyn ContentStore>> {
    if config.uses_postgres() {
        return connect_postgres(config).await;
    }
    initialize_sqlite(config)
}

#[cfg(feature = "postgres")]
async fn connect_postgres(config: &Config) -> Result<Arc<dyn ContentStore>> {
    info!("Using PostgreSQL backend");
    let url = config.database_url.as_deref().unwrap_or_default();
    vigil::db::connect_postgres(url).await
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(_config: &Config) -> Result<Arc<dyn ContentStore>> {
    anyhow::bail!(
        "DATABASE_URL points to PostgreSQL but the 'postgres' feature is not compiled in.\n\
         Rebuild with: cargo build --features postgres"
    )
}

#[cfg(feature = "sqlite")]
fn open_sqlite(config: &Config) -> Result<Arc<dyn ContentStore>> {
    vigil::db::open_sqlite(&config.db_path)
}

#[cfg(feature = "sqlite")]
fn initialize_sqlite(config: &Config) -> Result<Arc<dyn ContentStore>> {
    vigil::db::initialize_sqlite(&config.db_path)
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_config: &Config) -> Result<Arc<dyn ContentStore>> {
    anyhow::bail!("No storage backend: set DATABASE_URL or rebuild with the 'sqlite' feature")
}

#[cfg(not(feature = "sqlite"))]
fn initialize_sqlite(config: &Config) -> Result<Arc<dyn ContentStore>> {
    open_sqlite(config)
}
