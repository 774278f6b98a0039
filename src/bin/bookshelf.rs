use bookshelf::catalog::GroupBy;
use bookshelf::cli::{self as prog_cli, Command, OutputMode};
use bookshelf::config::{Backend, ConfigOverrides, StoreConfig};
use bookshelf::connection::ConnectionManager;
use bookshelf::errors::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bookshelf", version, about = "Typed queries over a book catalog in a document store", long_about = None)]
struct Cli {
    #[arg(long, help = "Path to a config file (TOML). Falls back to $BOOKSHELF_CONFIG, ~/.config/bookshelf.toml, ./bookshelf.toml")]
    config: Option<PathBuf>,
    #[arg(long, help = "Store backend: memory|mongodb")]
    backend: Option<Backend>,
    #[arg(long, help = "Store host")]
    host: Option<String>,
    #[arg(long, help = "Store port")]
    port: Option<u16>,
    #[arg(long, help = "Database name")]
    database: Option<String>,
    #[arg(long, help = "Collection name")]
    collection: Option<String>,
    #[arg(long = "connect-timeout-ms", help = "Connection timeout in milliseconds")]
    connect_timeout_ms: Option<u64>,
    #[arg(long = "timeout-ms", help = "Per-operation timeout in milliseconds")]
    op_timeout_ms: Option<u64>,
    #[arg(long, default_value = "pretty", help = "Output format: pretty|ndjson")]
    format: OutputMode,
    #[arg(long = "log-dir", help = "Also write rolling logs to this directory (overrides $BOOKSHELF_LOG_DIR)")]
    log_dir: Option<PathBuf>,
    #[arg(long = "log-level", help = "Diagnostic level: error|warn|info|debug|trace (overrides $BOOKSHELF_LOG_LEVEL)")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "List books matching the given filters")]
    List {
        #[arg(long, help = "Only books in this genre")]
        genre: Option<String>,
        #[arg(long, help = "Only books by this author")]
        author: Option<String>,
        #[arg(long = "after-year", help = "Only books published strictly after this year")]
        after_year: Option<i32>,
        #[arg(long = "in-stock", help = "Only books currently in stock")]
        in_stock: bool,
        #[arg(long = "where", help = "Extra JSON filter, e.g. {\"price\": {\"lt\": 10}}")]
        where_json: Option<String>,
        #[arg(long, help = "Comma-separated fields to return (e.g. title,author,price)")]
        fields: Option<String>,
        #[arg(long = "no-id", requires = "fields", help = "Leave `_id` out of the projected fields")]
        no_id: bool,
        #[arg(long, help = "Sort spec, e.g. price:desc,title")]
        sort: Option<String>,
        #[arg(long, help = "Page size; requires --sort")]
        limit: Option<u64>,
        #[arg(long, help = "Skip N results; requires --sort")]
        offset: Option<u64>,
    },
    #[command(name = "update-price", about = "Set the price of the first book with the given title")]
    UpdatePrice {
        #[arg(long)]
        title: String,
        #[arg(long)]
        price: f64,
    },
    #[command(about = "Delete the first book with the given title")]
    Delete {
        #[arg(long)]
        title: String,
    },
    #[command(about = "Grouped counts and average prices")]
    Stats {
        #[arg(long, help = "genre|author|decade")]
        by: GroupBy,
    },
    #[command(name = "top-authors", about = "Authors with the most books")]
    TopAuthors {
        #[arg(long, default_value_t = 1)]
        n: u64,
    },
    #[command(name = "create-indexes", about = "Ensure the title and author/year indexes exist")]
    CreateIndexes,
    #[command(about = "Compare the planned and full-scan execution of a title lookup")]
    Explain {
        #[arg(long)]
        title: String,
    },
    #[command(about = "Insert the sample catalog, or N synthetic books")]
    Seed {
        #[arg(long)]
        synthetic: Option<usize>,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    #[command(about = "Show connection and build details")]
    Info,
}

impl From<Commands> for Command {
    fn from(c: Commands) -> Self {
        match c {
            Commands::List { genre, author, after_year, in_stock, where_json, fields, no_id, sort, limit, offset } => {
                Self::List {
                    genre,
                    author,
                    after_year,
                    in_stock,
                    where_json,
                    fields: fields.as_deref().map(prog_cli::parse_fields),
                    no_id,
                    sort,
                    limit,
                    offset,
                }
            }
            Commands::UpdatePrice { title, price } => Self::UpdatePrice { title, price },
            Commands::Delete { title } => Self::Delete { title },
            Commands::Stats { by } => Self::Stats { by },
            Commands::TopAuthors { n } => Self::TopAuthors { n },
            Commands::CreateIndexes => Self::CreateIndexes,
            Commands::Explain { title } => Self::Explain { title },
            Commands::Seed { synthetic, seed } => Self::Seed { synthetic, seed },
            Commands::Info => Self::Info,
        }
    }
}

fn init_logging(cli: &Cli) {
    let dir = cli.log_dir.clone().or_else(|| std::env::var_os("BOOKSHELF_LOG_DIR").map(PathBuf::from));
    let level = cli.log_level.clone().or_else(|| std::env::var("BOOKSHELF_LOG_LEVEL").ok());
    if let Err(e) = bookshelf::logger::configure_logging(dir.as_deref(), level.as_deref()) {
        eprintln!("warning: logging disabled: {e}");
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let overrides = ConfigOverrides {
        backend: cli.backend,
        host: cli.host,
        port: cli.port,
        database: cli.database,
        collection: cli.collection,
        connect_timeout_ms: cli.connect_timeout_ms,
        op_timeout_ms: cli.op_timeout_ms,
    };
    let config = StoreConfig::load(cli.config.as_deref(), &overrides)?;
    log::debug!("effective config: {config:?}");
    let manager = ConnectionManager::from_config(config)?;
    let mut conn = manager.acquire().await?;
    let mut stdout = std::io::stdout().lock();
    let mut stderr = std::io::stderr();
    let result = prog_cli::run(&mut conn, cli.command.into(), cli.format, &mut stdout, &mut stderr).await;
    conn.release().await;
    result
}

#[tokio::main]
async fn main() {
    // Usage errors exit through clap with code 2, shared with `InvalidSpec`.
    let cli = Cli::parse();
    init_logging(&cli);
    if let Err(e) = execute(cli).await {
        eprintln!("error: {}", e.summary());
        std::process::exit(e.exit_code());
    }
}
