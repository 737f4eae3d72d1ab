use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use chatlog_core::{ensure_config, load_config, ChatService, ChatlogConfig};
use chatlog_provider::create_provider;
use chatlog_server::state::AppState;
use chatlog_store::ConversationStore;

#[derive(Parser)]
#[command(name = "chatlog", version, about = "Event-sourced chat service")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.chatlog",
        help = "Root directory (contains config/, data/ and logs/)"
    )]
    root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP API server")]
    Start {
        #[arg(long, help = "Override the port from server.addr")]
        port: Option<u16>,
    },
    #[command(about = "Local REPL against the configured provider")]
    Chat {
        #[arg(long, help = "Continue an existing stream instead of starting a new one")]
        stream: Option<String>,
    },
    #[command(about = "Print the projected state of a stream")]
    Show {
        #[arg(help = "Stream ID")]
        stream_id: String,
    },
    #[command(about = "Print the stored events of a stream")]
    Events {
        #[arg(help = "Stream ID")]
        stream_id: String,
    },
    #[command(about = "Validate the config file")]
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();
    cli.root = expand_home(&cli.root);

    let log_dir = cli.root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "chatlog.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Validate => {
            let config = load_config(&config_path(&cli.root))?;
            println!(
                "Config valid. provider: {:?}, model: {}, database: {}",
                config.provider.provider_type,
                config.chat.model,
                config.database.resolve(&cli.root).display()
            );
        }
        Commands::Start { port } => {
            if ensure_config(&config_path(&cli.root))? {
                tracing::info!(
                    "wrote default config to {}",
                    config_path(&cli.root).display()
                );
            }
            let (config, service) = bootstrap(&cli.root)?;
            let addr = listen_addr(&config, port)?;
            chatlog_server::serve(AppState::new(service), &addr.to_string()).await?;
        }
        Commands::Chat { stream } => {
            let (_config, service) = bootstrap(&cli.root)?;
            run_repl(&service, stream).await?;
        }
        Commands::Show { stream_id } => {
            let store = open_store(&cli.root)?;
            match store.state(&stream_id).await? {
                Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                None => println!("No conversation found for stream: {stream_id}"),
            }
        }
        Commands::Events { stream_id } => {
            let store = open_store(&cli.root)?;
            let events = store.events(&stream_id).await?;
            if events.is_empty() {
                println!("No events found for stream: {stream_id}");
            }
            for event in events {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    Ok(())
}

fn expand_home(path: &Path) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(path.strip_prefix("~").unwrap_or(path));
        }
    }
    path.to_path_buf()
}

fn config_path(root: &Path) -> PathBuf {
    root.join("config").join("chatlog.yaml")
}

fn listen_addr(config: &ChatlogConfig, port: Option<u16>) -> Result<SocketAddr> {
    let mut addr: SocketAddr = config
        .server
        .addr
        .parse()
        .with_context(|| format!("invalid server.addr: {}", config.server.addr))?;
    if let Some(port) = port {
        addr.set_port(port);
    }
    Ok(addr)
}

fn open_store(root: &Path) -> Result<ConversationStore> {
    let config = load_config(&config_path(root))?;
    let db_path = config.database.resolve(root);
    ConversationStore::open(&db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))
}

fn bootstrap(root: &Path) -> Result<(ChatlogConfig, ChatService)> {
    let config = load_config(&config_path(root))?;
    let db_path = config.database.resolve(root);
    let store = ConversationStore::open(&db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))?;
    let provider = create_provider(&config.provider)?;
    let service = ChatService::new(store, provider, config.chat.clone());
    Ok((config, service))
}

async fn run_repl(service: &ChatService, stream: Option<String>) -> Result<()> {
    let mut stream_id = stream;

    println!("chatlog REPL. Type 'quit' to exit.");
    if let Some(id) = &stream_id {
        println!("stream: {id}");
    }
    println!("---");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input == "quit" || input == "exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }

        match service.turn(input, stream_id.clone()).await {
            Ok(outcome) => {
                if stream_id.is_none() {
                    println!("(stream: {})", outcome.stream_id);
                }
                println!("{}", outcome.reply);
                println!("[total tokens: {}]", outcome.total_tokens);
                stream_id = Some(outcome.stream_id);
            }
            Err(err) => eprintln!("Error: {err}"),
        }
    }

    Ok(())
}
