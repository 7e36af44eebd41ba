// ABOUTME: Main entry point for the tutorchat terminal client
// ABOUTME: Initializes logging and config, then runs a chat or one of the history subcommands

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};
use tutorchat::{
    archive::Archive,
    cli::{Cli, Commands},
    metrics,
    render::format_message,
    terminal::{self, ChatShell},
};
use tutorchat_core::{ChatEngine, ConnectionState, EngineConfig};

fn init_logging(log_dir: &Path, verbose: bool) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "tutorchat.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if verbose { "debug" } else { "info" };
    let stderr_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(stderr_level),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n╔══════════════════════════════════════════════════════════╗");
        eprintln!("║ PANIC! tutorchat crashed with the following error:      ║");
        eprintln!("╚══════════════════════════════════════════════════════════╝\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    let cli = Cli::parse();

    // Load configuration
    dotenvy::dotenv().ok();
    let mut config = EngineConfig::load_with(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let _log_guard = init_logging(&config.log_dir(), cli.verbose)?;

    tracing::info!(
        transport = %config.transport.transport_type,
        url = %config.transport.url,
        data_dir = %config.data_dir().display(),
        "Configuration loaded"
    );

    match cli.command() {
        Commands::Chat { agent, session, .. } => {
            let agent = agent.unwrap_or_else(|| config.chat.agent.clone());
            let handle = if cli.metrics {
                Some(metrics::init_metrics()?)
            } else {
                None
            };
            run_chat(config, &agent, session, handle).await
        }
        Commands::Sessions => {
            let archive = Archive::open(config)?;
            let sessions = archive.sessions()?;
            if sessions.is_empty() {
                println!("No stored sessions.");
            }
            for id in sessions {
                println!("{}", id);
            }
            Ok(())
        }
        Commands::History { session } => {
            let agent_name = config.chat.agent.clone();
            let archive = Archive::open(config)?;
            for message in archive.messages(&session)? {
                println!("{}", format_message(&message, &agent_name));
            }
            Ok(())
        }
        Commands::Clear { session } => {
            Archive::open(config)?.clear(&session)?;
            println!("Cleared {}", session);
            Ok(())
        }
        Commands::Export { session, agent } => {
            let location = Archive::open(config)?
                .export(&session, agent.as_deref())
                .await?;
            println!("Exported to {}", location);
            Ok(())
        }
    }
}

async fn run_chat(
    config: EngineConfig,
    agent: &str,
    session: Option<String>,
    metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> Result<()> {
    let mut engine = ChatEngine::builder(config).build()?;

    let state = engine.mount(agent, session).await;
    if let Some(session) = engine.session() {
        println!(
            "Chatting with {} (session {}). !help for commands.",
            session.agent.name, session.id
        );
    }
    if state != ConnectionState::Connected {
        println!("Not connected ({}). Messages cannot be sent until the connection returns.", state);
    }

    let mut shell = ChatShell::new(engine, std::io::stdout());
    if let Some(handle) = metrics {
        shell = shell.with_metrics(handle);
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let end_session = terminal::run(&mut shell, stdin).await?;

    let (mut engine, _) = shell.into_parts();
    engine.unmount(end_session).await;
    tracing::info!(end_session, "Chat closed");
    Ok(())
}
