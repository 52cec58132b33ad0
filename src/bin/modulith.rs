use clap::{command, Parser};
use modulith::boot::STOP_EVENT;
use modulith::config::EngineConfig;
use modulith::event::Event;
use modulith::system::Engine;
use modulith::Error;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Enable debug mode
    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: &Cli) -> Result<(), Error> {
    let config = if cli.config.exists() {
        EngineConfig::from_file(&cli.config)?
    } else {
        EngineConfig::default()
    };

    info!("config loaded.");
    debug!("config: {:?}", config);

    let engine = Engine::builder(config).build();
    let ctx = engine.context();

    // Ctrl+C requests a stop through the bus like any other caller.
    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = signal_ctx.bus.publish(Event::new(STOP_EVENT)).await;
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let signal_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut term = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(_) => return,
            };
            while term.recv().await.is_some() {
                let _ = signal_ctx.bus.publish(Event::new(STOP_EVENT)).await;
            }
        });

        // SIGHUP triggers a hot reload, the classic daemon convention.
        let signal_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut hup = match signal(SignalKind::hangup()) {
                Ok(stream) => stream,
                Err(_) => return,
            };
            while hup.recv().await.is_some() {
                let _ = signal_ctx.reload_tx.send(());
            }
        });
    }

    println!(
        "Welcome to {}! Engine starting. Press Ctrl+C to shutdown.",
        ctx.config.app.name
    );

    engine.run().await?;

    println!("Engine shutdown completed.");

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
