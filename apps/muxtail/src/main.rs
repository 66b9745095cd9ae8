//! Terminal viewer for remote tmux output.
//!
//! Follows one target over the live channel, repainting the screen on every
//! buffer change, with automatic reconnection handled underneath.

use std::io::{self, Write as _};
use std::sync::Arc;

use clap::Parser;
use crossterm::{cursor, execute, terminal};
use tokio::sync::mpsc;

use muxtail::api::HttpOutputApi;
use muxtail::client::ViewCoordinator;
use muxtail::config::Config;
use muxtail::session::Target;
use muxtail::telemetry::logging::{self, LogConfig, LogLevel};
use muxtail::transport::websocket::WebSocketConnector;

#[derive(Parser, Debug)]
#[command(name = "muxtail", version, about = "Live viewer for remote tmux output")]
struct Cli {
    /// tmux target to follow: session[:window[.pane]]
    #[arg(default_value = "default")]
    target: String,

    /// Output server address, host:port with an optional scheme
    #[arg(long, env = "MUXTAIL_SERVER")]
    server: Option<String>,

    /// Snapshot cadence to request from the server, in seconds
    #[arg(long)]
    refresh_rate: Option<f64>,

    #[arg(long, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Log to this file instead of stderr
    #[arg(long)]
    log_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })?;

    let config = match &cli.server {
        Some(server) => Config::new(server.clone()),
        None => Config::from_env(),
    };
    let target = Target::new(&cli.target);
    tracing::info!(%target, server = %config.server, "starting viewer");

    let connector = Arc::new(WebSocketConnector::new(config.clone()));
    let api = Arc::new(HttpOutputApi::new(&config));
    let coordinator = ViewCoordinator::new(target, connector, api);

    let (output_tx, mut output_rx) = mpsc::unbounded_channel::<String>();
    coordinator.on_output(move |content| {
        let _ = output_tx.send(content);
    });
    coordinator.on_connection_change(|connected| {
        if !connected {
            eprintln!("\r[disconnected]");
        }
    });
    coordinator.on_reconnecting(|attempt, _max| {
        eprintln!("\r[reconnecting, attempt {attempt}]");
    });

    if let Some(rate) = cli.refresh_rate {
        coordinator.set_refresh_rate(rate);
    }

    // Seed the screen from the REST side before the live channel opens.
    if let Err(err) = coordinator.refresh().await {
        tracing::warn!(%err, "initial refresh failed");
    }
    if let Err(err) = coordinator.connect().await {
        eprintln!("connect failed ({err}); retrying in the background");
        coordinator.manager().reset_and_reconnect();
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            content = output_rx.recv() => match content {
                Some(content) => repaint(&content)?,
                None => break,
            },
        }
    }

    coordinator.disconnect();
    Ok(())
}

fn repaint(content: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    execute!(
        stdout,
        terminal::Clear(terminal::ClearType::All),
        cursor::MoveTo(0, 0)
    )?;
    stdout.write_all(content.as_bytes())?;
    stdout.flush()
}
