use anyhow::{Context, Result};
use clap::Parser;
use pubsub_loadgen::{config, Orchestrator, SendSettings, WebSocketTransportFactory};
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(
    name = "pubsub_loadgen",
    version,
    about = "Simulates many subscribing and publishing clients against a pub/sub WebSocket server"
)]
struct Args {
    /// Path to config directory
    #[arg(long, default_value = "config")]
    config_dir: String,

    /// Number of simulated clients
    #[arg(short = 'n', long)]
    connections: Option<usize>,

    /// Channels each client subscribes to
    #[arg(short, long)]
    channels: Option<usize>,

    /// WebSocket endpoint of the server
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Messages per second sent by each client
    #[arg(short, long, conflicts_with = "delay")]
    rate: Option<f64>,

    /// Fixed delay between two messages of a client, e.g. "500ms"
    #[arg(short, long, value_parser = humantime_serde::re::humantime::parse_duration)]
    delay: Option<Duration>,

    /// Secret used to sign connection tokens
    #[arg(short, long)]
    secret: Option<String>,

    /// Channel namespace
    #[arg(long)]
    namespace: Option<String>,

    /// Opaque info attached to every connection token
    #[arg(long)]
    info: Option<String>,

    /// Connect and subscribe only, never publish
    #[arg(long)]
    no_publish: bool,

    /// Stop on its own after this long, e.g. "10m"
    #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
    duration: Option<Duration>,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long)]
    log_dir: Option<String>,
}

fn setup_tracing(log_dir: Option<&str>) -> Option<WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pubsub_loadgen=info"));

    let stdout_layer = fmt::layer()
        .with_timer(fmt::time::SystemTime)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_level(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pubsub_loadgen.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_timer(fmt::time::SystemTime)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    guard
}

#[cfg(unix)]
type TerminateSignal = tokio::signal::unix::Signal;

#[cfg(not(unix))]
type TerminateSignal = ();

#[cfg(unix)]
fn register_terminate() -> Result<TerminateSignal> {
    use tokio::signal::unix::{signal, SignalKind};
    signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")
}

#[cfg(not(unix))]
fn register_terminate() -> Result<TerminateSignal> {
    Ok(())
}

#[cfg(unix)]
async fn terminated(signal: &mut TerminateSignal) {
    signal.recv().await;
}

#[cfg(not(unix))]
async fn terminated(_signal: &mut TerminateSignal) {
    std::future::pending::<()>().await
}

/// Completes on Ctrl-C, SIGTERM or once `duration` has elapsed.
async fn stop_signal(mut terminate: TerminateSignal, duration: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Interrupt received"),
        _ = terminated(&mut terminate) => info!("Terminate signal received"),
        _ = deadline => info!("Run duration elapsed"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = setup_tracing(args.log_dir.as_deref());

    let config = config::Config::new(&args.config_dir).context("Failed to load configuration")?;
    let mut settings = config
        .get_settings()
        .context("Failed to get load settings")?;

    if let Some(connections) = args.connections {
        settings.connections = connections;
    }
    if let Some(channels) = args.channels {
        settings.channels_per_connection = channels;
    }
    if let Some(endpoint) = args.endpoint {
        settings.endpoint = endpoint;
    }
    if let Some(rate) = args.rate {
        settings.send = SendSettings::from_rate(rate);
    }
    if let Some(delay) = args.delay {
        settings.send = SendSettings::from_interval(delay);
    }
    if let Some(secret) = args.secret {
        settings.secret = secret;
    }
    if let Some(namespace) = args.namespace {
        settings.namespace = namespace;
    }
    if let Some(info) = args.info {
        settings.info = info;
    }
    if args.no_publish {
        settings.publish = false;
    }

    let factory = WebSocketTransportFactory::new(settings.endpoint.clone());
    let orchestrator =
        Orchestrator::new(settings, factory).context("Invalid load generator settings")?;
    let terminate = register_terminate()?;

    orchestrator.run(stop_signal(terminate, args.duration)).await;

    info!("Load generator finished");
    Ok(())
}
