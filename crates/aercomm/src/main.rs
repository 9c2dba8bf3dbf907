mod args;
mod launch;

use std::fmt::Debug;
use std::future::Future;

use aer_config::{ConfigError, RoleKind};
use aer_core::{
    run_hub, run_publisher, run_pubsuber, run_saver, run_subscriber, Registry, RegistryError,
    RoleContext, RoleError, SaverError,
};
use aer_launch::LaunchError;
use anyhow::{Context, Result};
use args::{HubArgs, LaunchArgs, PubSuberArgs, PublisherArgs, SaverArgs, SubscriberArgs};
use clap::{Parser, Subcommand};
use tracing::{error, info, Instrument};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "aercomm", about = "Event-camera communication roles and launcher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Forward every message from publishers to subscribers.
    Hub(HubArgs),
    /// Stream device batches under a master topic.
    Publisher(PublisherArgs),
    /// Receive batches and route them to a handler.
    Subscriber(SubscriberArgs),
    /// Transform received batches and publish the results.
    #[command(name = "pubsuber")]
    PubSuber(PubSuberArgs),
    /// Record received batches to a file.
    Saver(SaverArgs),
    /// Start every role of a launch description and supervise them.
    Launch(LaunchArgs),
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    init_tracing();

    let exit = run().await;
    if let Err(err) = exit {
        error!(error = %err, "aercomm exited with error");
        eprintln!("{err:#}");
        std::process::exit(exit_code(&err));
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let registry = Registry::with_builtins();
    match cli.command {
        Command::Hub(args) => {
            let options = args.into_options();
            let ctx = RoleContext::new(RoleKind::Hub, options.name.clone());
            serve(ctx, |ctx| async move { run_hub(&options, ctx).await }).await
        }
        Command::Publisher(args) => {
            let options = args.into_options();
            let ctx = RoleContext::new(RoleKind::Publisher, options.name.clone());
            serve(ctx, |ctx| run_publisher(options, &registry, ctx)).await
        }
        Command::Subscriber(args) => {
            let options = args.into_options();
            let ctx = RoleContext::new(RoleKind::Subscriber, options.name.clone());
            serve(ctx, |ctx| run_subscriber(options, &registry, ctx)).await
        }
        Command::PubSuber(args) => {
            let options = args.into_options();
            let ctx = RoleContext::new(RoleKind::PubSuber, options.name.clone());
            serve(ctx, |ctx| run_pubsuber(options, &registry, ctx)).await
        }
        Command::Saver(args) => {
            let options = args.into_options()?;
            let ctx = RoleContext::new(RoleKind::Saver, options.name.clone());
            serve(ctx, |ctx| run_saver(options, ctx)).await
        }
        Command::Launch(args) => launch::run_launch(args).await,
    }
}

/// Runs one role inside its span until it finishes or a stop signal arrives.
async fn serve<F, Fut, R>(ctx: RoleContext, role: F) -> Result<()>
where
    F: FnOnce(RoleContext) -> Fut,
    Fut: Future<Output = Result<R, RoleError>>,
    R: Debug,
{
    let span = ctx.span();
    let label = format!("{} {}", ctx.kind(), ctx.name());
    let stopper = ctx.clone();
    let signals = tokio::spawn(
        async move {
            match stop_signal().await {
                Ok(()) => info!("stop requested"),
                Err(err) => error!(error = %err, "signal handler failed"),
            }
            stopper.cancel();
        }
        .instrument(span.clone()),
    );

    let result = role(ctx).instrument(span.clone()).await;
    signals.abort();
    let report = result.with_context(|| format!("{label} failed"))?;
    span.in_scope(|| info!(?report, "role finished"));
    Ok(())
}

/// Resolves on ctrl-c, or on SIGTERM where available.
pub(crate) async fn stop_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            ctrl = tokio::signal::ctrl_c() => ctrl.context("failed to listen for ctrl-c"),
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// 2 for configuration problems caught before a role does any work, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    let config = err.chain().any(|cause| {
        cause.is::<ConfigError>()
            || matches!(
                cause.downcast_ref::<RoleError>(),
                Some(RoleError::Config(_))
                    | Some(RoleError::Saver(SaverError::BackendUnavailable(_)))
                    | Some(RoleError::Registry(
                        RegistryError::UnknownClass { .. } | RegistryError::InvalidConfig { .. }
                    ))
            )
            || matches!(cause.downcast_ref::<LaunchError>(), Some(LaunchError::Config(_)))
    });
    if config {
        2
    } else {
        1
    }
}
