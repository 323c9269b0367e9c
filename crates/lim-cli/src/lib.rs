//! Command-line front end for `lim-core`.

pub mod cli_args;

use std::future::Future;
use std::io;

use anyhow::Context;
use cli_args::{Cli, Command, CreateArgs, ShowResource};
use lim_core::{
    CreationResult, LoggingDestination, RestConnector, Resource, create_line_items,
    init_logging, list_bidders, load_settings,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const EXIT_OK: i32 = 0;
pub const EXIT_USAGE: i32 = 1;
pub const EXIT_INCOMPLETE: i32 = 2;
pub const EXIT_FORCED: i32 = 130;

/// Run a parsed command line and return the process exit code.
pub async fn run(cli: Cli) -> i32 {
    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            EXIT_USAGE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Command::Create(args) => create(&args).await,
        Command::Show(args) => {
            println!("{}", show(args.resource)?);
            Ok(EXIT_OK)
        }
    }
}

async fn create(args: &CreateArgs) -> anyhow::Result<i32> {
    let options = args.to_options();
    init_logging(LoggingDestination::FileAndStderr, options.verbosity)
        .context("failed to initialize logging")?;

    let (settings, _) = load_settings(options.settings.as_deref())?;
    let connector = RestConnector::new(settings.platform.endpoint);

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, watcher).await {
            std::process::exit(EXIT_FORCED);
        }
    });

    let outcome = create_line_items(&options, &connector, cancel).await;
    interrupt.abort();
    let result = outcome?;

    println!("{}", render_result(&result)?);
    Ok(if result.success {
        EXIT_OK
    } else {
        EXIT_INCOMPLETE
    })
}

/// Cancel the run on the first signal. Resolves to `true` when a second signal arrives and
/// `false` once the signal source fails.
pub async fn watch_interrupts<F, Fut>(mut next_signal: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if next_signal().await.is_err() {
        return false;
    }
    warn!("User stopped the run; cleaning up. Interrupt again to exit without cleanup");
    cancel.cancel();

    if next_signal().await.is_err() {
        return false;
    }
    warn!("Interrupted again; exiting before cleanup finished");
    true
}

/// Text for `show <resource>`.
pub fn show(resource: ShowResource) -> anyhow::Result<String> {
    let resource = match resource {
        ShowResource::Bidders => return Ok(bidder_table()?),
        ShowResource::Config => Resource::Config,
        ShowResource::Template => Resource::Template,
        ShowResource::Settings => Resource::Settings,
        ShowResource::Schema => Resource::Schema,
    };
    Ok(resource.contents().to_string())
}

fn bidder_table() -> Result<String, lim_core::UsageError> {
    let mut out = format!("{:<25}{}\n", "Code", "Name");
    for bidder in list_bidders()? {
        out.push_str(&format!("{:<25}{}\n", bidder.code, bidder.name));
    }
    Ok(out)
}

/// Human-readable summary of a finished run.
pub fn render_result(result: &CreationResult) -> anyhow::Result<String> {
    let mut lines = Vec::new();
    if result.dry_run {
        lines.push("Dry run: no changes were made.".to_string());
    }
    lines.push(format!(
        "Line items: {}, creative associations: {}",
        result.line_item_count, result.lica_count
    ));
    if result.success {
        lines.push("Completed without errors.".to_string());
    } else {
        lines.push("Errors:".to_string());
        lines.extend(result.errors.iter().map(|err| format!("  - {err}")));
    }
    if let Some(details) = &result.details {
        lines.push(
            serde_json::to_string_pretty(details).context("failed to render created resources")?,
        );
    }
    Ok(lines.join("\n"))
}
