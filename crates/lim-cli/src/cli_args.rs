use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use lim_core::CreateOptions;
use lim_core::options::DEFAULT_PRIVATE_KEY_FILE;

/// Top-level CLI entrypoint.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "line-item-manager",
    version,
    about = "Create header bidding line items in bulk",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create line items.
    Create(CreateArgs),
    /// Show internal resources for reference.
    Show(ShowArgs),
}

#[derive(Debug, Clone, Args)]
pub struct CreateArgs {
    /// Line item configuration file (YAML, or TOML by extension).
    #[arg(value_hint = ValueHint::FilePath)]
    pub configfile: PathBuf,

    /// Ad platform network code; overrides publisher.network_code.
    #[arg(long)]
    pub network_code: Option<i64>,

    /// Ad platform network name; overrides publisher.network_name.
    #[arg(long)]
    pub network_name: Option<String>,

    /// Path to the JSON credentials file.
    #[arg(
        short = 'k',
        long,
        default_value = DEFAULT_PRIVATE_KEY_FILE,
        value_hint = ValueHint::FilePath
    )]
    pub private_key_file: PathBuf,

    /// Path to a custom line item template.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub template: Option<PathBuf>,

    /// Path to a custom settings file.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub settings: Option<PathBuf>,

    /// Path to a custom validation schema.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub schema: Option<PathBuf>,

    /// One order for all bidders.
    #[arg(short = 's', long, action = ArgAction::SetTrue)]
    pub single_order: bool,

    /// Create one order per bidder code (repeatable).
    #[arg(short = 'b', long = "bidder-code", value_name = "CODE")]
    pub bidder_codes: Vec<String>,

    /// Create a limited number of line items prefixed with "Test: ".
    #[arg(short = 't', long, action = ArgAction::SetTrue)]
    pub test_run: bool,

    /// Report what would be created without changing anything.
    #[arg(short = 'n', long, action = ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Only log warnings and errors.
    #[arg(short = 'q', long, action = ArgAction::SetTrue)]
    pub quiet: bool,

    /// More detail (-vv for trace output).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Leave partially created orders in place when a run fails.
    #[arg(long, action = ArgAction::SetTrue)]
    pub skip_auto_archive: bool,

    /// Print every created resource as JSON.
    #[arg(long, action = ArgAction::SetTrue)]
    pub details: bool,
}

impl CreateArgs {
    pub fn to_options(&self) -> CreateOptions {
        let mut options =
            CreateOptions::new(self.configfile.clone()).with_verbosity(self.quiet, self.verbose);
        options.network_code = self.network_code;
        options.network_name = self.network_name.clone();
        options.private_key_file = self.private_key_file.clone();
        options.template = self.template.clone();
        options.settings = self.settings.clone();
        options.schema = self.schema.clone();
        options.single_order = self.single_order;
        options.bidder_codes = self.bidder_codes.clone();
        options.test_run = self.test_run;
        options.dry_run = self.dry_run;
        options.skip_auto_archive = self.skip_auto_archive;
        options.include_details = self.details;
        options
    }
}

#[derive(Debug, Clone, Args)]
pub struct ShowArgs {
    #[arg(value_enum)]
    pub resource: ShowResource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShowResource {
    Config,
    Bidders,
    Template,
    Settings,
    Schema,
}
