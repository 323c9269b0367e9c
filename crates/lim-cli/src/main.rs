use clap::Parser;
use lim_cli::cli_args::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = lim_cli::run(cli).await;
    if code != lim_cli::EXIT_OK {
        std::process::exit(code);
    }
}
