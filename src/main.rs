use clap::{Parser, Subcommand};

use gatehouse::cli::{request, serve};

#[derive(Parser)]
#[command(
    name = "gatehouse",
    version,
    about = "Cross-process approval coordination for AI coding assistant tool calls"
)]
struct Cli {
    /// Verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the approval coordinator.
    Serve(serve::ServeArgs),
    /// Submit one approval request and wait for the outcome.
    Request(request::RequestArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => serve::run(args).await?,
        Command::Request(args) => {
            let code = request::run(args).await?;
            std::process::exit(code);
        }
    }
    Ok(())
}
