use clap::{Parser, Subcommand};
use fe_waf::cli;
use anyhow::Result;

#[derive(Parser)]
#[command(name = "fe-waf")]
#[command(version = fe_waf::VERSION)]
#[command(about = "Rule-evaluation core for an inline web application firewall", long_about = None)]
struct Cli {
    /// Diagnostic log level
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Diagnostic log format: json, pretty or plain
    #[arg(long, global = true, default_value = "plain")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config(cli::config::ConfigArgs),

    /// Rule inspection and offline request tests
    Waf(cli::waf::WafArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    fe_waf::logging::init_logging(&cli.log_level, &cli.log_format)?;
    fe_waf::metrics::init_metrics();

    match cli.command {
        Commands::Config(args) => cli::config::run(args),
        Commands::Waf(args) => cli::waf::run(args),
    }
}
