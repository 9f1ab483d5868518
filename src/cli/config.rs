use clap::{Args, Subcommand};
use anyhow::{Context, Result};
use crate::Config;
use std::path::PathBuf;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate a configuration file and build a firewall from it
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the effective configuration, defaults filled in
    Show {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

pub fn run(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Check { config } => {
            println!("Checking configuration: {}", config.display());

            let cfg = Config::from_file(&config)?;
            let warnings = cfg.validate()?;
            let errors = warnings.iter().filter(|w| w.starts_with("[X]")).count();

            if warnings.is_empty() {
                println!(" Configuration is valid!");
            } else {
                println!("Configuration loaded with warnings:\n");
                for warning in &warnings {
                    println!("{}", warning);
                }
            }

            if errors > 0 {
                anyhow::bail!("{} configuration error(s) found", errors);
            }

            let (_, fw) = super::load_firewall(Some(config.as_path()))?;
            println!();
            println!(" Firewall builds: mode={}, rules={}", fw.config().mode, fw.rules().len());

            Ok(())
        }

        ConfigCommand::Show { config } => {
            let cfg = match config {
                Some(path) => Config::from_file(&path)?,
                None => Config::default(),
            };
            let rendered = toml::to_string_pretty(&cfg).context("Failed to serialize config")?;
            println!("{}", rendered);
            Ok(())
        }
    }
}
