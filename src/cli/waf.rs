use clap::{Args, Subcommand};
use anyhow::{Context, Result};
use crate::metrics::export_metrics;
use crate::waf::rules::{default_rules, RuleSetFile};
use crate::waf::{Decision, RequestParts, Transaction};
use std::fs;
use std::path::PathBuf;

#[derive(Args)]
pub struct WafArgs {
    #[command(subcommand)]
    pub command: WafCommand,
}

#[derive(Subcommand)]
pub enum WafCommand {
    /// List the rules of the effective rule sets
    Rules {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run the access phase for a synthetic request
    Test {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Request URI including the query string
        #[arg(short, long)]
        uri: String,

        /// Header as `Name: value`; repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        #[arg(short, long)]
        body: Option<String>,

        #[arg(long, default_value = "127.0.0.1")]
        remote_addr: String,

        /// Print the firewall counters afterwards
        #[arg(long)]
        metrics: bool,
    },

    /// Parse a rule-set file and report its rules
    Load {
        rules_file: PathBuf,
    },

    /// Write the built-in rule set as a rule-set file
    GenerateRules {
        #[arg(short, long, default_value = "default.toml")]
        output: PathBuf,
    },
}

pub fn run(args: WafArgs) -> Result<()> {
    match args.command {
        WafCommand::Rules { config } => {
            let (_, fw) = super::load_firewall(config.as_deref())?;

            println!("=== Active Rules ({}) ===", fw.rules().len());
            println!();
            for rule in fw.rules() {
                println!(
                    "{:<12} {:<14} {:<8} {:<12} {}",
                    rule.id,
                    rule.phase.to_string(),
                    rule.action.to_string(),
                    rule.operator.to_string(),
                    rule.description
                );
            }

            Ok(())
        }

        WafCommand::Test {
            config,
            method,
            uri,
            headers,
            body,
            remote_addr,
            metrics,
        } => {
            let (_, fw) = super::load_firewall(config.as_deref())?;

            let mut req = RequestParts::new(&method, &uri).remote_addr(&remote_addr);
            for header in &headers {
                let (name, value) = header
                    .split_once(':')
                    .with_context(|| format!("Invalid header '{}', expected 'Name: value'", header))?;
                req = req.header(name.trim(), value.trim());
            }
            if let Some(body) = body {
                req = req.body(body);
            }

            println!("=== Testing WAF Rules ===");
            println!();
            println!("Mode: {}", fw.config().mode);
            println!("Request: {} {}", method, uri);
            println!();

            let mut tx = Transaction::new(fw);
            let decision = tx.access(&req);
            let score = tx.context().score;

            for record in &tx.context().matches {
                println!("[!] Rule matched: {} ({})", record.rule_id, record.description);
                println!("   Action: {}", record.action);
                println!("   Matched: {}", record.matched);
            }
            println!();
            println!("Score: {}", score);
            println!("Decision: {}", decision);
            if let Decision::Deny { status } = decision {
                println!("   The host would respond with HTTP {}", status);
            }

            if let Some(event) = tx.finish() {
                println!();
                println!("Event: {}", event.to_json());
            }
            crate::logging::sinks::shutdown();

            if metrics {
                println!();
                print!("{}", export_metrics()?);
            }

            Ok(())
        }

        WafCommand::Load { rules_file } => {
            println!("Loading WAF rules from: {}", rules_file.display());

            let rules = RuleSetFile::load(&rules_file)?;

            println!("[OK] Loaded {} rules", rules.len());

            Ok(())
        }

        WafCommand::GenerateRules { output } => {
            println!("Generating built-in rules...");
            println!("Output: {}", output.display());

            let file = RuleSetFile {
                rules: default_rules(),
            };
            let content = toml::to_string_pretty(&file).context("Failed to serialize rules")?;
            fs::write(&output, content)
                .with_context(|| format!("Failed to write {}", output.display()))?;

            println!("[OK] Generated {} rules", file.rules.len());

            Ok(())
        }
    }
}
