// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::config::GuardConfig;
use crate::guard::{ContentGuard, GuardPorts};
use crate::safety::auditor::AuditError;
use crate::safety::types::{Domain, Submission};

/// Content guard CLI
#[derive(Parser, Debug)]
#[command(name = "content-guard")]
#[command(version = "0.1.0")]
#[command(about = "Prompt admission checks for image generation", long_about = None)]
pub struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true, env = "GUARD_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Audit a prompt and print the decision
    Audit(AuditArgs),

    /// Load and validate configuration
    CheckConfig,

    /// List the categories the local rules can report
    Rules,
}

/// Arguments for the audit command
#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Prompt text
    #[arg(long)]
    pub prompt: String,

    /// Negative prompt text
    #[arg(long)]
    pub negative_prompt: Option<String>,

    /// Audit as a strict (SFW-only) domain submission
    #[arg(long)]
    pub strict: bool,

    /// User the submission is attributed to
    #[arg(long, default_value = "cli")]
    pub user: String,
}

fn load_config(path: Option<&str>) -> Result<GuardConfig> {
    let config = match path {
        Some(path) => GuardConfig::from_file(path)?,
        None => GuardConfig::from_env(),
    };
    config.validate().map_err(|e| anyhow!(e))?;
    Ok(config)
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Audit(args) => audit(&config, args).await,
        Commands::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            info!("Configuration is valid");
            Ok(())
        }
        Commands::Rules => {
            let guard = ContentGuard::from_config(&config, GuardPorts::in_memory())?;
            for category in guard.auditor.patterns().categories() {
                println!("{}", category);
            }
            Ok(())
        }
    }
}

async fn audit(config: &GuardConfig, args: AuditArgs) -> Result<()> {
    let guard = ContentGuard::from_config(config, GuardPorts::in_memory())?;

    let mut submission = Submission::new(args.user, args.prompt);
    if let Some(negative) = args.negative_prompt {
        submission = submission.with_negative_prompt(negative);
    }
    if args.strict {
        submission = submission.with_domain(Domain::Strict);
    }

    let outcome = guard.auditor.evaluate(&submission).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    match guard.auditor.enforce(&submission, outcome).await {
        Ok(()) => {
            println!("admitted");
            Ok(())
        }
        Err(AuditError::PolicyViolation(v)) => {
            println!("denied: {}", v.message);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
