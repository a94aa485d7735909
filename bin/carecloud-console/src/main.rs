// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use anyhow::{Context, Result};
use carecloud::router::Domain;
use carecloud::{Coordinator, CoreConfig};
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "carecloud-console")]
#[command(about = "Ask the clinic database questions in plain language")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Answer a single request and exit.
    #[arg(long)]
    once: Option<String>,

    /// Skip domain classification and send every request to this domain.
    #[arg(short, long)]
    domain: Option<String>,

    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();

    let filter = if args.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("debug,sqlx=info,reqwest=info,hyper=info,hyper_util=info,rustls=info")
        })
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,sqlx=warn,reqwest=warn,hyper=warn,hyper_util=warn,rustls=warn")
        })
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    info!("Starting carecloud console");

    let mut config = match &args.config {
        Some(path) => CoreConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CoreConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("applying environment overrides")?;
    let coordinator = Coordinator::connect(&config)
        .await
        .context("starting the coordinator")?;
    info!("Coordinator ready");

    if let Some(request) = args.once.as_deref() {
        let (reply, _) = coordinator.process(request, args.domain.as_deref()).await;
        println!("{reply}");
        return Ok(());
    }

    print_banner();
    repl(&coordinator, args.domain.as_deref()).await
}

fn print_banner() {
    println!("\nCareCloud Console");
    println!("═══════════════════════════════════════════════════════════════");
    println!("Ask about medicines, patients, stock or appointments, e.g.");
    println!("   \"Which medicines expire in the next month?\"");
    println!("   \"Show vitals for patient 6fa459ea-ee8a-3ca4-894e-db77e160355e\"");
    println!("   \"What needs reordering?\"");
    println!();
    println!("Commands:");
    println!("   @<domain> <text>  route straight to a domain (medicine, monitoring,");
    println!("                     stock, scheduling, database)");
    println!("   status            handler status and database health");
    println!("   metrics           request and query loop counters");
    println!("   exit | quit       leave");
    println!("═══════════════════════════════════════════════════════════════");
}

async fn repl(coordinator: &Coordinator, default_hint: Option<&str>) -> Result<()> {
    loop {
        print!("\n> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input.to_ascii_lowercase().as_str() {
            "exit" | "quit" => {
                println!("Goodbye!");
                break;
            }
            "status" => {
                for (name, healthy) in coordinator.health().await {
                    println!("  {name:<16} {}", if healthy { "ok" } else { "DOWN" });
                }
                continue;
            }
            "metrics" => {
                for (name, value) in coordinator.metrics() {
                    println!("  {name:<40} {value}");
                }
                continue;
            }
            _ => {}
        }

        let (hint, text) = split_hint(input);
        let hint = hint.or(default_hint);
        if let Some(h) = hint {
            if h.parse::<Domain>().is_err() {
                warn!(hint = h, "Unknown domain, classifying instead");
            }
        }

        println!("{}", "─".repeat(80));
        let (reply, domain) = coordinator.process(text, hint).await;
        println!("{reply}");
        println!("{}", "─".repeat(80));
        info!(domain = %domain, "Request answered");
    }
    Ok(())
}

/// `@stock what is low?` becomes `(Some("stock"), "what is low?")`.
fn split_hint(input: &str) -> (Option<&str>, &str) {
    match input.strip_prefix('@') {
        Some(rest) => match rest.split_once(char::is_whitespace) {
            Some((hint, text)) => (Some(hint), text.trim_start()),
            None => (Some(rest), ""),
        },
        None => (None, input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_prefix_is_split_off() {
        assert_eq!(split_hint("@stock what is low?"), (Some("stock"), "what is low?"));
        assert_eq!(split_hint("what is low?"), (None, "what is low?"));
        assert_eq!(split_hint("@medicine"), (Some("medicine"), ""));
    }

    #[test]
    fn cli_accepts_once_and_domain() {
        let cli = Cli::parse_from(["carecloud-console", "--once", "list suppliers", "--domain", "stock"]);
        assert_eq!(cli.once.as_deref(), Some("list suppliers"));
        assert_eq!(cli.domain.as_deref(), Some("stock"));
        assert!(cli.config.is_none());
    }
}
