// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! spacey-amd CLI - inspect how the AMD loader resolves module ids
//!
//! ## Features
//!
//! - Resolve ids to canonical module ids and fetch locations
//! - Map resource paths to locations
//! - Interactive resolver with history

mod repl;

use anyhow::Context;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use spacey_loader::module_system::ModuleResolver;
use spacey_loader::{Config, VERSION};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "spacey-amd",
    about = "AMD module loader for the Spacey runtime",
    version = VERSION,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Loader configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve module ids to canonical ids and locations
    Resolve {
        /// Module ids, possibly relative
        #[arg(required = true)]
        ids: Vec<String>,

        /// Resolve relative to this module id
        #[arg(long)]
        from: Option<String>,
    },

    /// Compute locations for resource paths
    Url {
        /// Resource paths such as `./style.css`
        #[arg(required = true)]
        paths: Vec<String>,

        /// Resolve relative to this module id
        #[arg(long)]
        from: Option<String>,
    },

    /// Start the interactive resolver
    Repl,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("spacey_loader=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("spacey_loader=warn")
            .init();
    }

    let resolver = load_resolver(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Repl) {
        Command::Resolve { ids, from } => {
            for id in &ids {
                print_resolution(&resolver, id, from.as_deref());
            }
        }
        Command::Url { paths, from } => {
            for path in &paths {
                println!(
                    "{} {} {}",
                    path.cyan(),
                    "->".dimmed(),
                    resolver.to_url(path, from.as_deref()).green()
                );
            }
        }
        Command::Repl => {
            let mut repl = repl::Repl::new(resolver).context("failed to initialize REPL")?;
            repl.run()?;
        }
    }

    Ok(())
}

/// Build a resolver, applying the configuration file when one is given
pub(crate) fn load_resolver(config: Option<&Path>) -> anyhow::Result<ModuleResolver> {
    let mut resolver = ModuleResolver::new();
    if let Some(path) = config {
        let config = Config::from_file(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        resolver.configure(&config)?;
    }
    Ok(resolver)
}

/// Print the identity `id` resolves to
pub(crate) fn print_resolution(resolver: &ModuleResolver, id: &str, from: Option<&str>) {
    let info = resolver.resolve(id, from);
    println!("{}", id.cyan().bold());
    println!("  {:8} {}", "mid".dimmed(), info.mid.white());
    if !info.pid.is_empty() {
        println!("  {:8} {}", "package".dimmed(), info.pid.yellow());
    }
    println!("  {:8} {}", "url".dimmed(), info.url.green());
}
