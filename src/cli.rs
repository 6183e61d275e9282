use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::Result;
use tracing::info;

use crate::core::{Engine, GenerateOptions};

#[derive(Parser)]
#[command(name = "rbs-activesupport")]
#[command(about = "RBS declarations for the methods ActiveSupport macros define")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Target directory (defaults to current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Generate signatures for all configured source directories
    Generate {
        /// Source directory to analyze (repeatable)
        #[arg(short, long)]
        source: Vec<PathBuf>,

        /// Output directory for signatures
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Rewrite files even when unchanged
        #[arg(long)]
        force: bool,

        /// Fail if any signature file is out of date (useful for CI)
        #[arg(long, conflicts_with = "force")]
        check: bool,
    },

    /// Print the signatures generated for one file
    Show {
        /// Ruby source file
        file: PathBuf,
    },

    /// Print the macro calls found in one file
    Inspect {
        /// Ruby source file
        file: PathBuf,

        /// Emit JSON instead of a listing
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn execute(self, engine: Engine) -> Result<()> {
        match self.command {
            Commands::Init { path, force } => {
                engine.init(path, force).await?;
                Ok(())
            }
            Commands::Generate { source, output, force, check } => {
                let options = GenerateOptions {
                    sources: source,
                    output,
                    force,
                    check,
                };
                engine.generate(options).await?;
                Ok(())
            }
            Commands::Show { file } => {
                match engine.show(&file).await? {
                    Some(rbs) => print!("{}", rbs),
                    None => info!("No macro-defined methods in {}", file.display()),
                }
                Ok(())
            }
            Commands::Inspect { file, json } => {
                let parsed = engine.inspect(&file).await?;

                if json {
                    println!("{}", parsed.to_json()?);
                    return Ok(());
                }

                for (namespace, calls) in parsed.extraction.calls.iter() {
                    println!("{}", namespace);
                    for call in calls {
                        let visibility = if call.private { " (private)" } else { "" };
                        println!("  {}: {}{}", call.line, call.macro_def.method_name(), visibility);
                    }
                }
                Ok(())
            }
        }
    }
}
