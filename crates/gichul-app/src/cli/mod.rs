//! Command-line surface.

use std::path::PathBuf;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

use crate::pdf::DEFAULT_DPI;
use crate::services::orchestrator::DEFAULT_MODEL_SPEC;

/// Top-level CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "gichul",
    version,
    about = "Korean exam PDF parsing: document parser + LLM structuring + validation",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Exam PDF to parse.
    pub pdf_path: Option<PathBuf>,

    /// Model spec, `{parser}+{llm}`.
    #[arg(short = 'm', long = "model", default_value = DEFAULT_MODEL_SPEC)]
    pub model: String,

    /// Write the parse result to this JSON file.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Run the validation layer; exit non-zero when it reports errors.
    #[arg(long)]
    pub validate: bool,

    /// Markdown answer key to cross-reference.
    #[arg(long = "answer-key")]
    pub answer_key: Option<PathBuf>,

    /// List supported model specs and exit.
    #[arg(long = "list-models")]
    pub list_models: bool,

    /// List document parser engines and exit.
    #[arg(long = "list-ocr")]
    pub list_ocr: bool,

    /// Skip explanation generation.
    #[arg(long = "skip-explain")]
    pub skip_explain: bool,

    /// Rasterization DPI (72-600).
    #[arg(long, default_value_t = DEFAULT_DPI)]
    pub dpi: u32,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP parsing service.
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs;
