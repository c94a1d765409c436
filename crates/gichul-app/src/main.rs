use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use gichul_app::cli::{Cli, Commands};
use gichul_app::config;
use gichul_app::error::{AppError, EXIT_VALIDATION_ERROR};
use gichul_app::exam::{IssueLevel, ValidationResult, answer_key};
use gichul_app::server;
use gichul_app::services::docparse;
use gichul_app::services::orchestrator::{
    ModelSpec, Orchestrator, ParseError, ParseOptions, ParseOutcome, model_specs,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(determine_log_level(&cli));

    match run(cli).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(error) => {
            eprintln!("{error}");
            process::exit(error.exit_code());
        }
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt().with_max_level(level).with_target(false).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("tracing subscriber already set; skipping re-initialization");
    }
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    match cli.command.as_ref() {
        Some(Commands::Serve(_)) => match cli.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
        None => match cli.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
    }
}

async fn run(cli: Cli) -> Result<i32, AppError> {
    if let Some(Commands::Serve(_)) = cli.command {
        let settings = config::load()?;
        server::serve(settings).await?;
        return Ok(0);
    }

    if cli.list_models {
        print_models();
        return Ok(0);
    }

    if cli.list_ocr {
        print_engines();
        return Ok(0);
    }

    let Some(pdf_path) = cli.pdf_path.clone() else {
        Cli::print_help();
        return Ok(0);
    };

    let settings = config::load()?;
    let model_spec: ModelSpec = cli.model.parse().map_err(ParseError::Config)?;
    let options = ParseOptions {
        explain: !cli.skip_explain,
        dpi: cli.dpi,
    };

    let spinner = make_spinner(&format!("Parsing with {model_spec}"));
    let orchestrator = Arc::new(Orchestrator::new(settings));
    let outcome = orchestrator.parse(&pdf_path, &model_spec, &options).await;
    spinner.finish_and_clear();
    let outcome = outcome?;

    print_summary(&model_spec, &outcome);

    if let Some(key_path) = cli.answer_key.as_deref() {
        run_answer_key_check(key_path, &outcome)?;
    }

    if cli.validate || !outcome.validation.errors.is_empty() {
        print_validation(&outcome.validation);
    }

    if let Some(output_path) = cli.output.as_deref() {
        let report = serde_json::json!({
            "model_spec": model_spec.to_string(),
            "parsed_exam": outcome.parsed_exam,
            "validation": outcome.validation,
            "cost": outcome.cost,
            "parser_warnings": outcome.parser_warnings,
        });
        std::fs::write(output_path, serde_json::to_string_pretty(&report)?).map_err(|source| {
            AppError::Io {
                path: output_path.to_path_buf(),
                source,
            }
        })?;
        println!("results saved to {}", output_path.display());
    }

    if cli.validate && !outcome.validation.errors.is_empty() {
        return Ok(EXIT_VALIDATION_ERROR);
    }
    Ok(0)
}

fn print_models() {
    println!("{:<32} {:>14} {:>14}", "model", "input $/1M", "output $/1M");
    for info in model_specs() {
        println!(
            "{:<32} {:>14.2} {:>14.2}",
            info.model_spec, info.input_price_per_1m, info.output_price_per_1m
        );
    }
}

fn print_engines() {
    println!("{:<12} available", "engine");
    for engine in docparse::list_engines() {
        println!(
            "{:<12} {}",
            engine.name,
            if engine.available { "yes" } else { "no" }
        );
    }
}

fn print_summary(model_spec: &ModelSpec, outcome: &ParseOutcome) {
    let info = &outcome.parsed_exam.exam_info;
    println!("== {} ==", model_spec);
    println!("title:            {}", info.title);
    println!("subject:          {}", info.subject);
    println!("total questions:  {}", info.total_questions);
    println!("pages processed:  {}", outcome.cost.pages_processed);
    println!(
        "tokens:           {} in / {} out",
        outcome.cost.input_tokens, outcome.cost.output_tokens
    );
    println!("cost:             ${:.4}", outcome.cost.cost_usd);
    println!("llm retries:      {}", outcome.cost.llm_retries);
    println!(
        "layer seconds:    parse {:.2} / structure {:.2} / validate {:.2} / explain {:.2}",
        outcome.cost.timings.document_parse_seconds,
        outcome.cost.timings.structuring_seconds,
        outcome.cost.timings.validation_seconds,
        outcome.cost.timings.explanation_seconds,
    );
    for warning in &outcome.parser_warnings {
        println!("parser warning:   {warning}");
    }
}

fn print_validation(validation: &ValidationResult) {
    if validation.errors.is_empty() {
        println!("validation: OK ({} warnings)", validation.warnings.len());
    } else {
        println!(
            "validation: FAILED ({} errors, {} warnings)",
            validation.errors.len(),
            validation.warnings.len()
        );
    }

    for issue in validation.errors.iter().chain(validation.warnings.iter()) {
        let prefix = match issue.level {
            IssueLevel::Error => "ERROR",
            IssueLevel::Warning => "WARN ",
        };
        match issue.question_number {
            Some(number) => println!("  {prefix} {} Q{number}: {}", issue.code, issue.message),
            None => println!("  {prefix} {}: {}", issue.code, issue.message),
        }
    }
}

fn run_answer_key_check(key_path: &Path, outcome: &ParseOutcome) -> Result<(), AppError> {
    let text = std::fs::read_to_string(key_path).map_err(|source| AppError::Io {
        path: key_path.to_path_buf(),
        source,
    })?;
    let key = answer_key::parse_answer_md(&text);
    let findings = answer_key::cross_reference(&outcome.parsed_exam, &key);

    if findings.is_empty() {
        println!(
            "answer key: all {} entries match the parsed exam",
            key.entries.len()
        );
    } else {
        println!("answer key: {} finding(s)", findings.len());
        for finding in findings {
            println!("  {finding}");
        }
    }
    Ok(())
}

fn make_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}
