use anyhow::{Context, Result};
use async_openai::{Client, config::OpenAIConfig};
use chrono::Local;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    io::IsTerminal,
    path::{Path, PathBuf},
    time::Instant,
};
use tsv_llm::{
    configs::AppConfig,
    control::{RunControl, RunObserver, TracingObserver},
    runner::{RunOutcome, RunStatus, run_translation},
    translators::{DryRunTranslator, LlmTranslator, TranslationClient},
};

#[derive(Parser)]
#[command(name = "tsv-llm")]
#[command(about = "Translate tab-delimited dialogue tables using LLM", long_about = None)]
struct Args {
    #[arg(value_parser = check_file_exists, help = "Path to TOML configuration file")]
    config_path: PathBuf,

    #[arg(short, long, help = "Table to translate (overrides project.input_file)")]
    input: Option<PathBuf>,

    #[arg(short, long, help = "Dry run mode (no actual translation)")]
    dry_run: bool,

    #[arg(short, long, help = "Force write even in dry run mode")]
    force_write: bool,

    #[arg(long, help = "Log prompts, raw responses and token usage")]
    debug: bool,
}

fn check_file_exists(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("File '{}' not found", s))
    }
}

fn init_logging(debug: bool) {
    use tracing_subscriber::EnvFilter;
    let default_directives = if debug { "info,tsv_llm=debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Shows progress on a bar and prints the run log above it.
struct ProgressObserver {
    pb: ProgressBar,
}

impl RunObserver for ProgressObserver {
    fn on_progress(&self, percent: f64) {
        self.pb.set_position(percent.clamp(0.0, 100.0).round() as u64);
    }

    fn on_log(&self, message: &str) {
        self.pb
            .println(format!("[{}] {}", Local::now().format("%H:%M:%S"), message));
    }
}

/// First Ctrl-C stops after the batch in flight, the second aborts without saving,
/// the third exits immediately.
fn spawn_interrupt_handler(control: RunControl) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        control.stop();
        eprintln!("⏸️  Stopping after the current batch (Ctrl-C again to abort)");

        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        control.abort();
        eprintln!("🛑 Aborting, nothing will be saved (Ctrl-C again to exit now)");

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();
    let args = Args::parse();
    init_logging(args.debug);

    println!("🌍 TSV-LLM Translator");

    let mut config = AppConfig::load(&args.config_path)?;
    if let Some(input) = &args.input {
        config.project.input_file = std::path::absolute(input)
            .with_context(|| format!("Invalid input path '{}'", input.display()))?;
    }

    let config_dir = args.config_path.parent().unwrap_or(Path::new("."));
    let mut settings = config
        .to_settings(config_dir)
        .context("Invalid configuration")?;
    settings.write_back = !args.dry_run || args.force_write;

    println!("📋 Config: {}", args.config_path.display());
    println!("📄 Input: {}", settings.input_file.display());
    println!(
        "🎯 {} ({}) -> {} ({})",
        settings.prompt.languages.source,
        settings.prompt.fields.source_header,
        settings.prompt.languages.target,
        settings.prompt.fields.target_header
    );
    println!(
        "📦 Output tokens: {} (thinking {}, factor {})",
        settings.budget.output_tokens, settings.budget.thinking_tokens, settings.budget.token_factor
    );

    if args.dry_run {
        println!("🔍 Mode: DRY RUN");
    }

    let client: Box<dyn TranslationClient> = if args.dry_run {
        Box::new(DryRunTranslator {
            target_language: settings.prompt.languages.target.clone(),
            fields: settings.prompt.fields.clone(),
        })
    } else {
        Box::new(LlmTranslator {
            client: Client::with_config(
                OpenAIConfig::new()
                    .with_api_base(&config.llm.api_base)
                    .with_api_key(&config.llm.api_key),
            ),
            model: config.llm.model.clone(),
            timeout: config.request_timeout(),
            thinking_config: config.llm.thinking_config,
            safety_settings: config.llm.safety_settings.clone(),
        })
    };

    let control = RunControl::new();
    spawn_interrupt_handler(control.clone());

    let progress = if std::io::stderr().is_terminal() {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% ({elapsed})")?
                .progress_chars("█▓▒░"),
        );
        Some(pb)
    } else {
        None
    };

    let outcome = match &progress {
        Some(pb) => {
            let observer = ProgressObserver { pb: pb.clone() };
            run_translation(&settings, client.as_ref(), &control, &observer).await
        }
        None => run_translation(&settings, client.as_ref(), &control, &TracingObserver).await,
    }
    .with_context(|| format!("Failed to translate '{}'", settings.input_file.display()))?;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    print_summary(&outcome, start_time);

    if !outcome.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_summary(outcome: &RunOutcome, start_time: Instant) {
    let status = match outcome.status {
        RunStatus::NothingToDo => "✅ Nothing to translate",
        RunStatus::Completed => "✅ Completed",
        RunStatus::Stopped => "⏸️ Stopped",
        RunStatus::Failed => "❌ Failed",
        RunStatus::Aborted => "🛑 Aborted",
    };

    println!("\n📊 Summary");
    println!("{}", status);
    println!(
        "📝 Translated: {} of {} selected rows ({} total) in {} batches",
        outcome.translated_rows, outcome.selected_rows, outcome.total_rows, outcome.batches_sent
    );
    if !outcome.skipped.is_empty() {
        println!(
            "⚠️  Skipped (too large): {}",
            outcome
                .skipped
                .iter()
                .map(|nr| nr.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    if let Some(backup) = &outcome.backup {
        println!("💾 Backup: {}", backup.display());
    }
    if let Some(err) = &outcome.batch_error {
        println!("❌ Batch error: {}", err);
    }
    match &outcome.save_error {
        Some(err) => println!("❌ Save failed: {}", err),
        None if outcome.saved => println!("💾 Saved"),
        None => {}
    }
    println!("⏱️ Duration: {:.2}s\n", start_time.elapsed().as_secs_f64());
}
