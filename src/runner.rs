use std::path::PathBuf;

use crate::{
    backup::create_backup,
    batching::{Batches, Step},
    configs::RunSettings,
    control::{RunControl, RunObserver, Signal, rate_limit},
    error::{BatchError, RunError},
    prompts::{build_request, decode_response, preview},
    records::{TranslatedItem, TranslationRequestItem},
    table::{load_table, write_table},
    translations::{apply_translations, extract_untranslated},
    translators::TranslationClient,
};

const PROMPT_PREVIEW_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// No row needed translation.
    NothingToDo,
    /// Every selected row was sent or skipped.
    Completed,
    /// Stop was requested; merged rows were saved.
    Stopped,
    /// A batch failed; merged rows were saved.
    Failed,
    /// Abort was requested; nothing was saved.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub backup: Option<PathBuf>,
    pub total_rows: usize,
    pub selected_rows: usize,
    /// Selected rows sent or skipped so far.
    pub processed_rows: usize,
    pub translated_rows: usize,
    pub batches_sent: usize,
    /// NR of rows too large for a single request.
    pub skipped: Vec<i64>,
    pub changed: bool,
    pub saved: bool,
    pub batch_error: Option<String>,
    pub save_error: Option<String>,
}

impl RunOutcome {
    fn new(backup: Option<PathBuf>, total_rows: usize, selected_rows: usize) -> Self {
        Self {
            status: RunStatus::Completed,
            backup,
            total_rows,
            selected_rows,
            processed_rows: 0,
            translated_rows: 0,
            batches_sent: 0,
            skipped: Vec::new(),
            changed: false,
            saved: false,
            batch_error: None,
            save_error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            RunStatus::NothingToDo | RunStatus::Completed | RunStatus::Stopped
        ) && self.save_error.is_none()
    }
}

/// Loads the table, backs it up when there is anything to translate, sends every row
/// that still needs translation in budget-sized batches, one at a time, and writes
/// the merged table back.
///
/// Only a failed load or backup is an `Err`. Batch failures end the loop and are
/// reported in the outcome after whatever was merged has been saved.
pub async fn run_translation(
    settings: &RunSettings,
    client: &dyn TranslationClient,
    control: &RunControl,
    observer: &dyn RunObserver,
) -> Result<RunOutcome, RunError> {
    let log = |message: String| observer.on_log(&message);
    let fields = &settings.prompt.fields;

    let mut table = load_table(&settings.input_file, fields).map_err(|source| RunError::Load {
        path: settings.input_file.clone(),
        source,
    })?;

    let selection = extract_untranslated(&table);
    log(format!("Total rows: {}", selection.total_rows));
    log(format!(
        "Untranslated rows: {} ({:.1}%)",
        selection.selected(),
        selection.percent()
    ));

    if selection.items.is_empty() {
        log("Nothing to translate!".to_string());
        let mut outcome = RunOutcome::new(None, selection.total_rows, 0);
        outcome.status = RunStatus::NothingToDo;
        return Ok(outcome);
    }

    // The file on disk is still the one just read, so the copy matches the loaded table.
    let backup = if settings.write_back {
        log(format!(
            "Writing backup of \"{}\"...",
            settings.input_file.display()
        ));
        let path = create_backup(&settings.input_file)?;
        log(format!("\"{}\" saved!", path.display()));
        Some(path)
    } else {
        None
    };

    let mut outcome = RunOutcome::new(backup, selection.total_rows, selection.selected());

    let mut batches = Batches::new(&selection.items, settings.budget, fields);

    while !batches.is_done() {
        match control.signal() {
            Signal::Abort => {
                log("Aborted by user request.".to_string());
                outcome.status = RunStatus::Aborted;
                return Ok(outcome);
            }
            Signal::Stop => {
                log("Stopping due to user request...".to_string());
                outcome.status = RunStatus::Stopped;
                break;
            }
            Signal::Continue => {}
        }

        let Some(step) = batches.next() else {
            break;
        };
        outcome.processed_rows = batches.consumed();

        let batch = match step {
            Step::Batch(batch) => batch,
            Step::Skipped(item) => {
                log(format!(
                    "Row with NR {} is too large and gets skipped!",
                    item.nr
                ));
                outcome.skipped.push(item.nr);
                continue;
            }
        };

        let count = batch.len();
        log(format!(
            "Sending {} {} for translation...",
            count,
            if count == 1 { "row" } else { "rows" }
        ));

        match translate_batch(batch, settings, client).await {
            Ok(items) => {
                if !items.is_empty() {
                    outcome.changed = true;
                }

                let report = apply_translations(&mut table, &items);
                if report.unmatched > 0 {
                    tracing::debug!(
                        "{} of {} returned rows matched no NR",
                        report.unmatched,
                        items.len()
                    );
                }
                if report.flattened > 0 {
                    tracing::debug!(
                        "{} translations contained tabs or line breaks",
                        report.flattened
                    );
                }

                outcome.translated_rows += report.applied;
                outcome.batches_sent += 1;
                observer.on_progress(
                    100.0 * batches.consumed() as f64 / selection.selected() as f64,
                );
            }
            Err(err) => {
                tracing::warn!("Batch of {} rows failed: {}", count, err);
                log(format!("Stopping due to error during translation!\n{}", err));
                outcome.batch_error = Some(err.to_string());
                outcome.status = RunStatus::Failed;
                break;
            }
        }

        if !batches.is_done() {
            rate_limit(settings.rate_limit).await;
        }
    }

    if control.signal() == Signal::Abort {
        log("Aborted by user request.".to_string());
        outcome.status = RunStatus::Aborted;
        return Ok(outcome);
    }

    if !outcome.changed {
        return Ok(outcome);
    }

    if !settings.write_back {
        log("Dry run, file left unchanged.".to_string());
        return Ok(outcome);
    }

    log("Saving...".to_string());
    match write_table(&settings.input_file, &table, fields) {
        Ok(()) => {
            log("File saved!".to_string());
            outcome.saved = true;
        }
        Err(err) => {
            tracing::warn!("Failed to save {}: {}", settings.input_file.display(), err);
            log(format!("Error saving CSV file: {}", err));
            outcome.save_error = Some(err.to_string());
        }
    }

    Ok(outcome)
}

async fn translate_batch(
    batch: &[TranslationRequestItem],
    settings: &RunSettings,
    client: &dyn TranslationClient,
) -> Result<Vec<TranslatedItem>, BatchError> {
    let request = build_request(batch, &settings.prompt, &settings.budget);

    tracing::debug!(
        "Sent prompt (first {} characters):\n{}",
        PROMPT_PREVIEW_CHARS,
        preview(&request.prompt(), PROMPT_PREVIEW_CHARS)
    );

    let reply = client.send(&request).await?;
    Ok(decode_response(&reply, &settings.prompt.fields)?)
}
