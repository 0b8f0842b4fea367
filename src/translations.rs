use crate::records::{Row, Table, TranslatedItem, TranslationRequestItem};

/// Rows picked for translation, in table order.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub total_rows: usize,
    pub items: Vec<TranslationRequestItem>,
}

impl Selection {
    pub fn selected(&self) -> usize {
        self.items.len()
    }

    /// Selected share of the table in percent.
    pub fn percent(&self) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            self.selected() as f64 / self.total_rows as f64 * 100.0
        }
    }
}

/// True when two equal-length strings agree at every position where either has a
/// space. Such a pair is most likely an edit that never touched the word layout.
pub fn space_pattern_matches(original: &str, translated: &str) -> bool {
    if original.chars().count() != translated.chars().count() {
        return false;
    }

    original
        .chars()
        .zip(translated.chars())
        .all(|(a, b)| !(a == ' ' || b == ' ') || a == b)
}

pub fn needs_translation(row: &Row) -> bool {
    let original = row.original_text.as_str();
    let translated = row.translated_text.as_str();

    !original.is_empty()
        && row.nr.is_some()
        && (translated.is_empty()
            || translated == original
            || space_pattern_matches(original, translated))
}

pub fn extract_untranslated(table: &Table) -> Selection {
    let items = table
        .rows()
        .iter()
        .filter(|row| needs_translation(row))
        .filter_map(|row| {
            row.nr.map(|nr| TranslationRequestItem {
                nr,
                original_text: row.original_text.clone(),
            })
        })
        .collect();

    Selection {
        total_rows: table.len(),
        items,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: usize,
    pub unmatched: usize,
    /// Translations that carried tabs or line breaks.
    pub flattened: usize,
}

/// The table file has no escaping, so a cell cannot hold tabs or line breaks.
fn flatten(text: &str) -> Option<String> {
    if !text.contains(['\t', '\r', '\n']) {
        return None;
    }

    Some(
        text.replace("\r\n", " ")
            .replace(['\t', '\r', '\n'], " "),
    )
}

/// Writes each translation into the first row with the same NR. Items without NR
/// or with an NR the table does not have are dropped.
pub fn apply_translations(table: &mut Table, items: &[TranslatedItem]) -> MergeReport {
    let mut report = MergeReport::default();

    for item in items {
        let Some(idx) = item.nr.and_then(|nr| table.position_of(nr)) else {
            report.unmatched += 1;
            continue;
        };

        let text = match flatten(&item.translated_text) {
            Some(flat) => {
                report.flattened += 1;
                flat
            }
            None => item.translated_text.clone(),
        };

        table.set_translated_text(idx, text);
        report.applied += 1;
    }

    report
}
