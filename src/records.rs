use std::collections::HashMap;

/// Columns with a fixed meaning. Source and target text columns are named at run
/// time; everything else is matched by these names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    Nr,
    FileNr,
    Id,
    Symbol,
    Use,
    Trace,
    Original,
    Translated,
    /// Unknown column, carried through untouched.
    Other(usize),
}

impl Column {
    pub const FIXED: [(&'static str, Column); 6] = [
        ("NR", Column::Nr),
        ("FILENR", Column::FileNr),
        ("ID", Column::Id),
        ("SYMBOL", Column::Symbol),
        ("USE", Column::Use),
        ("TRACE", Column::Trace),
    ];
}

/// One line of the dialogue table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub nr: Option<i64>,
    /// The NR cell as written in the file.
    pub nr_text: String,
    pub file_nr: Option<String>,
    pub id: Option<String>,
    pub symbol: Option<String>,
    pub use_: Option<String>,
    pub trace: Option<String>,
    pub original_text: String,
    pub translated_text: String,
    /// Cells of unknown header columns, by `Column::Other` index.
    pub extra: Vec<String>,
    /// Cells past the last header column.
    pub overflow: Vec<String>,
    /// Number of cells on the line when loaded; `None` for rows built in memory.
    pub width: Option<usize>,
    /// Empty lines directly above this row.
    pub blank_lines_before: usize,
}

impl Row {
    pub fn new(nr: i64, original_text: &str, translated_text: &str) -> Self {
        Self {
            nr: Some(nr),
            nr_text: nr.to_string(),
            original_text: original_text.to_string(),
            translated_text: translated_text.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn passthrough(&self, column: &Column) -> Option<&str> {
        match column {
            Column::FileNr => self.file_nr.as_deref(),
            Column::Id => self.id.as_deref(),
            Column::Symbol => self.symbol.as_deref(),
            Column::Use => self.use_.as_deref(),
            Column::Trace => self.trace.as_deref(),
            Column::Other(idx) => self.extra.get(*idx).map(String::as_str),
            Column::Nr | Column::Original | Column::Translated => None,
        }
    }

    pub(crate) fn passthrough_mut(&mut self, column: &Column) -> Option<&mut Option<String>> {
        match column {
            Column::FileNr => Some(&mut self.file_nr),
            Column::Id => Some(&mut self.id),
            Column::Symbol => Some(&mut self.symbol),
            Column::Use => Some(&mut self.use_),
            Column::Trace => Some(&mut self.trace),
            _ => None,
        }
    }
}

/// `{NR, OriginalText}` as sent to the model. Copied out of the table so batches never
/// borrow rows the merger is about to change.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRequestItem {
    pub nr: i64,
    pub original_text: String,
}

/// `{NR, TranslatedText}` as returned by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedItem {
    pub nr: Option<i64>,
    pub translated_text: String,
}

/// Header layout of a loaded file: the header cells as written, what each means, and
/// the framing bytes needed to write the file back unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layout {
    pub headers: Vec<String>,
    pub columns: Vec<Column>,
    pub crlf: bool,
    pub bom: bool,
    pub blank_lines_before_header: usize,
    pub trailing_blank_lines: usize,
    pub missing_final_newline: bool,
}

/// The whole table, kept in file order.
#[derive(Debug, Clone, Default)]
pub struct Table {
    layout: Layout,
    rows: Vec<Row>,
    by_nr: HashMap<i64, usize>,
}

impl Table {
    pub fn new(layout: Layout, rows: Vec<Row>) -> Self {
        let mut by_nr = HashMap::new();
        for (idx, row) in rows.iter().enumerate() {
            if let Some(nr) = row.nr {
                by_nr.entry(nr).or_insert(idx);
            }
        }

        Self {
            layout,
            rows,
            by_nr,
        }
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::new(Layout::default(), rows)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first row carrying `nr`.
    pub fn position_of(&self, nr: i64) -> Option<usize> {
        self.by_nr.get(&nr).copied()
    }

    /// Only the translated text may change after load; NR stays fixed so the index holds.
    pub fn set_translated_text(&mut self, idx: usize, text: String) {
        if let Some(row) = self.rows.get_mut(idx) {
            row.translated_text = text;
        }
    }
}
