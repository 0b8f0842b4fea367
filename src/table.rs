use std::{fs, path::Path};

use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};

use crate::{
    backup::write_atomically,
    error::TableError,
    prompts::FieldMap,
    records::{Column, Layout, Row, Table},
};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub fn load_table(path: &Path, fields: &FieldMap) -> Result<Table, TableError> {
    let bytes = fs::read(path)?;
    parse_table(&bytes, fields)
}

/// Parses a tab-delimited table. No quoting: every cell is taken literally.
/// Short rows are allowed. Unknown columns, cells past the header, the raw NR text
/// and the blank-line layout are kept aside for writing back.
pub fn parse_table(bytes: &[u8], fields: &FieldMap) -> Result<Table, TableError> {
    let bom = bytes.starts_with(UTF8_BOM);
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let crlf = bytes.windows(2).any(|w| w == b"\r\n");
    let missing_final_newline = !bytes.is_empty() && !bytes.ends_with(b"\n");
    let (blank_runs, trailing_blank_lines) = blank_line_runs(bytes);
    let mut blank_runs = blank_runs.into_iter();

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    if headers.is_empty() {
        return Err(TableError::MissingHeader);
    }
    let blank_lines_before_header = blank_runs.next().unwrap_or_default();

    let columns = resolve_columns(&headers, fields);
    let extra_len = columns
        .iter()
        .filter(|c| matches!(c, Column::Other(_)))
        .count();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        let mut row = Row {
            extra: vec![String::new(); extra_len],
            width: Some(record.len()),
            blank_lines_before: blank_runs.next().unwrap_or_default(),
            ..Row::default()
        };

        for (idx, cell) in record.iter().enumerate() {
            let Some(column) = columns.get(idx) else {
                row.overflow.push(cell.to_string());
                continue;
            };

            match column {
                Column::Nr => {
                    row.nr_text = cell.to_string();
                    let value = cell.trim();
                    if !value.is_empty() {
                        let nr = value.parse::<i64>().map_err(|_| TableError::InvalidNr {
                            line,
                            value: value.to_string(),
                        })?;
                        row.nr = Some(nr);
                    }
                }
                Column::Original => row.original_text = cell.to_string(),
                Column::Translated => row.translated_text = cell.to_string(),
                Column::Other(idx) => row.extra[*idx] = cell.to_string(),
                fixed => {
                    if let Some(slot) = row.passthrough_mut(fixed) {
                        *slot = Some(cell.to_string());
                    }
                }
            }
        }

        rows.push(row);
    }

    Ok(Table::new(
        Layout {
            headers,
            columns,
            crlf,
            bom,
            blank_lines_before_header,
            trailing_blank_lines,
            missing_final_newline,
        },
        rows,
    ))
}

/// Counts the empty lines in front of every non-empty line, in file order, plus the
/// empty lines after the last one. The reader skips empty lines, so these counts line
/// up one to one with the header and the records.
fn blank_line_runs(bytes: &[u8]) -> (Vec<usize>, usize) {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let mut runs = Vec::new();
    let mut blanks = 0;

    if body.is_empty() {
        return (runs, 0);
    }

    for line in body.split(|b| *b == b'\n') {
        if line.is_empty() || line == b"\r" {
            blanks += 1;
        } else {
            runs.push(blanks);
            blanks = 0;
        }
    }

    (runs, blanks)
}

fn resolve_columns(headers: &[String], fields: &FieldMap) -> Vec<Column> {
    let source = fields.source_header.trim().to_uppercase();
    let target = fields.target_header.trim().to_uppercase();

    let mut columns: Vec<Column> = Vec::with_capacity(headers.len());
    let mut others = 0;

    for header in headers {
        let name = header.trim().to_uppercase();

        let candidate = if name == source {
            Some(Column::Original)
        } else if name == target {
            Some(Column::Translated)
        } else {
            Column::FIXED
                .iter()
                .find(|(fixed, _)| *fixed == name)
                .map(|(_, column)| column.clone())
        };

        // A repeated header keeps only its first occurrence meaningful.
        let column = match candidate {
            Some(column) if !columns.contains(&column) => column,
            _ => {
                others += 1;
                Column::Other(others - 1)
            }
        };
        columns.push(column);
    }

    columns
}

/// Header cells and column meanings used when writing. Tables built in memory get the
/// canonical layout; a loaded table without a target column gains one at the end.
fn output_layout(layout: &Layout, fields: &FieldMap) -> (Vec<String>, Vec<Column>) {
    if layout.columns.is_empty() {
        let mut headers: Vec<String> = Column::FIXED
            .iter()
            .map(|(name, _)| name.to_string())
            .collect();
        let mut columns: Vec<Column> = Column::FIXED.iter().map(|(_, c)| c.clone()).collect();
        headers.extend([fields.source_header.clone(), fields.target_header.clone()]);
        columns.extend([Column::Original, Column::Translated]);
        return (headers, columns);
    }

    let mut headers = layout.headers.clone();
    let mut columns = layout.columns.clone();
    if !columns.contains(&Column::Original) {
        headers.push(fields.source_header.clone());
        columns.push(Column::Original);
    }
    if !columns.contains(&Column::Translated) {
        headers.push(fields.target_header.clone());
        columns.push(Column::Translated);
    }
    (headers, columns)
}

/// Cells of one row in output order. Loaded rows keep their original cell count,
/// growing only as far as a newly set translation needs.
fn row_cells<'r>(row: &'r Row, columns: &[Column], header_len: usize) -> Vec<&'r str> {
    let mut cells: Vec<&str> = columns
        .iter()
        .map(|column| match column {
            Column::Nr => row.nr_text.as_str(),
            Column::Original => row.original_text.as_str(),
            Column::Translated => row.translated_text.as_str(),
            other => row.passthrough(other).unwrap_or_default(),
        })
        .collect();

    if let Some(width) = row.width {
        let mut keep = width.min(header_len);
        if !row.translated_text.is_empty() {
            if let Some(idx) = columns.iter().position(|c| *c == Column::Translated) {
                keep = keep.max(idx + 1);
            }
        }
        cells.truncate(keep);
    }

    cells.extend(row.overflow.iter().map(String::as_str));
    cells
}

pub fn render_table(table: &Table, fields: &FieldMap) -> Result<Vec<u8>, TableError> {
    let layout = table.layout();
    let (headers, columns) = output_layout(layout, fields);
    let (terminator, line_end): (Terminator, &[u8]) = if layout.crlf {
        (Terminator::CRLF, b"\r\n")
    } else {
        (Terminator::Any(b'\n'), b"\n")
    };

    let mut out = Vec::new();
    if layout.bom {
        out.extend_from_slice(UTF8_BOM);
    }
    out.extend(line_end.repeat(layout.blank_lines_before_header));

    let mut builder = WriterBuilder::new();
    builder
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .terminator(terminator)
        .flexible(true);
    let mut writer = builder.from_writer(out);

    writer.write_record(&headers)?;

    for row in table.rows() {
        if row.blank_lines_before > 0 {
            let mut inner = writer
                .into_inner()
                .map_err(|e| TableError::Io(e.into_error()))?;
            inner.extend(line_end.repeat(row.blank_lines_before));
            writer = builder.from_writer(inner);
        }
        writer.write_record(row_cells(row, &columns, layout.headers.len()))?;
    }

    let mut out = writer.into_inner().map_err(|e| TableError::Io(e.into_error()))?;
    out.extend(line_end.repeat(layout.trailing_blank_lines));
    if layout.missing_final_newline && out.ends_with(line_end) {
        out.truncate(out.len() - line_end.len());
    }

    Ok(out)
}

/// Overwrites `path` with the table. Goes through a temporary file so a crash
/// never leaves a half-written table behind.
pub fn write_table(path: &Path, table: &Table, fields: &FieldMap) -> Result<(), TableError> {
    let bytes = render_table(table, fields)?;
    write_atomically(path, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> FieldMap {
        FieldMap::new("DE", "EN")
    }

    const SAMPLE: &str = "NR\tFILENR\tID\tSYMBOL\tUSE\tTRACE\tDE\tEN\n\
                          1\t3\t007\tDIA_Hallo\tinfo\tt1\tHallo\t\n\
                          2\t3\t008\tDIA_Welt\tinfo\tt2\tWelt\tWorld\n";

    #[test]
    fn loads_fixed_and_mapped_columns() {
        let table = parse_table(SAMPLE.as_bytes(), &fields()).unwrap();

        assert_eq!(table.len(), 2);
        let first = &table.rows()[0];
        assert_eq!(first.nr, Some(1));
        assert_eq!(first.id.as_deref(), Some("007"));
        assert_eq!(first.symbol.as_deref(), Some("DIA_Hallo"));
        assert_eq!(first.original_text, "Hallo");
        assert_eq!(first.translated_text, "");
        assert_eq!(table.rows()[1].translated_text, "World");
    }

    #[test]
    fn header_match_ignores_case() {
        let input = "nr\tde\ten\n5\tHallo\tHello\n";
        let table = parse_table(input.as_bytes(), &fields()).unwrap();

        let row = &table.rows()[0];
        assert_eq!(row.nr, Some(5));
        assert_eq!(row.original_text, "Hallo");
        assert_eq!(row.translated_text, "Hello");
    }

    #[test]
    fn short_rows_and_missing_target_column_load_as_empty() {
        let input = "NR\tDE\tNOTE\n1\tHallo\n2\n";
        let table = parse_table(input.as_bytes(), &fields()).unwrap();

        assert_eq!(table.rows()[0].translated_text, "");
        assert_eq!(table.rows()[1].original_text, "");
        assert_eq!(table.rows()[1].extra, vec![String::new()]);
    }

    #[test]
    fn quotes_are_literal() {
        let input = "NR\tDE\tEN\n1\t\"Hallo\" sagte er\t\n";
        let table = parse_table(input.as_bytes(), &fields()).unwrap();

        assert_eq!(table.rows()[0].original_text, "\"Hallo\" sagte er");
        let written = render_table(&table, &fields()).unwrap();
        assert_eq!(String::from_utf8(written).unwrap(), input);
    }

    #[test]
    fn invalid_nr_reports_line() {
        let input = "NR\tDE\tEN\n1\ta\t\nabc\tb\t\n";
        let err = parse_table(input.as_bytes(), &fields()).unwrap_err();

        match err {
            TableError::InvalidNr { line, value } => {
                assert_eq!(line, 3);
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_input_has_no_header() {
        assert!(matches!(
            parse_table(b"", &fields()),
            Err(TableError::MissingHeader)
        ));
    }

    #[test]
    fn round_trip_keeps_unknown_columns_and_header_spelling() {
        let input = "Nr\tExtra\tDe\ten\tTRACE\r\n1\tx\tHallo\tHello\tt\r\n2\ty\tWelt\t\t\r\n";
        let table = parse_table(input.as_bytes(), &fields()).unwrap();

        let written = render_table(&table, &fields()).unwrap();
        assert_eq!(String::from_utf8(written).unwrap(), input);
    }

    #[test]
    fn missing_target_column_is_appended() {
        let input = "NR\tDE\n1\tHallo\n";
        let mut table = parse_table(input.as_bytes(), &fields()).unwrap();
        table.set_translated_text(0, "Hello".into());

        let written = render_table(&table, &fields()).unwrap();
        assert_eq!(
            String::from_utf8(written).unwrap(),
            "NR\tDE\tEN\n1\tHallo\tHello\n"
        );
    }

    #[test]
    fn in_memory_table_uses_canonical_header() {
        let table = Table::from_rows(vec![Row::new(1, "Hallo", "Hello")]);

        let written = render_table(&table, &fields()).unwrap();
        assert_eq!(
            String::from_utf8(written).unwrap(),
            "NR\tFILENR\tID\tSYMBOL\tUSE\tTRACE\tDE\tEN\n1\t\t\t\t\t\tHallo\tHello\n"
        );
    }

    fn round_trip(input: &str) -> String {
        let table = parse_table(input.as_bytes(), &fields()).unwrap();
        String::from_utf8(render_table(&table, &fields()).unwrap()).unwrap()
    }

    #[test]
    fn cells_past_the_header_are_kept() {
        let input = "NR\tDE\tEN\n1\tHallo\tHello\textra\tmore\n2\tWelt\t\n";
        let table = parse_table(input.as_bytes(), &fields()).unwrap();

        assert_eq!(table.rows()[0].overflow, vec!["extra", "more"]);
        assert_eq!(round_trip(input), input);
    }

    #[test]
    fn byte_order_mark_is_kept() {
        let input = "\u{feff}NR\tDE\tEN\n1\tHallo\t\n";
        let table = parse_table(input.as_bytes(), &fields()).unwrap();

        assert!(table.layout().bom);
        assert_eq!(table.layout().headers[0], "NR");
        assert_eq!(round_trip(input), input);
    }

    #[test]
    fn nr_cell_is_written_as_read() {
        let input = "NR\tDE\tEN\n007\tHallo\t\n 1\tWelt\t\n";
        let table = parse_table(input.as_bytes(), &fields()).unwrap();

        assert_eq!(table.rows()[0].nr, Some(7));
        assert_eq!(table.rows()[1].nr, Some(1));
        assert_eq!(round_trip(input), input);
    }

    #[test]
    fn short_rows_are_not_padded() {
        let input = "NR\tDE\tEN\tNOTE\n1\tHallo\tHello\n2\n";
        assert_eq!(round_trip(input), input);
    }

    #[test]
    fn short_row_grows_only_up_to_a_new_translation() {
        let input = "NR\tDE\tNOTE\tEN\tTRACE\n1\tHallo\n";
        let mut table = parse_table(input.as_bytes(), &fields()).unwrap();
        table.set_translated_text(0, "Hello".into());

        let written = render_table(&table, &fields()).unwrap();
        assert_eq!(
            String::from_utf8(written).unwrap(),
            "NR\tDE\tNOTE\tEN\tTRACE\n1\tHallo\t\tHello\n"
        );
    }

    #[test]
    fn blank_lines_are_kept() {
        let input = "\nNR\tDE\tEN\n1\ta\t\n\n\n2\tb\t\n\n";
        let table = parse_table(input.as_bytes(), &fields()).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1].blank_lines_before, 2);
        assert_eq!(round_trip(input), input);
    }

    #[test]
    fn blank_crlf_lines_are_kept() {
        let input = "NR\tDE\tEN\r\n1\ta\t\r\n\r\n2\tb\t\r\n";
        assert_eq!(round_trip(input), input);
    }

    #[test]
    fn missing_final_newline_is_kept() {
        let input = "NR\tDE\tEN\n1\tHallo\tHello";
        assert_eq!(round_trip(input), input);
    }

    #[test]
    fn write_table_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dialogues.csv");
        fs::write(&path, SAMPLE).unwrap();

        let mut table = load_table(&path, &fields()).unwrap();
        table.set_translated_text(0, "Hello".into());
        write_table(&path, &table, &fields()).unwrap();

        let reloaded = load_table(&path, &fields()).unwrap();
        assert_eq!(reloaded.rows()[0].translated_text, "Hello");
        assert_eq!(reloaded.rows()[1].translated_text, "World");
    }
}
