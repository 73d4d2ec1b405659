//! Streaming worksheet reader over `s-zip`
//!
//! **Memory usage:**
//! - Shared strings: loaded fully (cells reference them by index)
//! - Worksheet XML: streamed in 32KB chunks; at most one row is buffered
//!
//! Sequential read only; rows come out in document order.

use super::shared_strings::parse_shared_strings;
use super::xml::{attr, decode_entities, element_text, find_start_tag, text_runs};
use super::{SheetCell, SheetInfo, SheetRow, SheetRows, SheetSource};
use crate::error::{ExcelError, Result};
use crate::types::{parse_cell_reference, parse_column_index, CellValue, MAX_COLUMN};
use log::debug;
use s_zip::StreamingZipReader;
use std::io::{BufReader, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 32 * 1024;

/// Reader for `.xlsx` packages
pub struct XlsxSource {
    archive: StreamingZipReader,
    sst: Vec<CellValue>,
    sheets: Vec<SheetInfo>,
    date1904: bool,
}

impl XlsxSource {
    /// Open a package: loads shared strings and the sheet list, no worksheet data
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut archive = StreamingZipReader::open(path.as_ref())?;

        let sst = match archive.read_entry_by_name("xl/sharedStrings.xml") {
            Ok(data) => parse_shared_strings(&String::from_utf8_lossy(&data)),
            // No shared strings part: every string cell is inline
            Err(_) => Vec::new(),
        };

        let workbook = read_part(&mut archive, "xl/workbook.xml")?;
        let rels = read_part(&mut archive, "xl/_rels/workbook.xml.rels")?;
        let sheets = parse_sheet_info(&workbook, &rels)?;
        let date1904 = find_start_tag(&workbook, "workbookPr", 0)
            .and_then(|start| {
                let end = workbook[start..].find('>')?;
                attr(&workbook[start..start + end], "date1904").map(|v| v == "1" || v == "true")
            })
            .unwrap_or(false);

        debug!(
            "Opened {}: {} sheets, {} shared strings, date1904={}",
            path.as_ref().display(),
            sheets.len(),
            sst.len(),
            date1904
        );

        Ok(XlsxSource {
            archive,
            sst,
            sheets,
            date1904,
        })
    }
}

impl SheetSource for XlsxSource {
    fn sheets(&self) -> &[SheetInfo] {
        &self.sheets
    }

    fn date1904(&self) -> bool {
        self.date1904
    }

    fn rows(&mut self, index: usize) -> Result<SheetRows<'_>> {
        let path = self
            .sheets
            .get(index)
            .map(|sheet| sheet.path.clone())
            .ok_or_else(|| ExcelError::SheetNotFound {
                sheet: index.to_string(),
                available: sheet_list(&self.sheets),
            })?;

        let reader = self
            .archive
            .read_entry_streaming_by_name(&path)
            .map_err(|e| ExcelError::MalformedDocument(format!("cannot open {}: {}", path, e)))?;

        Ok(Box::new(RowIterator::new(reader, &self.sst)))
    }
}

fn read_part(archive: &mut StreamingZipReader, name: &str) -> Result<String> {
    archive
        .read_entry_by_name(name)
        .map(|data| String::from_utf8_lossy(&data).into_owned())
        .map_err(|e| ExcelError::MalformedDocument(format!("missing {}: {}", name, e)))
}

pub(crate) fn sheet_list(sheets: &[SheetInfo]) -> String {
    sheets
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Sheet names from `workbook.xml` mapped to part names through the workbook relationships
fn parse_sheet_info(workbook: &str, rels: &str) -> Result<Vec<SheetInfo>> {
    let mut targets = Vec::new();
    let mut pos = 0;
    while let Some(start) = find_start_tag(rels, "Relationship", pos) {
        let Some(end) = rels[start..].find('>') else {
            break;
        };
        let tag = &rels[start..start + end];
        if let (Some(id), Some(target)) = (attr(tag, "Id"), attr(tag, "Target")) {
            targets.push((id, target));
        }
        pos = start + end;
    }

    let mut sheets = Vec::new();
    let mut pos = 0;
    while let Some(start) = find_start_tag(workbook, "sheet", pos) {
        let Some(end) = workbook[start..].find('>') else {
            break;
        };
        let tag = &workbook[start..start + end];
        pos = start + end;

        let name = attr(tag, "name")
            .ok_or_else(|| ExcelError::MalformedDocument("sheet without a name".to_string()))?;
        let rid = attr(tag, "r:id").ok_or_else(|| {
            ExcelError::MalformedDocument(format!("sheet '{}' has no relationship id", name))
        })?;
        let target = targets
            .iter()
            .find(|(id, _)| *id == rid)
            .map(|(_, target)| *target)
            .ok_or_else(|| {
                ExcelError::MalformedDocument(format!(
                    "relationship {} for sheet '{}' not found",
                    rid, name
                ))
            })?;

        // Targets are relative to xl/ unless absolute
        let path = match target.strip_prefix('/') {
            Some(absolute) => absolute.to_string(),
            None => format!("xl/{}", target),
        };
        sheets.push(SheetInfo {
            name: decode_entities(name).into_owned(),
            path,
        });
    }
    Ok(sheets)
}

/// Iterator over the rows of one worksheet.
/// Streams XML from the archive without loading the whole worksheet into memory.
pub struct RowIterator<'a> {
    reader: BufReader<Box<dyn Read + 'a>>,
    sst: &'a [CellValue],
    /// Decoded XML not yet consumed
    buffer: String,
    /// Trailing bytes of the last chunk that end mid-character
    pending: Vec<u8>,
    chunk: Vec<u8>,
    next_index: u32,
    done: bool,
}

impl<'a> RowIterator<'a> {
    pub fn new(reader: Box<dyn Read + 'a>, sst: &'a [CellValue]) -> Self {
        RowIterator {
            reader: BufReader::with_capacity(64 * 1024, reader),
            sst,
            buffer: String::with_capacity(2 * CHUNK_SIZE),
            pending: Vec::new(),
            chunk: vec![0u8; CHUNK_SIZE],
            next_index: 0,
            done: false,
        }
    }

    /// Read one chunk into the buffer; returns false at end of input
    fn fill(&mut self) -> Result<bool> {
        let n = self.reader.read(&mut self.chunk)?;
        if n == 0 {
            if !self.pending.is_empty() {
                return Err(ExcelError::MalformedDocument(
                    "worksheet ends inside a UTF-8 sequence".to_string(),
                ));
            }
            return Ok(false);
        }
        self.pending.extend_from_slice(&self.chunk[..n]);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(s) => s.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(ExcelError::MalformedDocument(format!(
                    "worksheet is not valid UTF-8: {}",
                    e
                )))
            }
        };
        // Validated just above
        self.buffer
            .push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
        self.pending.drain(..valid);
        Ok(true)
    }

    /// Try to cut one complete row off the front of the buffer
    fn try_extract_row(&mut self) -> Option<Result<SheetRow>> {
        let Some(start) = find_start_tag(&self.buffer, "row", 0) else {
            if let Some(end) = self.buffer.find("</sheetData>") {
                self.buffer.drain(..end);
                self.done = true;
                return None;
            }
            // Keep a tail in case a tag is split across chunks
            let keep = self.buffer.len().min(64);
            let mut cut = self.buffer.len() - keep;
            while !self.buffer.is_char_boundary(cut) {
                cut -= 1;
            }
            self.buffer.drain(..cut);
            return None;
        };
        if let Some(end) = self.buffer[..start].find("</sheetData>") {
            self.buffer.drain(..end);
            self.done = true;
            return None;
        }

        let open_end = start + self.buffer[start..].find('>')?;
        let row_end = if self.buffer[..open_end].ends_with('/') {
            open_end + 1
        } else {
            open_end + self.buffer[open_end..].find("</row>")? + "</row>".len()
        };

        let parsed = parse_row(&self.buffer[start..row_end], self.sst, self.next_index);
        self.buffer.drain(..row_end);
        if let Ok(row) = &parsed {
            self.next_index = row.index + 1;
        }
        Some(parsed)
    }
}

impl Iterator for RowIterator<'_> {
    type Item = Result<SheetRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(row) = self.try_extract_row() {
                if row.is_err() {
                    self.done = true;
                }
                return Some(row);
            }
            if self.done {
                return None;
            }
            match self.fill() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    if find_start_tag(&self.buffer, "row", 0).is_some() {
                        return Some(Err(ExcelError::MalformedDocument(
                            "worksheet ends inside a row".to_string(),
                        )));
                    }
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Parse one `<row ...>...</row>` (or self-closing `<row .../>`) element
fn parse_row(row_xml: &str, sst: &[CellValue], fallback_index: u32) -> Result<SheetRow> {
    let open_end = row_xml.find('>').unwrap_or(row_xml.len());
    let index = match attr(&row_xml[..open_end], "r") {
        Some(r) => r
            .parse::<u32>()
            .ok()
            .filter(|r| *r > 0)
            .map(|r| r - 1)
            .ok_or_else(|| ExcelError::MalformedDocument(format!("invalid row number '{}'", r)))?,
        None => fallback_index,
    };

    let mut row = SheetRow::new(index);
    let mut next_col = 0u32;
    let mut pos = open_end;
    while let Some(start) = find_start_tag(row_xml, "c", pos) {
        let tag_end = start
            + row_xml[start..]
                .find('>')
                .ok_or_else(|| ExcelError::MalformedDocument("unterminated cell".to_string()))?;
        let tag = &row_xml[start..tag_end];

        let col = match attr(tag, "r") {
            Some(reference) => parse_cell_reference(reference)
                .map(|(_, col)| col)
                .or_else(|| parse_column_index(reference))
                .ok_or_else(|| {
                    ExcelError::MalformedDocument(format!("invalid cell reference '{}'", reference))
                })?,
            None => next_col,
        };
        if col > MAX_COLUMN {
            return Err(ExcelError::MalformedDocument(format!(
                "column {} in row {} is beyond the last worksheet column",
                col + 1,
                index + 1
            )));
        }
        if col < next_col {
            return Err(ExcelError::MalformedDocument(format!(
                "cells of row {} are not in ascending column order",
                index + 1
            )));
        }
        next_col = col + 1;

        if tag.ends_with('/') {
            pos = tag_end + 1;
            continue;
        }
        let close = row_xml[tag_end..]
            .find("</c>")
            .ok_or_else(|| ExcelError::MalformedDocument("unterminated cell".to_string()))?;
        let inner = &row_xml[tag_end + 1..tag_end + close];
        pos = tag_end + close + 4;

        let value = parse_cell(attr(tag, "t").unwrap_or("n"), inner, sst)?;
        if value != CellValue::Empty {
            row.cells.push(SheetCell::new(col, value));
        }
    }
    Ok(row)
}

fn parse_cell(cell_type: &str, inner: &str, sst: &[CellValue]) -> Result<CellValue> {
    let raw = element_text(inner, "v");
    let value = match cell_type {
        "s" => match raw {
            Some(v) => {
                let idx: usize = v.trim().parse().map_err(|_| {
                    ExcelError::MalformedDocument(format!("invalid shared string index '{}'", v))
                })?;
                sst.get(idx).cloned().ok_or_else(|| {
                    ExcelError::MalformedDocument(format!(
                        "shared string index {} out of range ({} strings)",
                        idx,
                        sst.len()
                    ))
                })?
            }
            None => CellValue::Empty,
        },
        "inlineStr" => match element_text(inner, "is") {
            Some(is) if find_start_tag(is, "r", 0).is_some() => CellValue::RichString(text_runs(is)),
            Some(is) => CellValue::DirectString(text_runs(is).concat()),
            None => CellValue::Empty,
        },
        "str" => raw
            .map(|v| CellValue::DirectString(decode_entities(v).into_owned()))
            .unwrap_or(CellValue::Empty),
        "b" => match raw.map(str::trim) {
            Some("1") | Some("true") => CellValue::Boolean(true),
            Some("0") | Some("false") => CellValue::Boolean(false),
            Some(other) => {
                return Err(ExcelError::MalformedDocument(format!(
                    "invalid boolean '{}'",
                    other
                )))
            }
            None => CellValue::Empty,
        },
        "e" => raw
            .map(|v| CellValue::Error(decode_entities(v).into_owned()))
            .unwrap_or(CellValue::Empty),
        // ISO 8601 date cells are rare; they are handed over as text
        "d" => raw
            .map(|v| CellValue::DirectString(v.to_string()))
            .unwrap_or(CellValue::Empty),
        _ => match raw.map(str::trim) {
            Some("") | None => CellValue::Empty,
            Some(v) => CellValue::Number(v.parse().map_err(|_| {
                ExcelError::MalformedDocument(format!("invalid number '{}'", v))
            })?),
        },
    };

    match element_text(inner, "f") {
        Some(formula) => Ok(CellValue::formula(
            decode_entities(formula).into_owned(),
            Some(value).filter(|v| *v != CellValue::Empty),
        )),
        None => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn rows_of(xml: &str, sst: &[CellValue]) -> Vec<SheetRow> {
        let reader: Box<dyn Read> = Box::new(Cursor::new(xml.as_bytes().to_vec()));
        RowIterator::new(reader, sst)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_parse_cell_types() {
        let sst = vec![CellValue::String("shared".into())];
        let xml = r#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1"><v>2.5</v></c><c r="C1" t="b"><v>1</v></c><c r="D1" t="inlineStr"><is><t>inline &amp; more</t></is></c><c r="E1" t="e"><v>#DIV/0!</v></c><c r="F1"><f>B1*2</f><v>5</v></c></row></sheetData></worksheet>"#;
        let rows = rows_of(xml, &sst);
        assert_eq!(rows.len(), 1);
        let values: Vec<_> = rows[0].cells.iter().map(|c| c.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                CellValue::String("shared".into()),
                CellValue::Number(2.5),
                CellValue::Boolean(true),
                CellValue::DirectString("inline & more".into()),
                CellValue::Error("#DIV/0!".into()),
                CellValue::formula("B1*2", Some(CellValue::Number(5.0))),
            ]
        );
    }

    #[test]
    fn test_sparse_rows_and_columns() {
        let xml = r#"<sheetData><row r="2" spans="1:3"><c r="C2"><v>1</v></c></row><row r="5"/><row r="7"><c r="B7" s="1"/><c r="D7"><v>4</v></c></row></sheetData>"#;
        let rows = rows_of(xml, &[]);
        assert_eq!(rows.iter().map(|r| r.index).collect::<Vec<_>>(), vec![1, 4, 6]);
        assert_eq!(rows[0].cells[0].col, 2);
        assert!(rows[1].is_blank());
        assert_eq!(rows[2].cells.len(), 1);
        assert_eq!(rows[2].cells[0].col, 3);
        assert_eq!(rows[2].width(), 4);
    }

    #[test]
    fn test_rows_without_reference_are_numbered() {
        let xml = r#"<sheetData><row><c><v>1</v></c><c><v>2</v></c></row><row><c><v>3</v></c></row></sheetData>"#;
        let rows = rows_of(xml, &[]);
        assert_eq!(rows[0].index, 0);
        assert_eq!(rows[0].cells[1].col, 1);
        assert_eq!(rows[1].index, 1);
    }

    #[test]
    fn test_multibyte_text_split_across_chunks() {
        let text = "é".repeat(CHUNK_SIZE);
        let xml = format!(
            r#"<sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>{}</t></is></c></row></sheetData>"#,
            text
        );
        let rows = rows_of(&xml, &[]);
        assert_eq!(rows[0].cells[0].value, CellValue::DirectString(text));
    }

    #[test]
    fn test_rich_inline_string() {
        let xml = r#"<sheetData><row r="1"><c r="A1" t="inlineStr"><is><r><t>a</t></r><r><t xml:space="preserve"> b</t></r></is></c></row></sheetData>"#;
        let rows = rows_of(xml, &[]);
        assert_eq!(
            rows[0].cells[0].value,
            CellValue::RichString(vec!["a".into(), " b".into()])
        );
    }

    #[test]
    fn test_bad_shared_string_index() {
        let xml = r#"<sheetData><row r="1"><c r="A1" t="s"><v>3</v></c></row></sheetData>"#;
        let reader: Box<dyn Read> = Box::new(Cursor::new(xml.as_bytes().to_vec()));
        let mut rows = RowIterator::new(reader, &[]);
        assert!(matches!(
            rows.next(),
            Some(Err(ExcelError::MalformedDocument(_)))
        ));
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_truncated_worksheet() {
        let xml = r#"<sheetData><row r="1"><c r="A1"><v>1</v>"#;
        let reader: Box<dyn Read> = Box::new(Cursor::new(xml.as_bytes().to_vec()));
        let mut rows = RowIterator::new(reader, &[]);
        assert!(matches!(
            rows.next(),
            Some(Err(ExcelError::MalformedDocument(_)))
        ));
    }

    fn first_error(xml: &str) -> Option<Result<SheetRow>> {
        let reader: Box<dyn Read> = Box::new(Cursor::new(xml.as_bytes().to_vec()));
        RowIterator::new(reader, &[]).next()
    }

    #[test]
    fn test_cells_out_of_column_order() {
        let xml = r#"<sheetData><row r="1"><c r="C1"><v>1</v></c><c r="A1"><v>2</v></c></row></sheetData>"#;
        assert!(matches!(
            first_error(xml),
            Some(Err(ExcelError::MalformedDocument(_)))
        ));

        let xml = r#"<sheetData><row r="1"><c r="B1"><v>1</v></c><c r="B1"><v>2</v></c></row></sheetData>"#;
        assert!(matches!(
            first_error(xml),
            Some(Err(ExcelError::MalformedDocument(_)))
        ));
    }

    #[test]
    fn test_column_beyond_sheet_limit() {
        let xml = r#"<sheetData><row r="1"><c r="ZZZZZZ1"><v>1</v></c></row></sheetData>"#;
        assert!(matches!(
            first_error(xml),
            Some(Err(ExcelError::MalformedDocument(_)))
        ));

        let xml = r#"<sheetData><row r="1"><c r="XFD1"><v>1</v></c></row></sheetData>"#;
        let row = first_error(xml).unwrap().unwrap();
        assert_eq!(row.cells[0].col, MAX_COLUMN);
    }

    #[test]
    fn test_malformed_markup() {
        for xml in [
            r#"<sheetData><row r="0"><c r="A1"><v>1</v></c></row></sheetData>"#,
            r#"<sheetData><row r="x"><c r="A1"><v>1</v></c></row></sheetData>"#,
            r#"<sheetData><row r="1"><c r="1A"><v>1</v></c></row></sheetData>"#,
            r#"<sheetData><row r="1"><c r="A1"><v>1</v></row></sheetData>"#,
            r#"<sheetData><row r="1"><c r="A1" t="b"><v>yes</v></c></row></sheetData>"#,
            r#"<sheetData><row r="1"><c r="A1"><v>abc</v></c></row></sheetData>"#,
        ] {
            assert!(
                matches!(first_error(xml), Some(Err(ExcelError::MalformedDocument(_)))),
                "accepted {}",
                xml
            );
        }
    }

    #[test]
    fn test_parse_sheet_info() {
        let workbook = r#"<workbook><sheets><sheet name="First" sheetId="1" r:id="rId2"/><sheet name="A &amp; B" sheetId="2" r:id="rId1"/></sheets></workbook>"#;
        let rels = r#"<Relationships><Relationship Id="rId1" Type="x" Target="worksheets/sheet2.xml"/><Relationship Id="rId2" Type="x" Target="/xl/worksheets/sheet1.xml"/></Relationships>"#;
        let sheets = parse_sheet_info(workbook, rels).unwrap();
        assert_eq!(sheets[0].name, "First");
        assert_eq!(sheets[0].path, "xl/worksheets/sheet1.xml");
        assert_eq!(sheets[1].name, "A & B");
        assert_eq!(sheets[1].path, "xl/worksheets/sheet2.xml");
    }
}
