//! Zero-temp-file package writer - streams worksheet XML directly into the ZIP compressor

use super::shared_strings::SharedStrings;
use super::xml::{escape, write_escaped};
use super::{SheetRow, SheetSink};
use crate::error::{ExcelError, Result};
use crate::types::{push_column_letter, CellValue, MergeRange};
use log::{debug, warn};
use s_zip::StreamingZipWriter;
use std::fs::File;
use std::path::Path;

const MAX_SHEET_NAME: usize = 31;

/// Writer for `.xlsx` packages
pub struct XlsxSink {
    zip_writer: Option<StreamingZipWriter<File>>,
    worksheets: Vec<String>,
    shared_strings: SharedStrings,
    xml_buffer: Vec<u8>,
    in_worksheet: bool,
    last_row: Option<u32>,
}

impl XlsxSink {
    pub fn create<P: AsRef<Path>>(path: P, compression_level: u32) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_str().ok_or_else(|| {
            ExcelError::Configuration(format!("output path is not UTF-8: {}", path.display()))
        })?;
        let zip_writer = StreamingZipWriter::with_compression(path_str, compression_level.min(9))?;
        debug!("Created {} (compression level {})", path.display(), compression_level);

        Ok(XlsxSink {
            zip_writer: Some(zip_writer),
            worksheets: Vec::new(),
            shared_strings: SharedStrings::new(),
            xml_buffer: Vec::with_capacity(4096),
            in_worksheet: false,
            last_row: None,
        })
    }

    fn zip(&mut self) -> Result<&mut StreamingZipWriter<File>> {
        self.zip_writer
            .as_mut()
            .ok_or(ExcelError::SessionClosed("write to a closed package"))
    }

    fn write_part(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let zip = self.zip()?;
        zip.start_entry(name)?;
        zip.write_data(data)?;
        Ok(())
    }

    fn validate_sheet_name(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ExcelError::Configuration(
                "sheet name must not be empty".to_string(),
            ));
        }
        if name.chars().count() > MAX_SHEET_NAME {
            return Err(ExcelError::Configuration(format!(
                "sheet name '{}' is longer than {} characters",
                name, MAX_SHEET_NAME
            )));
        }
        if let Some(c) = name
            .chars()
            .find(|c| matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        {
            return Err(ExcelError::Configuration(format!(
                "sheet name '{}' contains '{}'",
                name, c
            )));
        }
        if self
            .worksheets
            .iter()
            .any(|existing| existing.to_lowercase() == name.to_lowercase())
        {
            return Err(ExcelError::Configuration(format!(
                "duplicate sheet name '{}'",
                name
            )));
        }
        Ok(())
    }

    fn push_cell(
        buffer: &mut Vec<u8>,
        shared_strings: &mut SharedStrings,
        row: u32,
        col: u32,
        style: u32,
        value: &CellValue,
    ) -> Result<()> {
        if let CellValue::Image(bytes) = value {
            warn!(
                "Image cell at row {} column {} ({} bytes) is not embedded; writing an empty cell",
                row + 1,
                col,
                bytes.len()
            );
        }
        if matches!(value, CellValue::Empty | CellValue::Image(_)) && style == 0 {
            return Ok(());
        }

        let mut num_buffer = itoa::Buffer::new();
        buffer.extend_from_slice(b"<c r=\"");
        push_column_letter(buffer, col);
        buffer.extend_from_slice(num_buffer.format(row + 1).as_bytes());
        buffer.push(b'"');
        if style > 0 {
            buffer.extend_from_slice(b" s=\"");
            buffer.extend_from_slice(num_buffer.format(style).as_bytes());
            buffer.push(b'"');
        }

        match value {
            CellValue::Empty | CellValue::Image(_) => buffer.extend_from_slice(b"/>"),
            CellValue::String(s) => {
                let index = shared_strings.add_string(s);
                buffer.extend_from_slice(b" t=\"s\"><v>");
                buffer.extend_from_slice(num_buffer.format(index).as_bytes());
                buffer.extend_from_slice(b"</v></c>");
            }
            CellValue::DirectString(s) => {
                buffer.extend_from_slice(b" t=\"inlineStr\"><is>");
                push_text(buffer, s);
                buffer.extend_from_slice(b"</is></c>");
            }
            CellValue::RichString(runs) => {
                buffer.extend_from_slice(b" t=\"inlineStr\"><is>");
                for run in runs {
                    buffer.extend_from_slice(b"<r>");
                    push_text(buffer, run);
                    buffer.extend_from_slice(b"</r>");
                }
                buffer.extend_from_slice(b"</is></c>");
            }
            CellValue::Number(n) => {
                buffer.extend_from_slice(b"><v>");
                push_number(buffer, *n)?;
                buffer.extend_from_slice(b"</v></c>");
            }
            CellValue::Boolean(b) => {
                buffer.extend_from_slice(b" t=\"b\"><v>");
                buffer.extend_from_slice(if *b { b"1" } else { b"0" });
                buffer.extend_from_slice(b"</v></c>");
            }
            CellValue::Error(e) => {
                buffer.extend_from_slice(b" t=\"e\"><v>");
                write_escaped(buffer, e);
                buffer.extend_from_slice(b"</v></c>");
            }
            CellValue::Formula { formula, cached } => {
                let cached = cached.as_deref().map(CellValue::effective);
                match cached {
                    Some(CellValue::String(_))
                    | Some(CellValue::DirectString(_))
                    | Some(CellValue::RichString(_)) => buffer.extend_from_slice(b" t=\"str\""),
                    Some(CellValue::Boolean(_)) => buffer.extend_from_slice(b" t=\"b\""),
                    Some(CellValue::Error(_)) => buffer.extend_from_slice(b" t=\"e\""),
                    _ => {}
                }
                buffer.extend_from_slice(b"><f>");
                write_escaped(buffer, formula.strip_prefix('=').unwrap_or(formula));
                buffer.extend_from_slice(b"</f>");
                match cached {
                    Some(CellValue::Number(n)) => {
                        buffer.extend_from_slice(b"<v>");
                        push_number(buffer, *n)?;
                        buffer.extend_from_slice(b"</v>");
                    }
                    Some(CellValue::Boolean(b)) => {
                        buffer.extend_from_slice(if *b { b"<v>1</v>" } else { b"<v>0</v>" });
                    }
                    Some(cell @ CellValue::String(_))
                    | Some(cell @ CellValue::DirectString(_))
                    | Some(cell @ CellValue::RichString(_)) => {
                        buffer.extend_from_slice(b"<v>");
                        write_escaped(buffer, &cell.text().unwrap_or_default());
                        buffer.extend_from_slice(b"</v>");
                    }
                    Some(CellValue::Error(e)) => {
                        buffer.extend_from_slice(b"<v>");
                        write_escaped(buffer, e);
                        buffer.extend_from_slice(b"</v>");
                    }
                    _ => {}
                }
                buffer.extend_from_slice(b"</c>");
            }
        }
        Ok(())
    }

    fn close_worksheet(&mut self, merges: &[MergeRange]) -> Result<()> {
        if !self.in_worksheet {
            return Ok(());
        }
        let mut tail = String::from("</sheetData>");
        if !merges.is_empty() {
            tail.push_str(&format!("<mergeCells count=\"{}\">", merges.len()));
            for range in merges {
                tail.push_str(&format!("<mergeCell ref=\"{}\"/>", range.reference()));
            }
            tail.push_str("</mergeCells>");
        }
        tail.push_str("</worksheet>");
        self.zip()?.write_data(tail.as_bytes())?;
        self.in_worksheet = false;
        Ok(())
    }

    fn write_content_types(&mut self) -> Result<()> {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>
<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>
<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>
<Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/>"#,
        );
        for i in 1..=self.worksheets.len() {
            xml.push_str(&format!(
                r#"
<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                i
            ));
        }
        xml.push_str("\n</Types>");
        self.write_part("[Content_Types].xml", xml.as_bytes())
    }

    fn write_rels(&mut self) -> Result<()> {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>
<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties" Target="docProps/app.xml"/>
</Relationships>"#;
        self.write_part("_rels/.rels", xml.as_bytes())
    }

    fn write_workbook(&mut self) -> Result<()> {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets>"#,
        );
        for (i, name) in self.worksheets.iter().enumerate() {
            xml.push_str(&format!(
                r#"
<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                escape(name),
                i + 1,
                i + 1
            ));
        }
        xml.push_str("\n</sheets>\n</workbook>");
        self.write_part("xl/workbook.xml", xml.as_bytes())
    }

    fn write_workbook_rels(&mut self) -> Result<()> {
        let count = self.worksheets.len();
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );
        for i in 1..=count {
            xml.push_str(&format!(
                r#"
<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                i, i
            ));
        }
        xml.push_str(&format!(
            r#"
<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>
</Relationships>"#,
            count + 1,
            count + 2
        ));
        self.write_part("xl/_rels/workbook.xml.rels", xml.as_bytes())
    }

    /// Style indices: 0 default, 1 date (numFmt 14), 2 date-time (numFmt 22)
    fn write_styles(&mut self) -> Result<()> {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts>
<fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>
<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>
<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>
<cellXfs count="3">
<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>
<xf numFmtId="14" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>
<xf numFmtId="22" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>
</cellXfs>
<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>
</styleSheet>"#;
        self.write_part("xl/styles.xml", xml.as_bytes())
    }

    fn write_shared_strings(&mut self) -> Result<()> {
        let xml = self.shared_strings.to_xml();
        self.write_part("xl/sharedStrings.xml", &xml)
    }

    fn write_app_props(&mut self) -> Result<()> {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties">
<Application>excelmap</Application>
</Properties>"#;
        self.write_part("docProps/app.xml", xml.as_bytes())
    }

    fn write_core_props(&mut self) -> Result<()> {
        let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<dc:creator>excelmap</dc:creator>
<dcterms:created xsi:type="dcterms:W3CDTF">{}</dcterms:created>
</cp:coreProperties>"#,
            created
        );
        self.write_part("docProps/core.xml", xml.as_bytes())
    }
}

impl SheetSink for XlsxSink {
    fn start_sheet(&mut self, name: &str) -> Result<()> {
        self.validate_sheet_name(name)?;
        self.close_worksheet(&[])?;

        self.worksheets.push(name.to_string());
        self.last_row = None;

        let entry_name = format!("xl/worksheets/sheet{}.xml", self.worksheets.len());
        let header = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheetData>"#;
        self.write_part(&entry_name, header.as_bytes())?;
        self.in_worksheet = true;
        debug!("Started worksheet '{}' ({})", name, entry_name);
        Ok(())
    }

    fn write_rows(&mut self, rows: &[SheetRow]) -> Result<()> {
        if !self.in_worksheet {
            return Err(ExcelError::Configuration(
                "no worksheet started".to_string(),
            ));
        }

        self.xml_buffer.clear();
        let mut num_buffer = itoa::Buffer::new();
        // Committed only once the whole batch is in the package
        let mut last_row = self.last_row;
        for row in rows {
            if last_row.is_some_and(|last| row.index <= last) {
                return Err(ExcelError::Configuration(format!(
                    "row {} written after row {}",
                    row.index + 1,
                    last_row.map(|r| r + 1).unwrap_or(0)
                )));
            }
            last_row = Some(row.index);

            self.xml_buffer.extend_from_slice(b"<row r=\"");
            self.xml_buffer
                .extend_from_slice(num_buffer.format(row.index + 1).as_bytes());
            self.xml_buffer.extend_from_slice(b"\">");
            for cell in &row.cells {
                Self::push_cell(
                    &mut self.xml_buffer,
                    &mut self.shared_strings,
                    row.index,
                    cell.col,
                    cell.style.index(),
                    &cell.value,
                )?;
            }
            self.xml_buffer.extend_from_slice(b"</row>");
        }

        let zip = self
            .zip_writer
            .as_mut()
            .ok_or(ExcelError::SessionClosed("write to a closed package"))?;
        zip.write_data(&self.xml_buffer)?;
        self.last_row = last_row;
        Ok(())
    }

    fn finish_sheet(&mut self, merges: &[MergeRange]) -> Result<()> {
        self.close_worksheet(merges)
    }

    fn close(&mut self) -> Result<()> {
        if self.zip_writer.is_none() {
            return Err(ExcelError::SessionClosed("close the package twice"));
        }
        self.close_worksheet(&[])?;
        if self.worksheets.is_empty() {
            // A workbook needs at least one sheet
            self.start_sheet("Sheet1")?;
            self.close_worksheet(&[])?;
        }

        self.write_content_types()?;
        self.write_rels()?;
        self.write_workbook()?;
        self.write_workbook_rels()?;
        self.write_styles()?;
        self.write_shared_strings()?;
        self.write_app_props()?;
        self.write_core_props()?;

        if let Some(zip) = self.zip_writer.take() {
            zip.finish()?;
        }
        debug!(
            "Closed package: {} sheets, {} shared strings",
            self.worksheets.len(),
            self.shared_strings.count()
        );
        Ok(())
    }
}

fn push_text(buffer: &mut Vec<u8>, text: &str) {
    if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
        buffer.extend_from_slice(b"<t xml:space=\"preserve\">");
    } else {
        buffer.extend_from_slice(b"<t>");
    }
    write_escaped(buffer, text);
    buffer.extend_from_slice(b"</t>");
}

fn push_number(buffer: &mut Vec<u8>, n: f64) -> Result<()> {
    if !n.is_finite() {
        return Err(ExcelError::InvalidValue(format!(
            "{} cannot be stored in a cell",
            n
        )));
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        let mut num_buffer = itoa::Buffer::new();
        buffer.extend_from_slice(num_buffer.format(n as i64).as_bytes());
    } else {
        buffer.extend_from_slice(n.to_string().as_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellStyle;
    use crate::xlsx::{SheetCell, SheetSource, XlsxSource};
    use tempfile::TempDir;

    fn cells_xml(value: CellValue, style: u32) -> String {
        let mut buffer = Vec::new();
        let mut sst = SharedStrings::new();
        XlsxSink::push_cell(&mut buffer, &mut sst, 0, 1, style, &value).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_cell_markup() {
        assert_eq!(cells_xml(CellValue::Number(3.0), 0), "<c r=\"B1\"><v>3</v></c>");
        assert_eq!(
            cells_xml(CellValue::Number(45292.0), 1),
            "<c r=\"B1\" s=\"1\"><v>45292</v></c>"
        );
        assert_eq!(
            cells_xml(CellValue::String("x".into()), 0),
            "<c r=\"B1\" t=\"s\"><v>0</v></c>"
        );
        assert_eq!(
            cells_xml(CellValue::formula("A1*2", Some(CellValue::Number(4.0))), 0),
            "<c r=\"B1\"><f>A1*2</f><v>4</v></c>"
        );
        assert_eq!(cells_xml(CellValue::Empty, 0), "");
        assert_eq!(cells_xml(CellValue::Image(vec![1, 2, 3]), 0), "");
        assert!(cells_xml(CellValue::DirectString(" pad".into()), 0)
            .contains("<t xml:space=\"preserve\"> pad</t>"));
    }

    #[test]
    fn test_non_finite_number_is_rejected() {
        let mut buffer = Vec::new();
        let mut sst = SharedStrings::new();
        assert!(
            XlsxSink::push_cell(&mut buffer, &mut sst, 0, 0, 0, &CellValue::Number(f64::NAN))
                .is_err()
        );
    }

    #[test]
    fn test_package_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sink.xlsx");

        let mut sink = XlsxSink::create(&path, 6).unwrap();
        sink.start_sheet("Data & More").unwrap();
        let mut row = SheetRow::new(0);
        row.cells.push(SheetCell::new(0, CellValue::from("name")));
        row.cells.push(SheetCell::styled(2, CellValue::Number(45292.0), CellStyle::Date));
        let mut second = SheetRow::new(3);
        second.cells.push(SheetCell::new(1, CellValue::Boolean(false)));
        sink.write_rows(&[row, second]).unwrap();
        sink.finish_sheet(&[MergeRange::new(0, 0, 0, 1)]).unwrap();
        sink.start_sheet("Second").unwrap();
        sink.close().unwrap();

        let mut source = XlsxSource::open(&path).unwrap();
        let names: Vec<_> = source.sheets().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["Data & More", "Second"]);

        let rows: Vec<_> = source.rows(0).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells[0].value, CellValue::String("name".into()));
        assert_eq!(rows[0].cells[1].col, 2);
        assert_eq!(rows[1].index, 3);
        assert_eq!(rows[1].cells[0].value, CellValue::Boolean(false));

        assert_eq!(source.rows(1).unwrap().count(), 0);
    }

    #[test]
    fn test_rows_must_ascend() {
        let temp_dir = TempDir::new().unwrap();
        let mut sink = XlsxSink::create(temp_dir.path().join("order.xlsx"), 6).unwrap();
        sink.start_sheet("Sheet1").unwrap();
        sink.write_rows(&[SheetRow::new(2)]).unwrap();
        assert!(sink.write_rows(&[SheetRow::new(1)]).is_err());
    }

    #[test]
    fn test_rejected_batch_keeps_row_position() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("retry.xlsx");
        let mut sink = XlsxSink::create(&path, 6).unwrap();
        sink.start_sheet("Sheet1").unwrap();
        sink.write_rows(&[SheetRow::new(0)]).unwrap();

        let mut good = SheetRow::new(1);
        good.cells.push(SheetCell::new(0, CellValue::Number(1.0)));
        let mut bad = SheetRow::new(2);
        bad.cells.push(SheetCell::new(0, CellValue::Number(f64::INFINITY)));
        assert!(matches!(
            sink.write_rows(&[good.clone(), bad]),
            Err(ExcelError::InvalidValue(_))
        ));

        sink.write_rows(&[good]).unwrap();
        sink.close().unwrap();

        let mut source = XlsxSource::open(&path).unwrap();
        let rows: Vec<_> = source.rows(0).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].index, 1);
        assert_eq!(rows[1].cells[0].value, CellValue::Number(1.0));
    }

    #[test]
    fn test_invalid_sheet_names() {
        let temp_dir = TempDir::new().unwrap();
        let mut sink = XlsxSink::create(temp_dir.path().join("names.xlsx"), 6).unwrap();
        assert!(sink.start_sheet("a/b").is_err());
        assert!(sink.start_sheet(&"x".repeat(32)).is_err());
        sink.start_sheet("Data").unwrap();
        assert!(sink.start_sheet("DATA").is_err());
    }
}
