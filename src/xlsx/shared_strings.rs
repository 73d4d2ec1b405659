//! Shared strings table: deduplicating writer side and parsed reader side

use super::xml::{find_start_tag, text_runs, write_escaped};
use crate::types::CellValue;
use std::collections::HashMap;

/// Shared strings table that deduplicates strings across the workbook
pub struct SharedStrings {
    strings: Vec<String>,
    string_map: HashMap<String, u32>,
    max_unique_strings: usize,
    references: u64,
}

impl SharedStrings {
    pub fn new() -> Self {
        SharedStrings::with_capacity(1000, 100_000)
    }

    /// Create with a custom limit on strings tracked for deduplication
    pub fn with_capacity(capacity: usize, max_unique: usize) -> Self {
        SharedStrings {
            strings: Vec::with_capacity(capacity),
            string_map: HashMap::with_capacity(capacity),
            max_unique_strings: max_unique,
            references: 0,
        }
    }

    /// Add a string and get its index
    pub fn add_string(&mut self, s: &str) -> u32 {
        self.references += 1;
        if let Some(&index) = self.string_map.get(s) {
            return index;
        }

        // Past the limit new strings are still stored but no longer deduplicated
        let index = self.strings.len() as u32;
        self.strings.push(s.to_string());
        if self.strings.len() <= self.max_unique_strings {
            self.string_map.insert(s.to_string(), index);
        }
        index
    }

    /// Get number of unique strings
    pub fn count(&self) -> usize {
        self.strings.len()
    }

    /// Serialize the whole `xl/sharedStrings.xml` part
    pub fn to_xml(&self) -> Vec<u8> {
        let mut xml = Vec::with_capacity(256 + self.strings.iter().map(|s| s.len() + 16).sum::<usize>());
        xml.extend_from_slice(
            b"<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
<sst xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" count=\"",
        );
        let mut num_buffer = itoa::Buffer::new();
        xml.extend_from_slice(num_buffer.format(self.references).as_bytes());
        xml.extend_from_slice(b"\" uniqueCount=\"");
        xml.extend_from_slice(num_buffer.format(self.strings.len()).as_bytes());
        xml.extend_from_slice(b"\">");

        for s in &self.strings {
            if s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace) {
                xml.extend_from_slice(b"<si><t xml:space=\"preserve\">");
            } else {
                xml.extend_from_slice(b"<si><t>");
            }
            write_escaped(&mut xml, s);
            xml.extend_from_slice(b"</t></si>");
        }

        xml.extend_from_slice(b"</sst>");
        xml
    }
}

impl Default for SharedStrings {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `xl/sharedStrings.xml` into cell values.
///
/// Plain items become `CellValue::String`; items made of runs become
/// `CellValue::RichString` with one entry per run. Phonetic runs are dropped.
pub fn parse_shared_strings(xml: &str) -> Vec<CellValue> {
    let mut table = Vec::new();
    let mut pos = 0;
    while let Some(start) = find_start_tag(xml, "si", pos) {
        let Some(open_len) = xml[start..].find('>') else {
            break;
        };
        let open_end = start + open_len;
        if xml[..open_end].ends_with('/') {
            table.push(CellValue::String(String::new()));
            pos = open_end + 1;
            continue;
        }
        let Some(close) = xml[open_end..].find("</si>") else {
            break;
        };
        let item = strip_phonetic(&xml[open_end + 1..open_end + close]);
        let runs = text_runs(&item);
        if find_start_tag(&item, "r", 0).is_some() {
            table.push(CellValue::RichString(runs));
        } else {
            table.push(CellValue::String(runs.concat()));
        }
        pos = open_end + close + 5;
    }
    table
}

/// Remove `<rPh>` blocks, which carry furigana rather than cell text
fn strip_phonetic(item: &str) -> std::borrow::Cow<'_, str> {
    if !item.contains("<rPh") {
        return std::borrow::Cow::Borrowed(item);
    }
    let mut out = String::with_capacity(item.len());
    let mut rest = item;
    while let Some(start) = rest.find("<rPh") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</rPh>") {
            Some(end) => rest = &rest[start + end + 6..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    std::borrow::Cow::Owned(out)
}
