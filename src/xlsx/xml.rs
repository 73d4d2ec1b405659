//! Minimal markup helpers for the fixed SpreadsheetML vocabulary

use log::warn;
use std::borrow::Cow;

/// Append `s` to `buffer` with XML special characters escaped
///
/// Returns how many control characters were dropped.
pub(crate) fn write_escaped(buffer: &mut Vec<u8>, s: &str) -> usize {
    let mut dropped = 0;
    for c in s.chars() {
        match c {
            '&' => buffer.extend_from_slice(b"&amp;"),
            '<' => buffer.extend_from_slice(b"&lt;"),
            '>' => buffer.extend_from_slice(b"&gt;"),
            '"' => buffer.extend_from_slice(b"&quot;"),
            '\'' => buffer.extend_from_slice(b"&apos;"),
            // Control characters other than tab/newline/CR are not allowed in XML 1.0
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => dropped += 1,
            _ => {
                let mut buf = [0; 4];
                buffer.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    if dropped > 0 {
        warn!(
            "Dropped {} control character(s) XML cannot carry from text {:?}",
            dropped, s
        );
    }
    dropped
}

pub(crate) fn escape(s: &str) -> String {
    let mut buffer = Vec::with_capacity(s.len());
    write_escaped(&mut buffer, s);
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Decode the predefined entities and numeric character references
pub(crate) fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return Cow::Owned(out);
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Position of the next `<name` start tag at or after `from`, ignoring
/// longer names that share the prefix (`<c` vs `<col`)
pub(crate) fn find_start_tag(xml: &str, name: &str, from: usize) -> Option<usize> {
    let bytes = xml.as_bytes();
    let mut pos = from;
    while let Some(found) = xml.get(pos..)?.find('<') {
        let start = pos + found;
        let after = start + 1 + name.len();
        if xml.get(start + 1..after) == Some(name) {
            match bytes.get(after) {
                Some(b' ' | b'>' | b'/' | b'\t' | b'\n' | b'\r') => return Some(start),
                None => return Some(start),
                _ => {}
            }
        }
        pos = start + 1;
    }
    None
}

/// Value of attribute `name` inside a start tag
pub(crate) fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let mut pos = 0;
    while let Some(found) = tag[pos..].find(name) {
        let start = pos + found;
        let preceded = start > 0 && tag.as_bytes()[start - 1].is_ascii_whitespace();
        let rest = &tag[start + name.len()..];
        if preceded {
            if let Some(value) = rest.strip_prefix("=\"") {
                return value.find('"').map(|end| &value[..end]);
            }
            if let Some(value) = rest.strip_prefix("='") {
                return value.find('\'').map(|end| &value[..end]);
            }
        }
        pos = start + name.len();
    }
    None
}

/// Text between `<name ...>` and `</name>`; `Some("")` for a self-closing element
pub(crate) fn element_text<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let start = find_start_tag(xml, name, 0)?;
    let open_end = start + xml[start..].find('>')?;
    if xml[..open_end].ends_with('/') {
        return Some("");
    }
    let close = format!("</{}>", name);
    let content_end = open_end + 1 + xml[open_end + 1..].find(&close)?;
    Some(&xml[open_end + 1..content_end])
}

/// Decoded content of every `<t>` element, in document order
pub(crate) fn text_runs(xml: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut pos = 0;
    while let Some(start) = find_start_tag(xml, "t", pos) {
        let Some(open_len) = xml[start..].find('>') else {
            break;
        };
        let open_end = start + open_len;
        if xml[..open_end].ends_with('/') {
            runs.push(String::new());
            pos = open_end + 1;
            continue;
        }
        let Some(close) = xml[open_end..].find("</t>") else {
            break;
        };
        runs.push(decode_entities(&xml[open_end + 1..open_end + close]).into_owned());
        pos = open_end + close + 4;
    }
    runs
}
