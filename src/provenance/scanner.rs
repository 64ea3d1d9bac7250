//! Line-indexed scan of a policy document's `Statement` value.
//!
//! The scan works on raw source text, before or after variable substitution.
//! It only needs brackets and strings to be balanced, so template references
//! such as `{{.ARNS}}` in value position do not disturb it. Recorded lines
//! are the lines a human sees in the original file.

/// Byte and line extent of one statement in the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementSpan {
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    /// 1-based line of the first character.
    pub start_line: usize,
    /// 1-based line of the last character.
    pub end_line: usize,
}

impl StatementSpan {
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// How the `Statement` value is laid out in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementLayout {
    /// `"Statement": [ ... ]`, one span per element.
    Array(Vec<StatementSpan>),
    /// `"Statement": { ... }`.
    Single(StatementSpan),
    /// No top-level `Statement` key could be located.
    Missing,
}

impl StatementLayout {
    /// Span of the statement at `index`, if the scan found one.
    pub fn span(&self, index: usize) -> Option<StatementSpan> {
        match self {
            Self::Array(spans) => spans.get(index).copied(),
            Self::Single(span) if index == 0 => Some(*span),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Array(spans) => spans.len(),
            Self::Single(_) => 1,
            Self::Missing => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Maps byte offsets to 1-based line numbers.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    /// 1-based line containing `offset`.
    pub fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&start| start <= offset)
    }

    /// Byte offset of a 1-based (line, column) position.
    pub fn offset_of(&self, line: usize, column: usize) -> Option<usize> {
        let start = *self.starts.get(line.checked_sub(1)?)?;
        Some(start + column.saturating_sub(1))
    }
}

/// Locate the statements of the top-level `Statement` value in `text`.
pub fn scan_statements(text: &str) -> StatementLayout {
    let bytes = text.as_bytes();
    let Some(value_start) = find_statement_value(bytes) else {
        return StatementLayout::Missing;
    };
    let lines = LineIndex::new(text);
    let span = |start: usize, end: usize| StatementSpan {
        start,
        end,
        start_line: lines.line_of(start),
        end_line: lines.line_of(end.saturating_sub(1).max(start)),
    };

    match bytes[value_start] {
        b'[' => {
            let mut spans = Vec::new();
            let mut pos = value_start + 1;
            loop {
                pos = skip_ws(bytes, pos);
                match bytes.get(pos) {
                    None | Some(b']') => break,
                    Some(b',') => {
                        pos += 1;
                        continue;
                    }
                    Some(_) => {}
                }
                let end = skip_value(bytes, pos);
                if end <= pos {
                    break;
                }
                spans.push(span(pos, end));
                pos = end;
            }
            StatementLayout::Array(spans)
        }
        b'{' => {
            let end = skip_value(bytes, value_start);
            StatementLayout::Single(span(value_start, end))
        }
        _ => StatementLayout::Missing,
    }
}

/// Offset of the first byte of the top-level `Statement` value.
fn find_statement_value(bytes: &[u8]) -> Option<usize> {
    let mut pos = skip_ws(bytes, 0);
    if bytes.get(pos) != Some(&b'{') {
        return None;
    }
    pos += 1;
    loop {
        pos = skip_ws(bytes, pos);
        match bytes.get(pos)? {
            b'}' => return None,
            b',' => {
                pos += 1;
                continue;
            }
            b'"' => {}
            _ => return None,
        }
        let key_end = skip_string(bytes, pos);
        let key = &bytes[pos + 1..key_end.saturating_sub(1).max(pos + 1)];
        pos = skip_ws(bytes, key_end);
        if bytes.get(pos) != Some(&b':') {
            return None;
        }
        pos = skip_ws(bytes, pos + 1);
        bytes.get(pos)?;
        if key == b"Statement" {
            return Some(pos);
        }
        pos = skip_value(bytes, pos);
    }
}

fn skip_ws(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// `bytes[pos]` is an opening quote; returns the offset after the closing one.
fn skip_string(bytes: &[u8], pos: usize) -> usize {
    let mut i = pos + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Offset just past the value starting at `pos`.
fn skip_value(bytes: &[u8], pos: usize) -> usize {
    match bytes.get(pos) {
        Some(b'"') => skip_string(bytes, pos),
        Some(b'{') | Some(b'[') => {
            let mut depth = 0usize;
            let mut i = pos;
            while i < bytes.len() {
                match bytes[i] {
                    b'"' => {
                        i = skip_string(bytes, i);
                        continue;
                    }
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            return i + 1;
                        }
                    }
                    _ => {}
                }
                i += 1;
            }
            bytes.len()
        }
        Some(_) => {
            let mut i = pos;
            while i < bytes.len() && !matches!(bytes[i], b',' | b'}' | b']') {
                i += 1;
            }
            // Trailing whitespace belongs to the separator, not the value.
            while i > pos && bytes[i - 1].is_ascii_whitespace() {
                i -= 1;
            }
            i
        }
        None => pos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Sid": "AllowRead",
      "Effect": "Allow",
      "Action": "s3:GetObject",
      "Resource": "arn:aws:s3:::{{.BUCKET}}/*"
    },
    {
      "Sid": "DenyDelete", "Effect": "Deny",
      "Action": "s3:Delete*", "Resource": {{.ARNS}}
    }
  ]
}
"#;

    #[test]
    fn test_array_statement_lines() {
        let layout = scan_statements(POLICY);
        assert_eq!(layout.len(), 2);
        let first = layout.span(0).unwrap();
        assert_eq!((first.start_line, first.end_line), (4, 9));
        let second = layout.span(1).unwrap();
        assert_eq!((second.start_line, second.end_line), (10, 13));
        assert!(POLICY[first.start..first.end].contains("AllowRead"));
        assert!(POLICY[second.start..second.end].ends_with('}'));
    }

    #[test]
    fn test_single_statement_object() {
        let text = "{\"Statement\": {\"Effect\": \"Allow\"},\n\"Version\": \"2012-10-17\"}";
        let layout = scan_statements(text);
        assert!(matches!(layout, StatementLayout::Single(_)));
        assert_eq!(layout.span(0).unwrap().start_line, 1);
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let text = r#"{"Id": "x}]", "Statement": [{"Sid": "a{b"}, {"Sid": "c]"}]}"#;
        assert_eq!(scan_statements(text).len(), 2);
    }

    #[test]
    fn test_missing_statement() {
        assert_eq!(scan_statements(r#"{"Effect": "Allow"}"#), StatementLayout::Missing);
        assert_eq!(scan_statements("[1, 2]"), StatementLayout::Missing);
        assert_eq!(scan_statements(""), StatementLayout::Missing);
    }

    #[test]
    fn test_line_index_offsets() {
        let index = LineIndex::new("ab\ncd\n");
        assert_eq!(index.line_of(0), 1);
        assert_eq!(index.line_of(3), 2);
        assert_eq!(index.offset_of(2, 2), Some(4));
        assert_eq!(index.offset_of(9, 1), None);
        assert_eq!(index.line_of(6), 3);
    }
}
