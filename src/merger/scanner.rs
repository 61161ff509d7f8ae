//! Comment and string aware scanning of target-language source.
//!
//! Every structural question the merger asks (where does this class end,
//! is this match real code or part of a comment) goes through [`Scanner`],
//! which walks the text once and reports only the bytes that are code.

use std::ops::Range;

/// Where the scanner currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Normal,
    LineComment,
    BlockComment,
    SingleQuoteString,
    DoubleQuoteString,
}

/// Walks source text byte by byte, yielding `(offset, byte)` for code bytes
/// only. Comment bodies, string bodies and their delimiters are skipped.
///
/// - `//` runs to end of line; the newline itself is code.
/// - `/* */` nests.
/// - `'...'` and `"..."` honour backslash escapes unless raw (`r'...'`).
///   Triple-quoted strings may span lines; other strings end at a newline.
///
/// Structural characters are ASCII, so scanning bytes is safe for UTF-8.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    state: ScanState,
    comment_depth: usize,
    triple: bool,
    raw: bool,
}

enum Step {
    Code(usize, u8),
    Skipped,
    End,
}

impl<'a> Scanner<'a> {
    pub fn new(text: &'a str) -> Self {
        Scanner::starting_at(text, 0)
    }

    /// Starts scanning at `pos`, assuming it is in code.
    pub fn starting_at(text: &'a str, pos: usize) -> Self {
        Scanner {
            bytes: text.as_bytes(),
            pos,
            state: ScanState::Normal,
            comment_depth: 0,
            triple: false,
            raw: false,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn step(&mut self) -> Step {
        let Some(&byte) = self.bytes.get(self.pos) else {
            return Step::End;
        };
        let at = self.pos;

        match self.state {
            ScanState::Normal => match byte {
                b'/' if self.peek(1) == Some(b'/') => {
                    self.state = ScanState::LineComment;
                    self.pos += 2;
                }
                b'/' if self.peek(1) == Some(b'*') => {
                    self.state = ScanState::BlockComment;
                    self.comment_depth = 1;
                    self.pos += 2;
                }
                b'\'' | b'"' => {
                    self.triple = self.peek(1) == Some(byte) && self.peek(2) == Some(byte);
                    self.raw = at > 0
                        && self.bytes[at - 1] == b'r'
                        && (at < 2 || !is_ident_byte(self.bytes[at - 2]));
                    self.state = if byte == b'\'' {
                        ScanState::SingleQuoteString
                    } else {
                        ScanState::DoubleQuoteString
                    };
                    self.pos += if self.triple { 3 } else { 1 };
                }
                _ => {
                    self.pos += 1;
                    return Step::Code(at, byte);
                }
            },
            ScanState::LineComment => {
                self.pos += 1;
                if byte == b'\n' {
                    self.state = ScanState::Normal;
                    return Step::Code(at, byte);
                }
            }
            ScanState::BlockComment => {
                if byte == b'*' && self.peek(1) == Some(b'/') {
                    self.pos += 2;
                    self.comment_depth -= 1;
                    if self.comment_depth == 0 {
                        self.state = ScanState::Normal;
                    }
                } else if byte == b'/' && self.peek(1) == Some(b'*') {
                    self.pos += 2;
                    self.comment_depth += 1;
                } else {
                    self.pos += 1;
                }
            }
            ScanState::SingleQuoteString | ScanState::DoubleQuoteString => {
                let quote = if self.state == ScanState::SingleQuoteString {
                    b'\''
                } else {
                    b'"'
                };
                if byte == b'\\' && !self.raw {
                    self.pos += 2;
                } else if byte == quote {
                    if !self.triple {
                        self.pos += 1;
                        self.state = ScanState::Normal;
                    } else if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                        self.pos += 3;
                        self.state = ScanState::Normal;
                    } else {
                        self.pos += 1;
                    }
                } else if byte == b'\n' && !self.triple {
                    // Unterminated single-line string.
                    self.pos += 1;
                    self.state = ScanState::Normal;
                    return Step::Code(at, byte);
                } else {
                    self.pos += 1;
                }
            }
        }
        Step::Skipped
    }
}

impl Iterator for Scanner<'_> {
    type Item = (usize, u8);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.step() {
                Step::Code(at, byte) => return Some((at, byte)),
                Step::Skipped => continue,
                Step::End => return None,
            }
        }
    }
}

pub fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$'
}

/// Offset of the `}` closing the `{` at `open`, or `None` if `open` is not
/// a brace or the block never closes.
pub fn find_matching_brace(text: &str, open: usize) -> Option<usize> {
    if text.as_bytes().get(open) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    for (at, byte) in Scanner::starting_at(text, open) {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(at);
                }
            }
            _ => {}
        }
    }
    None
}

/// Offset of the first `;` in code at or after `from` that is not nested in
/// any bracket opened after `from`.
pub fn find_statement_end(text: &str, from: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (at, byte) in Scanner::starting_at(text, from) {
        match byte {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.checked_sub(1)?,
            b';' if depth == 0 => return Some(at),
            _ => {}
        }
    }
    None
}

/// The state that consumes byte `pos`: `Normal` exactly when the byte is
/// code. Opening delimiters belong to the comment or string they open.
pub fn state_at(text: &str, pos: usize) -> ScanState {
    let mut scanner = Scanner::new(text);
    loop {
        let before = scanner.state();
        match scanner.step() {
            Step::End => return scanner.state(),
            Step::Code(at, _) if at == pos => return ScanState::Normal,
            _ if scanner.offset() > pos => {
                return if before == ScanState::Normal {
                    scanner.state()
                } else {
                    before
                };
            }
            _ => {}
        }
    }
}

/// Brace nesting depth at `pos` if it is in code, `None` inside a comment
/// or string.
pub fn brace_depth_at(text: &str, pos: usize) -> Option<usize> {
    if state_at(text, pos) != ScanState::Normal {
        return None;
    }
    let mut depth = 0usize;
    for (at, byte) in Scanner::new(text) {
        if at >= pos {
            break;
        }
        match byte {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Some(depth)
}

/// Maximal byte ranges of `text` that are code.
pub fn code_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for (at, _) in Scanner::new(text) {
        match ranges.last_mut() {
            Some(last) if last.end == at => last.end = at + 1,
            _ => ranges.push(at..at + 1),
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn code(text: &str) -> String {
        Scanner::new(text).map(|(_, b)| b as char).collect()
    }

    #[test]
    fn test_skips_comments_and_strings() {
        let text = "a // x { \nb /* { /* } */ } */ c 'd{' \"e}\" f";
        assert_eq!(code(text), "a \nb  c   f");
    }

    #[test]
    fn test_escaped_quotes_stay_in_string() {
        assert_eq!(code(r#"x = 'it\'s {'; y"#), "x = ; y");
        assert_eq!(code(r#"x = "a\"}"; y"#), "x = ; y");
    }

    #[test]
    fn test_raw_and_triple_quoted_strings() {
        assert_eq!(code(r"a = r'\'; b"), "a = r; b");
        assert_eq!(code("a = '''x\n'}\n'''; b"), "a = ; b");
        assert_eq!(code("a = \"\"\"{\"\"\"; b"), "a = ; b");
    }

    #[test]
    fn test_single_line_string_ends_at_newline() {
        assert_eq!(code("a = 'oops\n}"), "a = \n}");
    }

    #[rstest]
    #[case("class A { }", 8, Some(10))]
    #[case("{ '}' }", 0, Some(6))]
    #[case("{ // }\n }", 0, Some(8))]
    #[case("{ /* } */ { } }", 0, Some(14))]
    #[case("{ \"\\\"}\" }", 0, Some(8))]
    #[case("{ { }", 0, None)]
    #[case("abc", 1, None)]
    fn test_find_matching_brace(#[case] text: &str, #[case] open: usize, #[case] expected: Option<usize>) {
        assert_eq!(find_matching_brace(text, open), expected);
    }

    #[test]
    fn test_state_at() {
        let text = "a // c\n'x' /* y */ \"z\"";
        assert_eq!(state_at(text, 0), ScanState::Normal);
        assert_eq!(state_at(text, 5), ScanState::LineComment);
        assert_eq!(state_at(text, 6), ScanState::Normal);
        assert_eq!(state_at(text, 7), ScanState::SingleQuoteString);
        assert_eq!(state_at(text, 8), ScanState::SingleQuoteString);
        assert_eq!(state_at(text, 10), ScanState::Normal);
        assert_eq!(state_at(text, 15), ScanState::BlockComment);
        assert_eq!(state_at(text, 21), ScanState::DoubleQuoteString);
    }

    #[test]
    fn test_brace_depth_at() {
        let text = "class A {\n  void f() { x; }\n  // {\n}";
        assert_eq!(brace_depth_at(text, 0), Some(0));
        assert_eq!(brace_depth_at(text, text.find("void").unwrap()), Some(1));
        assert_eq!(brace_depth_at(text, text.find("x;").unwrap()), Some(2));
        assert_eq!(brace_depth_at(text, text.rfind('{').unwrap()), None);
    }

    #[test]
    fn test_code_ranges() {
        let text = "ab // c\nd 'e' f";
        let ranges = code_ranges(text);
        let pieces: Vec<&str> = ranges.iter().map(|r| &text[r.clone()]).collect();
        assert_eq!(pieces, vec!["ab ", "\nd ", " f"]);
    }

    #[rstest]
    #[case(" a(b; c) ';' /* ; */ {x;} ;", Some(26))]
    #[case(" [1, 2].map((e) { return e; }).toList();\n  next;", Some(39))]
    #[case(" x }", None)]
    #[case(" x", None)]
    fn test_find_statement_end(#[case] text: &str, #[case] expected: Option<usize>) {
        assert_eq!(find_statement_end(text, 0), expected);
    }
}
