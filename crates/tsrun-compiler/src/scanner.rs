//! Literal and comment masking.
//!
//! The rewriter matches module syntax with regular expressions, so anything
//! that merely looks like code (comments, string and template text, regular
//! expression bodies) is blanked out first. The masked text has exactly the
//! same byte length and line structure as the source, so offsets found in it
//! apply to the original unchanged.

use crate::diagnostic::Diagnostic;

pub const UNTERMINATED_LITERAL: &str = "E0001";
pub const UNTERMINATED_TEMPLATE: &str = "E0002";
pub const UNTERMINATED_COMMENT: &str = "E0003";

/// Words after which a `/` starts a regular expression rather than a division.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// Source text with literal and comment contents replaced by spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedSource {
    pub masked: String,
}

/// Mask `source`, failing on the first unterminated literal or comment.
pub fn mask(source: &str) -> Result<MaskedSource, Diagnostic> {
    let mut scanner = Scanner::new(source);
    scanner.scan_code(false)?;
    Ok(MaskedSource {
        masked: String::from_utf8_lossy(&scanner.out).into_owned(),
    })
}

struct Scanner<'a> {
    source: &'a str,
    chars: std::str::CharIndices<'a>,
    current_pos: usize,
    current_char: Option<char>,
    out: Vec<u8>,
    /// Last non-whitespace character outside masked regions.
    last_significant: Option<char>,
    last_word: String,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        let mut chars = source.char_indices();
        let current_char = chars.next().map(|(_, c)| c);
        Self {
            source,
            chars,
            current_pos: 0,
            current_char,
            out: Vec::with_capacity(source.len()),
            last_significant: None,
            last_word: String::new(),
        }
    }

    fn advance(&mut self) {
        if let Some((pos, ch)) = self.chars.next() {
            self.current_pos = pos;
            self.current_char = Some(ch);
        } else {
            self.current_pos = self.source.len();
            self.current_char = None;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.clone().next().map(|(_, c)| c)
    }

    /// Copy the current character through and move on.
    fn keep(&mut self) {
        if let Some(ch) = self.current_char {
            let mut buf = [0u8; 4];
            self.out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
        self.advance();
    }

    /// Blank out the current character, preserving newlines and byte width.
    fn blank(&mut self) {
        if let Some(ch) = self.current_char {
            if ch == '\n' || ch == '\r' {
                self.out.push(ch as u8);
            } else {
                self.out.extend(std::iter::repeat(b' ').take(ch.len_utf8()));
            }
        }
        self.advance();
    }

    fn regex_allowed(&self) -> bool {
        match self.last_significant {
            None => true,
            Some(c) if c.is_alphanumeric() || c == '_' || c == '$' => {
                REGEX_PREFIX_KEYWORDS.contains(&self.last_word.as_str())
            }
            Some(c) => !matches!(c, ')' | ']' | '}' | '"' | '\'' | '`'),
        }
    }

    fn note_significant(&mut self, ch: char) {
        if ch.is_alphanumeric() || ch == '_' || ch == '$' {
            let continues_word = matches!(self.last_significant, Some(p) if p.is_alphanumeric() || p == '_' || p == '$')
                && self.out.last().is_some_and(|b| !b.is_ascii_whitespace());
            if !continues_word {
                self.last_word.clear();
            }
            self.last_word.push(ch);
        } else {
            self.last_word.clear();
        }
        self.last_significant = Some(ch);
    }

    /// Scan code. When `nested`, stop before the `}` closing a template
    /// substitution.
    fn scan_code(&mut self, nested: bool) -> Result<(), Diagnostic> {
        let mut depth = 0usize;

        while let Some(ch) = self.current_char {
            match ch {
                '/' if self.peek() == Some('/') => self.skip_single_line_comment(),
                '/' if self.peek() == Some('*') => self.skip_multi_line_comment()?,
                '\'' | '"' => {
                    self.read_string_literal(ch)?;
                    self.last_significant = Some(ch);
                    self.last_word.clear();
                }
                '`' => {
                    self.read_template_literal()?;
                    self.last_significant = Some('`');
                    self.last_word.clear();
                }
                '/' if self.regex_allowed() => {
                    self.read_regex_literal()?;
                    self.last_significant = Some(')');
                    self.last_word.clear();
                }
                '}' if nested && depth == 0 => return Ok(()),
                _ => {
                    match ch {
                        '{' => depth += 1,
                        '}' => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                    if !ch.is_whitespace() {
                        self.note_significant(ch);
                    }
                    self.keep();
                }
            }
        }

        Ok(())
    }

    fn skip_single_line_comment(&mut self) {
        while let Some(ch) = self.current_char {
            if ch == '\n' {
                break;
            }
            self.blank();
        }
    }

    fn skip_multi_line_comment(&mut self) -> Result<(), Diagnostic> {
        let start = self.current_pos;
        self.blank(); // /
        self.blank(); // *

        while let Some(ch) = self.current_char {
            if ch == '*' && self.peek() == Some('/') {
                self.blank();
                self.blank();
                return Ok(());
            }
            self.blank();
        }
        Err(Diagnostic::error("unterminated block comment")
            .with_code(UNTERMINATED_COMMENT)
            .with_span(start..self.current_pos))
    }

    fn read_string_literal(&mut self, quote: char) -> Result<(), Diagnostic> {
        let start = self.current_pos;
        self.keep(); // opening quote

        while let Some(ch) = self.current_char {
            if ch == quote {
                self.keep();
                return Ok(());
            } else if ch == '\\' {
                self.blank();
                self.blank();
            } else if ch == '\n' {
                break;
            } else {
                self.blank();
            }
        }

        Err(Diagnostic::error("unterminated string literal")
            .with_code(UNTERMINATED_LITERAL)
            .with_span(start..self.current_pos))
    }

    fn read_template_literal(&mut self) -> Result<(), Diagnostic> {
        let start = self.current_pos;
        self.keep(); // opening backtick

        while let Some(ch) = self.current_char {
            match ch {
                '`' => {
                    self.keep();
                    return Ok(());
                }
                '\\' => {
                    self.blank();
                    self.blank();
                }
                '$' if self.peek() == Some('{') => {
                    self.keep();
                    self.keep();
                    self.last_significant = Some('{');
                    self.last_word.clear();
                    self.scan_code(true)?;
                    if self.current_char != Some('}') {
                        break;
                    }
                    self.keep();
                }
                _ => self.blank(),
            }
        }

        Err(Diagnostic::error("unterminated template literal")
            .with_code(UNTERMINATED_TEMPLATE)
            .with_span(start..self.current_pos))
    }

    fn read_regex_literal(&mut self) -> Result<(), Diagnostic> {
        let start = self.current_pos;
        self.keep(); // opening slash
        let mut in_class = false;

        while let Some(ch) = self.current_char {
            match ch {
                '\n' => break,
                '\\' => {
                    self.blank();
                    self.blank();
                }
                '[' => {
                    in_class = true;
                    self.blank();
                }
                ']' => {
                    in_class = false;
                    self.blank();
                }
                '/' if !in_class => {
                    self.keep();
                    while matches!(self.current_char, Some(c) if c.is_ascii_alphabetic()) {
                        self.keep();
                    }
                    return Ok(());
                }
                _ => self.blank(),
            }
        }

        Err(Diagnostic::error("unterminated regular expression literal")
            .with_code(UNTERMINATED_LITERAL)
            .with_span(start..self.current_pos))
    }
}
