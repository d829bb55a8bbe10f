//! Compiler diagnostics and their terminal rendering.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

use ariadne::{Config, Label, Report, ReportKind, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A message produced while compiling one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<&'static str>,
    pub message: String,
    pub file: Option<PathBuf>,
    /// Byte range into the file's source.
    pub span: Option<Range<usize>>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: None,
            message: message.into(),
            file: None,
            span: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_span(mut self, span: Range<usize>) -> Self {
        self.span = Some(span);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Render against the file's source text as an annotated snippet.
    ///
    /// Falls back to the one-line form when the diagnostic has no span.
    pub fn render(&self, source: &str) -> String {
        let Some(span) = self.span.clone() else {
            return self.to_string();
        };
        let name = self
            .file
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<input>".to_string());
        let span = span.start.min(source.len())..span.end.min(source.len());

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };
        let mut report = Report::build(kind, (name.as_str(), span.clone()))
            .with_config(Config::default().with_color(false))
            .with_message(&self.message)
            .with_label(Label::new((name.as_str(), span)).with_message(&self.message));
        if let Some(code) = self.code {
            report = report.with_code(code);
        }

        let mut buf = Vec::new();
        match report.finish().write((name.as_str(), Source::from(source)), &mut buf) {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => self.to_string(),
        }
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.code {
            Some(code) => write!(f, "{level}[{code}]: {}", self.message)?,
            None => write!(f, "{level}: {}", self.message)?,
        }
        if let Some(file) = &self.file {
            write!(f, " ({}", file.display())?;
            if let Some(span) = &self.span {
                write!(f, "@{}", span.start)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
