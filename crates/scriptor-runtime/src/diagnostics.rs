//! Compiler diagnostics and their classification.
//!
//! Every diagnostic a compiler emits is routed through a
//! [`DiagnosticCollector`]. `ERROR` diagnostics go to the error stream and
//! everything else (warnings, mandatory warnings, notes, unknown kinds) goes
//! to the warning stream. Each entry is rendered as:
//!
//! ```text
//! ERROR
//! /apps/Service.java
//! ';' expected
//! Line: 3
//! Column: 27
//! ```

use std::fmt;

use serde::Serialize;

/// Severity reported by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticKind {
    Error,
    Warning,
    MandatoryWarning,
    Note,
    Other,
}

impl DiagnosticKind {
    /// Upper-case label used in rendered reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::MandatoryWarning => "MANDATORY_WARNING",
            Self::Note => "NOTE",
            Self::Other => "OTHER",
        }
    }

    /// Map a compiler's severity word (`error`, `warning`, `note`, ...).
    pub fn from_word(word: &str) -> Self {
        match word.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal error" => Self::Error,
            "warning" => Self::Warning,
            "mandatory warning" | "mandatory_warning" => Self::MandatoryWarning,
            "note" | "info" | "help" => Self::Note,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single compiler diagnostic.
///
/// Lines and columns are 1-based; `0` means the compiler gave no position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Originating source name, when the compiler reported one.
    pub source: Option<String>,
    pub message: String,
    pub line: u64,
    pub column: u64,
}

impl Diagnostic {
    /// Create a diagnostic without source or position.
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            source: None,
            message: message.into(),
            line: 0,
            column: 0,
        }
    }

    /// Create an error diagnostic without source or position.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Error, message)
    }

    /// Attach the originating source name.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach a position.
    pub fn at(mut self, line: u64, column: u64) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    /// Render in report format (one field per line, trailing newline).
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(self.kind.label());
        out.push('\n');
        if let Some(ref source) = self.source {
            out.push_str(source);
            out.push('\n');
        }
        out.push_str(&self.message);
        out.push('\n');
        out.push_str(&format!("Line: {}\n", self.line));
        out.push_str(&format!("Column: {}\n", self.column));
        out
    }
}

/// Classified result of one compile attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Rendered error diagnostics, in emission order.
    pub errors: String,
    /// Rendered non-error diagnostics, in emission order.
    pub warnings: String,
    pub error_count: usize,
    pub warning_count: usize,
    /// Every diagnostic, in emission order.
    pub entries: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Whether at least one error was reported.
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    /// Whether at least one non-error diagnostic was reported.
    pub fn has_warnings(&self) -> bool {
        self.warning_count > 0
    }

    /// Diagnostics made of a single error, for failures outside the compiler.
    pub fn single_error(message: impl Into<String>) -> Self {
        let mut collector = DiagnosticCollector::new();
        collector.report(Diagnostic::error(message));
        collector.finish()
    }
}

/// Accumulates diagnostics for one compile attempt.
///
/// Never stops early: all diagnostics are collected before the caller
/// decides pass/fail.
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    diagnostics: Diagnostics,
}

impl DiagnosticCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify and append one diagnostic.
    pub fn report(&mut self, diagnostic: Diagnostic) {
        let rendered = diagnostic.render();
        match diagnostic.kind {
            DiagnosticKind::Error => {
                self.diagnostics.errors.push_str(&rendered);
                self.diagnostics.error_count += 1;
            }
            // Anything that is not an error is a warning, notes included.
            _ => {
                self.diagnostics.warnings.push_str(&rendered);
                self.diagnostics.warning_count += 1;
            }
        }
        self.diagnostics.entries.push(diagnostic);
    }

    /// Number of errors reported so far.
    pub fn error_count(&self) -> usize {
        self.diagnostics.error_count
    }

    /// Finish the attempt.
    pub fn finish(self) -> Diagnostics {
        self.diagnostics
    }
}
