//! User-facing errors and warnings.
//!
//! Two kinds of diagnostics flow through the pipeline: syntax-level ones
//! that point at a byte range of the source, and pass-level ones (bind,
//! typing) whose subject is an IR node with no surviving position. The
//! [`Span`] type distinguishes the two, and [`Diagnostic::emit`] picks the
//! rendering accordingly: an ariadne report with a labelled snippet for
//! the former, a plain line for the latter.

use crate::span::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// An error with no source anchor, as produced by the IR passes.
    pub fn error(message: impl Into<String>) -> Self {
        Self::error_at(Span::synthetic(), message)
    }

    /// An error pointing at a source range.
    pub fn error_at(span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            span,
            notes: Vec::new(),
        }
    }

    pub fn warning_at(span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            span,
            notes: Vec::new(),
        }
    }

    /// Attach a follow-up line ("expected ...", "try ...").
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Write the diagnostic to stderr.
    pub fn emit(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let Some(range) = self.span.range() else {
            eprintln!("{}: {}: {}", filename, self.severity.label(), self.message);
            for note in &self.notes {
                eprintln!("  note: {}", note);
            }
            return;
        };

        let (kind, color) = match self.severity {
            Severity::Error => (ReportKind::Error, Color::Red),
            Severity::Warning => (ReportKind::Warning, Color::Yellow),
        };

        let mut report = Report::build(kind, filename, range.start)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, range))
                    .with_message(&self.message)
                    .with_color(color),
            );
        for note in &self.notes {
            report = report.with_note(note);
        }
        report
            .finish()
            .eprint((filename, Source::from(source)))
            .unwrap();
    }
}

/// Emit a batch of diagnostics in order.
pub fn emit_all(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diagnostic in diagnostics {
        diagnostic.emit(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_errors_are_synthetic() {
        let d = Diagnostic::error("unresolved identifier `k`");
        assert_eq!(d.severity, Severity::Error);
        assert!(d.span.range().is_none());
        assert!(d.notes.is_empty());
    }

    #[test]
    fn test_source_errors_keep_their_range() {
        let d = Diagnostic::error_at(Span::source(4, 9), "expected ';'");
        assert_eq!(d.span.range(), Some(4..9));
    }

    #[test]
    fn test_notes_accumulate_in_order() {
        let d = Diagnostic::error("type mismatch")
            .note("expected i32")
            .note("found bool");
        assert_eq!(d.notes, vec!["expected i32", "found bool"]);
    }

    #[test]
    fn test_emit_source_report_does_not_panic() {
        let source = "fn f i32() {\n   return (x);\n};\n";
        let d = Diagnostic::error_at(Span::source(24, 25), "unresolved identifier `x`");
        d.emit("test.prism", source);
    }

    #[test]
    fn test_emit_synthetic_does_not_panic() {
        let d = Diagnostic::error("return of 0 values from a function returning 1")
            .note("declared return type is i32");
        d.emit("test.prism", "");
    }
}
