//! Diagnostic rendering for collected parse errors.
//!
//! Errors accumulate in the parser up to the ceiling and are rendered as
//! one combined report with source context.

use crate::parser::ParseError;
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term::{self, termcolor::ColorChoice, termcolor::StandardStream};

/// Render all collected errors to stderr with source context.
pub fn render_errors(filename: &str, source: &str, errors: &[ParseError]) {
    let file = SimpleFile::new(filename, source);
    let writer = StandardStream::stderr(ColorChoice::Auto);
    let config = term::Config::default();

    for error in errors {
        let mut labels = Vec::new();
        if error.span.end > error.span.start && error.span.end <= source.len() {
            labels.push(Label::primary((), error.span.start..error.span.end));
        }

        let mut diagnostic = Diagnostic::error()
            .with_message(&error.message)
            .with_labels(labels);

        if let Some(suggestion) = &error.suggestion {
            diagnostic = diagnostic.with_notes(vec![format!("try: {suggestion}")]);
        }

        let _ = term::emit(&mut writer.lock(), &config, &file, &diagnostic);
    }
}

/// Format errors as plain text (used by tests and non-tty consumers).
pub fn format_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
