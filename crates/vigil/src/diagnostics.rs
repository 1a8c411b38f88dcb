//! Problem → LSP diagnostic conversion and per-document grouping

use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticSeverity, NumberOrString, Position, PublishDiagnosticsParams, Range, Url,
};
use vigil_core::{Problem, Severity};

/// Value of `Diagnostic::source` for everything we publish
pub const DIAGNOSTIC_SOURCE: &str = "vigil";

pub fn convert_severity(severity: Severity) -> DiagnosticSeverity {
    match severity {
        Severity::Error => DiagnosticSeverity::ERROR,
        Severity::Warning => DiagnosticSeverity::WARNING,
        Severity::Information => DiagnosticSeverity::INFORMATION,
        Severity::Hint => DiagnosticSeverity::HINT,
    }
}

fn convert_range(range: vigil_core::Range) -> Range {
    Range {
        start: Position::new(range.start.line, range.start.character),
        end: Position::new(range.end.line, range.end.character),
    }
}

pub fn make_diagnostic(problem: &Problem) -> Diagnostic {
    Diagnostic {
        range: convert_range(problem.range),
        severity: Some(convert_severity(problem.severity)),
        code: Some(NumberOrString::String(problem.code.clone())),
        source: Some(DIAGNOSTIC_SOURCE.to_string()),
        message: problem.message.clone(),
        ..Default::default()
    }
}

/// Build one publish payload per affected document.
///
/// Problems without a source belong to `root`. The root and every known
/// dependency always get an entry (possibly empty) so stale diagnostics
/// from a previous pass are cleared. Order: documents in the order their
/// first problem appears, then the known dependencies, then the root.
pub fn make_publish_diagnostics_params(
    root: &Url,
    known_dependencies: &[Url],
    problems: &[Problem],
) -> Vec<PublishDiagnosticsParams> {
    let mut groups: Vec<(Url, Vec<Diagnostic>)> = Vec::new();

    for problem in problems {
        let uri = problem.source.as_ref().unwrap_or(root);
        let diagnostic = make_diagnostic(problem);
        match groups.iter_mut().find(|(u, _)| u == uri) {
            Some((_, diagnostics)) => diagnostics.push(diagnostic),
            None => groups.push((uri.clone(), vec![diagnostic])),
        }
    }

    for uri in known_dependencies.iter().chain(std::iter::once(root)) {
        if !groups.iter().any(|(u, _)| u == uri) {
            groups.push((uri.clone(), Vec::new()));
        }
    }

    groups
        .into_iter()
        .map(|(uri, diagnostics)| PublishDiagnosticsParams::new(uri, diagnostics, None))
        .collect()
}
