use std::{fmt, path};

/// How serious a [`Diagnostic`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
	Warning,
	Error,
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Severity::Warning => f.write_str("warning"),
			Severity::Error => f.write_str("error"),
		}
	}
}

/// What went wrong, independent of the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
	FileNotFound,
	IncludeCycle,
	UnreadableFile,
	MalformedInclude,
	Parse,
}

/// A file and a 1-based line inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
	pub path: path::PathBuf,
	pub line: usize,
}

/// A warning or error produced while preprocessing or parsing a shader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
	pub severity: Severity,
	pub kind: DiagnosticKind,
	pub message: String,
	pub location: Option<Location>,
}

impl Diagnostic {
	pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
		Self {
			severity: Severity::Error,
			kind,
			message: message.into(),
			location: None,
		}
	}

	pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
		Self {
			severity: Severity::Warning,
			..Self::error(kind, message)
		}
	}

	/// Attaches a source location to the diagnostic.
	pub fn at(mut self, path: impl Into<path::PathBuf>, line: usize) -> Self {
		self.location = Some(Location {
			path: path.into(),
			line,
		});
		self
	}

	pub fn is_error(&self) -> bool {
		self.severity == Severity::Error
	}
}

impl fmt::Display for Diagnostic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if let Some(location) = &self.location {
			write!(f, "{}:{}: ", location.path.display(), location.line)?;
		}
		write!(f, "{}: {}", self.severity, self.message)
	}
}

/// Returns `true` if any diagnostic in `diagnostics` has error severity.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
	diagnostics.iter().any(Diagnostic::is_error)
}
