use std::{fmt, path};

use crate::diagnostic::{Diagnostic, DiagnosticKind};

const DIRECTIVE_PREFIX: &str = "#";
const INCLUDE_KEYWORD: &str = "include";
const INCLUDE_LINE_PATTERN: &str =
	const_format::concatcp!(r"^\s*", DIRECTIVE_PREFIX, r"\s*", INCLUDE_KEYWORD, r"\b");
const INCLUDE_OPERAND_PATTERN: &str = const_format::concatcp!(
	INCLUDE_LINE_PATTERN,
	r#"\s*(?:"([^"]+)"|<([^>]+)>)\s*(?://.*|/\*.*\*/\s*)?$"#
);

lazy_static::lazy_static! {
	static ref INCLUDE_LINE: regex::Regex = regex::Regex::new(INCLUDE_LINE_PATTERN).unwrap();
	static ref INCLUDE_OPERAND: regex::Regex = regex::Regex::new(INCLUDE_OPERAND_PATTERN).unwrap();
}

/// Ordered list of directories searched for included files. The first directory that
/// contains the requested file wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
	directories: Vec<path::PathBuf>,
}

impl SearchPath {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, directory: impl Into<path::PathBuf>) -> &mut Self {
		self.directories.push(directory.into());
		self
	}

	pub fn iter(&self) -> impl Iterator<Item = &path::Path> {
		self.directories.iter().map(path::PathBuf::as_path)
	}

	fn candidates<'a>(&'a self, requested: &'a str) -> impl Iterator<Item = path::PathBuf> + 'a {
		self.iter()
			.map(move |directory| directory.join(requested))
			.filter(|candidate| candidate.exists())
	}
}

impl<P: Into<path::PathBuf>> FromIterator<P> for SearchPath {
	fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
		Self {
			directories: iter.into_iter().map(Into::into).collect(),
		}
	}
}

/// How the file name of an include directive was delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeStyle {
	/// `#include "file"`, searched next to the including file first.
	Quoted,
	/// `#include <file>`, searched on the search path only.
	Angled,
}

/// The operand of one `#include` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeRequest {
	pub path: String,
	pub style: IncludeStyle,
}

impl IncludeRequest {
	/// Recognizes an include directive.
	///
	/// Returns [`None`] when `line` is not an include directive at all, and a
	/// [`IncludeError::Malformed`] when it is one but has no usable operand.
	pub fn parse(line: &str) -> Option<Result<Self, IncludeError>> {
		if !INCLUDE_LINE.is_match(line) {
			return None;
		}
		let request = INCLUDE_OPERAND.captures(line).and_then(|captures| {
			captures
				.get(1)
				.map(|quoted| Self::quoted(quoted.as_str()))
				.or_else(|| captures.get(2).map(|angled| Self::angled(angled.as_str())))
		});
		Some(request.ok_or_else(|| IncludeError::Malformed {
			directive: line.trim().to_string(),
		}))
	}

	pub fn quoted(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			style: IncludeStyle::Quoted,
		}
	}

	pub fn angled(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			style: IncludeStyle::Angled,
		}
	}
}

impl fmt::Display for IncludeRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.style {
			IncludeStyle::Quoted => write!(f, "\"{}\"", self.path),
			IncludeStyle::Angled => write!(f, "<{}>", self.path),
		}
	}
}

/// One shader file, top-level or included. Its contents are never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
	pub path: path::PathBuf,
	pub contents: String,
}

impl SourceUnit {
	pub fn new(path: impl Into<path::PathBuf>, contents: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			contents: contents.into(),
		}
	}

	/// Reads the file at `path`.
	pub fn read(path: impl AsRef<path::Path>) -> Result<Self, ex::io::Error> {
		let path = path.as_ref();
		let contents = ex::fs::read_to_string(path)?;
		Ok(Self::new(path, contents))
	}
}

/// Failure to turn an include directive into a [`SourceUnit`].
#[derive(Debug, thiserror::Error)]
pub enum IncludeError {
	#[error("cannot find include file {request}")]
	FileNotFound { request: IncludeRequest },
	#[error("include cycle: {}", format_chain(.chain, .path))]
	IncludeCycle {
		path: path::PathBuf,
		chain: Vec<path::PathBuf>,
	},
	#[error("cannot read include file {}: {source}", .path.display())]
	UnreadableFile {
		path: path::PathBuf,
		#[source]
		source: ex::io::Error,
	},
	#[error("malformed include directive `{directive}`")]
	Malformed { directive: String },
}

fn format_chain(chain: &[path::PathBuf], repeated: &path::Path) -> String {
	chain
		.iter()
		.map(|path| path.as_path())
		.chain(std::iter::once(repeated))
		.map(|path| path.display().to_string())
		.collect::<Vec<_>>()
		.join(" -> ")
}

impl IncludeError {
	pub fn kind(&self) -> DiagnosticKind {
		match self {
			IncludeError::FileNotFound { .. } => DiagnosticKind::FileNotFound,
			IncludeError::IncludeCycle { .. } => DiagnosticKind::IncludeCycle,
			IncludeError::UnreadableFile { .. } => DiagnosticKind::UnreadableFile,
			IncludeError::Malformed { .. } => DiagnosticKind::MalformedInclude,
		}
	}

	pub fn to_diagnostic(&self) -> Diagnostic {
		Diagnostic::error(self.kind(), self.to_string())
	}
}

/// Locates and reads the file named by an include directive.
///
/// `chain` holds the files currently being preprocessed, top-level first, as produced
/// by [`canonical_path`]. Implementations should refuse a file that is already in it;
/// the preprocessor rejects such a file as an include cycle in any case.
pub trait IncludeResolver {
	fn resolve(
		&self,
		request: &IncludeRequest,
		from_file: &path::Path,
		chain: &[path::PathBuf],
	) -> Result<SourceUnit, IncludeError>;
}

/// Resolves includes against the file system.
///
/// Quoted includes are looked up next to the including file, then on the search path;
/// angled includes only on the search path. Nothing is cached: every run reads the
/// files again.
#[derive(Debug, Clone, Default)]
pub struct FileIncluder {
	search_path: SearchPath,
}

impl FileIncluder {
	pub fn new(search_path: SearchPath) -> Self {
		Self { search_path }
	}

	pub fn search_path(&self) -> &SearchPath {
		&self.search_path
	}

	/// Returns every existing candidate for `request`, in search order.
	pub fn candidates(&self, request: &IncludeRequest, from_file: &path::Path) -> Vec<path::PathBuf> {
		let mut candidates = Vec::new();
		if request.style == IncludeStyle::Quoted {
			let directory = from_file.parent().unwrap_or(path::Path::new("./"));
			let candidate = directory.join(&request.path);
			if candidate.exists() {
				candidates.push(candidate);
			}
		}
		candidates.extend(self.search_path.candidates(&request.path));
		candidates
	}
}

impl IncludeResolver for FileIncluder {
	/// Reads the first candidate that is a readable file. Candidates that exist but cannot
	/// be read are passed over; if every one of them fails, the first failure is reported.
	fn resolve(
		&self,
		request: &IncludeRequest,
		from_file: &path::Path,
		chain: &[path::PathBuf],
	) -> Result<SourceUnit, IncludeError> {
		let mut unreadable = None;
		for path in self.candidates(request, from_file) {
			let unit = match SourceUnit::read(&path) {
				Ok(unit) => unit,
				Err(source) => {
					log::debug!("skipping unreadable candidate {}: {source}", path.display());
					if unreadable.is_none() {
						unreadable = Some(IncludeError::UnreadableFile { path, source });
					}
					continue;
				}
			};
			if chain.contains(&canonical_path(&path)) {
				return Err(IncludeError::IncludeCycle {
					path,
					chain: chain.to_vec(),
				});
			}
			log::debug!(
				"{request} from {} resolved to {}",
				from_file.display(),
				path.display()
			);
			return Ok(unit);
		}
		Err(unreadable.unwrap_or_else(|| IncludeError::FileNotFound {
			request: request.clone(),
		}))
	}
}

/// Identity of a file for cycle detection. Paths that cannot be canonicalized, such as
/// the names of in-memory sources, are used as given.
pub fn canonical_path(path: &path::Path) -> path::PathBuf {
	std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
