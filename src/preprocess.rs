use std::{borrow, path};

use crate::{
	diagnostic::{self, Diagnostic},
	include::{self, IncludeError, IncludeRequest, IncludeResolver, SourceUnit},
	macros::MacroTable,
};

lazy_static::lazy_static! {
	static ref IDENTIFIER: regex::Regex = regex::Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").unwrap();
	static ref DIRECTIVE: regex::Regex = regex::Regex::new(r"^\s*#\s*([A-Za-z_][A-Za-z0-9_]*)").unwrap();
}

/// Directives whose first operand names a macro rather than using it.
const NAMING_DIRECTIVES: [&str; 4] = ["define", "undef", "ifdef", "ifndef"];

/// What to do when an include directive cannot be satisfied.
/// Include cycles are always fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludePolicy {
	/// Stop and return no output.
	#[default]
	Fatal,
	/// Report a warning, blank out the directive line and keep going.
	Skip,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreprocessOptions {
	pub include_failures: IncludePolicy,
	/// Surround spliced includes with `#line` directives.
	pub line_markers: bool,
}

/// Result of one preprocessing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preprocessed {
	/// The preprocessed text, or [`None`] if a fatal diagnostic stopped the run.
	pub output: Option<String>,
	pub diagnostics: Vec<Diagnostic>,
	/// The top-level file followed by every included file, in first-inclusion order.
	/// With line markers enabled, indices into this list are the source-string numbers.
	pub files: Vec<path::PathBuf>,
}

impl Preprocessed {
	pub fn is_success(&self) -> bool {
		self.output.is_some() && !diagnostic::has_errors(&self.diagnostics)
	}

	/// Files pulled in through include directives.
	pub fn includes(&self) -> &[path::PathBuf] {
		self.files.get(1..).unwrap_or_default()
	}

	pub fn into_result(self) -> Result<String, Vec<Diagnostic>> {
		if diagnostic::has_errors(&self.diagnostics) {
			return Err(self.diagnostics);
		}
		self.output.ok_or(self.diagnostics)
	}
}

/// Splices includes and substitutes macros, one line at a time.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
	options: PreprocessOptions,
}

/// Marker for a diagnostic that ends the run.
struct Fatal;

struct Run<'a, R: ?Sized> {
	options: &'a PreprocessOptions,
	macros: &'a MacroTable,
	resolver: &'a R,
	chain: Vec<path::PathBuf>,
	files: Vec<path::PathBuf>,
	diagnostics: Vec<Diagnostic>,
	output: String,
}

impl Preprocessor {
	pub fn new(options: PreprocessOptions) -> Self {
		Self { options }
	}

	pub fn options(&self) -> &PreprocessOptions {
		&self.options
	}

	/// Preprocesses `unit` and everything it includes.
	///
	/// # Arguments
	/// - `unit` - The top-level source. Quoted includes are resolved relative to its path.
	/// - `macros` - Object-like macros substituted into every non-include line.
	/// - `resolver` - Supplies the contents of included files.
	///
	/// Failures never escape as errors: they are reported in [`Preprocessed::diagnostics`],
	/// and a fatal one leaves [`Preprocessed::output`] empty.
	pub fn preprocess<R: IncludeResolver + ?Sized>(
		&self,
		unit: &SourceUnit,
		macros: &MacroTable,
		resolver: &R,
	) -> Preprocessed {
		let mut run = Run {
			options: &self.options,
			macros,
			resolver,
			chain: Vec::new(),
			files: Vec::new(),
			diagnostics: Vec::new(),
			output: String::with_capacity(unit.contents.len()),
		};
		let completed = run.process(unit).is_ok();
		Preprocessed {
			output: completed.then_some(run.output),
			diagnostics: run.diagnostics,
			files: run.files,
		}
	}

	/// Preprocesses in-memory text. `path` names the source in diagnostics and anchors
	/// quoted includes.
	pub fn preprocess_str<R: IncludeResolver + ?Sized>(
		&self,
		path: impl Into<path::PathBuf>,
		text: &str,
		macros: &MacroTable,
		resolver: &R,
	) -> Preprocessed {
		self.preprocess(&SourceUnit::new(path, text), macros, resolver)
	}
}

impl<'a, R: IncludeResolver + ?Sized> Run<'a, R> {
	fn process(&mut self, unit: &SourceUnit) -> Result<(), Fatal> {
		self.chain.push(include::canonical_path(&unit.path));
		let file_index = self.file_index(&unit.path);
		let mut lines = unit.contents.split_inclusive('\n').enumerate().peekable();
		while let Some((index, line)) = lines.next() {
			let line_number = index + 1;
			let last_line = lines.peek().is_none();
			let (text, ending) = split_line_ending(line);
			match IncludeRequest::parse(text) {
				None => {
					self.output.push_str(&substitute(text, self.macros));
					self.output.push_str(ending);
				}
				Some(request) => {
					let included = request
						.and_then(|request| self.resolver.resolve(&request, &unit.path, &self.chain))
						.and_then(|included| self.refuse_active(included));
					match included {
						Ok(included) => {
							let resume_at = (!last_line).then_some(line_number + 1);
							self.splice(&included, resume_at, file_index, ending)?;
						}
						Err(error) => {
							self.report(error, &unit.path, line_number)?;
							self.output.push_str(ending);
						}
					}
				}
			}
		}
		self.chain.pop();
		Ok(())
	}

	/// Rejects a unit whose file is already being processed, whatever the resolver said.
	fn refuse_active(&self, included: SourceUnit) -> Result<SourceUnit, IncludeError> {
		if self.chain.contains(&include::canonical_path(&included.path)) {
			return Err(IncludeError::IncludeCycle {
				path: included.path,
				chain: self.chain.clone(),
			});
		}
		Ok(included)
	}

	/// Splices `included` into the output. `resume_at` is the parent's next line, if it
	/// has one; line markers return to it after the included text.
	fn splice(
		&mut self,
		included: &SourceUnit,
		resume_at: Option<usize>,
		parent_index: usize,
		ending: &str,
	) -> Result<(), Fatal> {
		if self.options.line_markers {
			let index = self.file_index(&included.path);
			self.output.push_str(&format!("#line 1 {index}\n"));
		}
		let start = self.output.len();
		self.process(included)?;
		if !ending.is_empty() && !self.output[start..].ends_with('\n') {
			self.output.push_str(ending);
		}
		if let (true, Some(resume_at)) = (self.options.line_markers, resume_at) {
			if !self.output.ends_with('\n') {
				self.output.push('\n');
			}
			self.output
				.push_str(&format!("#line {resume_at} {parent_index}\n"));
		}
		Ok(())
	}

	fn report(&mut self, error: IncludeError, path: &path::Path, line: usize) -> Result<(), Fatal> {
		let diagnostic = error.to_diagnostic().at(path, line);
		let fatal = matches!(error, IncludeError::IncludeCycle { .. })
			|| self.options.include_failures == IncludePolicy::Fatal;
		if fatal {
			self.diagnostics.push(diagnostic);
			return Err(Fatal);
		}
		log::warn!("{diagnostic}, skipping the directive");
		self.diagnostics.push(Diagnostic {
			severity: diagnostic::Severity::Warning,
			..diagnostic
		});
		Ok(())
	}

	fn file_index(&mut self, path: &path::Path) -> usize {
		match self.files.iter().position(|file| file == path) {
			Some(index) => index,
			None => {
				self.files.push(path.to_path_buf());
				self.files.len() - 1
			}
		}
	}
}

fn split_line_ending(line: &str) -> (&str, &str) {
	let text = line.trim_end_matches(['\n', '\r']);
	(text, &line[text.len()..])
}

/// Replaces every identifier of `line` that names a macro with the macro's value.
///
/// Substituted text is not scanned again. On directive lines the directive keyword and
/// the macro operand of `#define`, `#undef`, `#ifdef`, `#ifndef` and `defined` stay as
/// written.
pub fn substitute<'l>(line: &'l str, macros: &MacroTable) -> borrow::Cow<'l, str> {
	if macros.is_empty() {
		return borrow::Cow::Borrowed(line);
	}
	let directive = DIRECTIVE.captures(line).and_then(|captures| captures.get(1));
	let mut protect_next = directive
		.map(|keyword| NAMING_DIRECTIVES.contains(&keyword.as_str()))
		.unwrap_or(false);

	let mut result = String::new();
	let mut copied = 0;
	for identifier in IDENTIFIER.find_iter(line) {
		if directive.is_some_and(|keyword| keyword.range() == identifier.range()) {
			continue;
		}
		if protect_next {
			protect_next = false;
			continue;
		}
		if directive.is_some() && identifier.as_str() == "defined" {
			protect_next = true;
			continue;
		}
		if let Some(value) = macros.resolve(identifier.as_str()) {
			log::trace!("substituting {} with `{value}`", identifier.as_str());
			result.push_str(&line[copied..identifier.start()]);
			result.push_str(value);
			copied = identifier.end();
		}
	}
	if copied == 0 {
		return borrow::Cow::Borrowed(line);
	}
	result.push_str(&line[copied..]);
	borrow::Cow::Owned(result)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		diagnostic::{DiagnosticKind, Severity},
		include::{FileIncluder, SearchPath},
	};
	use std::collections::HashMap;

	fn macros() -> MacroTable {
		[
			("X", "1"),
			("ACC_TYPE", "float"),
			("LOAD_VEC_A", "4"),
			("DATA_A_F32", "1"),
		]
		.into_iter()
		.collect()
	}

	fn run_file(path: &str, options: PreprocessOptions) -> Preprocessed {
		let unit = SourceUnit::read(path).unwrap();
		Preprocessor::new(options).preprocess(&unit, &macros(), &FileIncluder::default())
	}

	fn output_of(path: &str) -> String {
		run_file(path, PreprocessOptions::default()).output.unwrap()
	}

	fn skipping() -> PreprocessOptions {
		PreprocessOptions {
			include_failures: IncludePolicy::Skip,
			..Default::default()
		}
	}

	#[test]
	fn substitute_single_token() {
		assert_eq!(substitute("a X b", &macros()), "a 1 b");
	}

	#[test]
	fn substitute_whole_identifiers_only() {
		assert_eq!(
			substitute("XX X_ X1 _X X.x 1X", &macros()),
			"XX X_ X1 _X 1.x 1X"
		);
	}

	#[test]
	fn unknown_identifiers_unchanged() {
		let line = "shared ACC_TYPE2 buf_a[BM * SHMEM_STRIDE];";
		assert!(matches!(substitute(line, &macros()), borrow::Cow::Borrowed(_)));
	}

	#[test]
	fn substitution_is_not_rescanned() {
		let table: MacroTable = [("A", "B"), ("B", "A")].into_iter().collect();
		assert_eq!(substitute("A B", &table), "B A");
	}

	#[test]
	fn directive_operands_are_protected() {
		let table = macros();
		assert_eq!(substitute("#ifdef DATA_A_F32", &table), "#ifdef DATA_A_F32");
		assert_eq!(substitute("#  ifndef X", &table), "#  ifndef X");
		assert_eq!(substitute("#undef X", &table), "#undef X");
		assert_eq!(
			substitute("#define LOAD_VEC_B LOAD_VEC_A", &table),
			"#define LOAD_VEC_B 4"
		);
		assert_eq!(
			substitute("#if defined(DATA_A_F32) && LOAD_VEC_A == 4", &table),
			"#if defined(DATA_A_F32) && 4 == 4"
		);
		assert_eq!(
			substitute("#elif defined X || X", &table),
			"#elif defined X || 1"
		);
	}

	#[test]
	fn directive_keyword_is_protected() {
		let table: MacroTable = [("version", "nope"), ("core", "450")].into_iter().collect();
		assert_eq!(substitute("#version 450 core", &table), "#version 450 450");
	}

	#[test]
	fn defined_outside_directive_is_ordinary() {
		let table: MacroTable = [("X", "1")].into_iter().collect();
		assert_eq!(substitute("bool defined = X;", &table), "bool defined = 1;");
	}

	#[test]
	fn preprocessed_text_is_unchanged() {
		let text = "#version 450\nlayout(local_size_x = 64) in;\nvoid main() {\n\tfloat a = 1.0;\n}\n";
		let result = Preprocessor::default().preprocess_str(
			"memory.comp",
			text,
			&macros(),
			&FileIncluder::default(),
		);
		assert_eq!(result.output.as_deref(), Some(text));
		assert!(result.diagnostics.is_empty());
		assert!(result.is_success());
		let again = Preprocessor::default().preprocess_str(
			"memory.comp",
			result.output.as_deref().unwrap(),
			&macros(),
			&FileIncluder::default(),
		);
		assert_eq!(again.output.as_deref(), Some(text));
	}

	#[test]
	fn line_endings_preserved() {
		let text = "ACC_TYPE a;\r\nACC_TYPE b;\n\nACC_TYPE c;";
		let result = Preprocessor::default().preprocess_str(
			"memory.comp",
			text,
			&macros(),
			&FileIncluder::default(),
		);
		assert_eq!(
			result.output.unwrap(),
			"float a;\r\nfloat b;\n\nfloat c;"
		);
	}

	#[test]
	fn standard_include() {
		assert_eq!(
			output_of("test_shaders/includer.glsl"),
			output_of("test_shaders/included.glsl")
		);
	}

	#[test]
	fn nested_include() {
		assert_eq!(
			output_of("test_shaders/nested_include.glsl"),
			output_of("test_shaders/includer.glsl")
		);
	}

	#[test]
	fn multiple_includes() {
		assert_eq!(
			output_of("test_shaders/multiple_includes.glsl"),
			format!(
				"{}{}",
				output_of("test_shaders/included.glsl"),
				output_of("test_shaders/included2.glsl")
			)
		);
	}

	#[test]
	fn include_without_trailing_newline() {
		assert_eq!(
			output_of("test_shaders/includes_unterminated.glsl"),
			"// before\nconst float unterminated = 1.0;\n// after\n"
		);
	}

	#[test]
	fn nested_include_resolves_relative_to_includer() {
		assert_eq!(
			output_of("test_shaders/nested_dir.glsl"),
			"// outer\n// inner\n"
		);
	}

	#[test]
	fn macros_substituted_in_included_files() {
		assert_eq!(
			output_of("test_shaders/macros.comp"),
			"#version 450\n#ifdef DATA_A_F32\nfloat sum_inc(float a) { return a + 4; }\n#endif\nfloat acc;\n"
		);
	}

	#[test]
	fn include_cycle() {
		let result = run_file("test_shaders/cycle_a.glsl", PreprocessOptions::default());
		assert_eq!(result.output, None);
		assert_eq!(result.diagnostics.len(), 1);
		let diagnostic = &result.diagnostics[0];
		assert_eq!(diagnostic.kind, DiagnosticKind::IncludeCycle);
		assert_eq!(diagnostic.severity, Severity::Error);
		assert_eq!(
			diagnostic.location.as_ref().unwrap().path,
			path::Path::new("test_shaders/cycle_b.glsl")
		);
		assert!(!result.is_success());
	}

	#[test]
	fn include_cycle_is_fatal_when_skipping() {
		let result = run_file("test_shaders/cycle_a.glsl", skipping());
		assert_eq!(result.output, None);
		assert_eq!(result.diagnostics[0].kind, DiagnosticKind::IncludeCycle);
	}

	#[test]
	fn self_include() {
		let result = run_file("test_shaders/self_include.glsl", skipping());
		assert_eq!(result.output, None);
		assert_eq!(result.diagnostics[0].kind, DiagnosticKind::IncludeCycle);
	}

	#[test]
	fn repeated_include_is_not_a_cycle() {
		let result = run_file("test_shaders/repeated_include.glsl", PreprocessOptions::default());
		let included = output_of("test_shaders/included.glsl");
		assert_eq!(result.output.unwrap(), format!("{included}{included}"));
		assert_eq!(
			result.files,
			[
				path::PathBuf::from("test_shaders/repeated_include.glsl"),
				path::PathBuf::from("test_shaders/included.glsl")
			]
		);
	}

	#[test]
	fn missing_include_is_fatal_by_default() {
		let result = run_file("test_shaders/missing_include.glsl", PreprocessOptions::default());
		assert_eq!(result.output, None);
		assert_eq!(result.diagnostics.len(), 1);
		let diagnostic = &result.diagnostics[0];
		assert_eq!(diagnostic.kind, DiagnosticKind::FileNotFound);
		assert!(diagnostic.is_error());
		assert_eq!(diagnostic.location.as_ref().unwrap().line, 2);
		assert_eq!(
			result.into_result().unwrap_err()[0].kind,
			DiagnosticKind::FileNotFound
		);
	}

	#[test]
	fn missing_include_skipped() {
		let result = run_file("test_shaders/missing_include.glsl", skipping());
		assert_eq!(
			result.output.as_deref(),
			Some("// before\n\n// after\n")
		);
		assert_eq!(result.diagnostics.len(), 1);
		assert_eq!(result.diagnostics[0].kind, DiagnosticKind::FileNotFound);
		assert_eq!(result.diagnostics[0].severity, Severity::Warning);
		assert!(result.is_success());
	}

	#[test]
	fn malformed_include_skipped() {
		let result = Preprocessor::new(skipping()).preprocess_str(
			"memory.comp",
			"#include included.glsl\nX\n",
			&macros(),
			&FileIncluder::default(),
		);
		assert_eq!(result.output.as_deref(), Some("\n1\n"));
		assert_eq!(result.diagnostics[0].kind, DiagnosticKind::MalformedInclude);
	}

	#[test]
	fn search_path_used_for_angled_include() {
		let includer = FileIncluder::new(
			["test_shaders/search_first", "test_shaders/search_second"]
				.into_iter()
				.collect::<SearchPath>(),
		);
		let result = Preprocessor::default().preprocess_str(
			"test_shaders/memory.comp",
			"#include <foo.glsl>\n#include \"only_second.glsl\"\n",
			&MacroTable::new(),
			&includer,
		);
		assert_eq!(
			result.output.unwrap(),
			"// foo from the first search directory\n// only in the second search directory\n"
		);
	}

	#[test]
	fn line_markers() {
		let result = run_file(
			"test_shaders/marked.glsl",
			PreprocessOptions {
				line_markers: true,
				..Default::default()
			},
		);
		assert_eq!(result.includes().len(), 2);
		assert_eq!(
			result.output.as_deref(),
			Some("// first\n#line 1 1\n// outer\n#line 1 2\n// inner\n#line 3 0\n// last\n")
		);
	}

	#[test]
	fn line_markers_for_include_on_last_line() {
		let result = Preprocessor::new(PreprocessOptions {
			line_markers: true,
			..Default::default()
		})
		.preprocess_str(
			"test_shaders/memory.glsl",
			"// top\n#include \"included.glsl\"",
			&MacroTable::new(),
			&FileIncluder::default(),
		);
		assert_eq!(
			result.output.as_deref(),
			Some("// top\n#line 1 1\nfloat included() {\n\treturn 1.0;\n}\n")
		);
	}

	/// Serves includes from memory and never looks at the include chain.
	struct MemoryIncluder(HashMap<&'static str, &'static str>);

	impl IncludeResolver for MemoryIncluder {
		fn resolve(
			&self,
			request: &IncludeRequest,
			_from_file: &path::Path,
			_chain: &[path::PathBuf],
		) -> Result<SourceUnit, IncludeError> {
			self.0
				.get(request.path.as_str())
				.map(|contents| SourceUnit::new(&request.path, *contents))
				.ok_or_else(|| IncludeError::FileNotFound {
					request: request.clone(),
				})
		}
	}

	#[test]
	fn cycle_through_chain_blind_resolver() {
		let resolver = MemoryIncluder(HashMap::from([
			("memory/a.glsl", "// a\n#include \"memory/b.glsl\"\n"),
			("memory/b.glsl", "// b\n#include \"memory/a.glsl\"\n"),
		]));
		let result = Preprocessor::new(skipping()).preprocess_str(
			"memory/a.glsl",
			"// a\n#include \"memory/b.glsl\"\n",
			&MacroTable::new(),
			&resolver,
		);
		assert_eq!(result.output, None);
		assert_eq!(result.diagnostics.len(), 1);
		let diagnostic = &result.diagnostics[0];
		assert_eq!(diagnostic.kind, DiagnosticKind::IncludeCycle);
		assert!(diagnostic.is_error());
		assert_eq!(
			diagnostic.location.as_ref().unwrap().path,
			path::Path::new("memory/b.glsl")
		);
		assert_eq!(
			diagnostic.message,
			"include cycle: memory/a.glsl -> memory/b.glsl -> memory/a.glsl"
		);
	}

	#[test]
	fn memory_resolver_splices() {
		let resolver = MemoryIncluder(HashMap::from([("memory/common.glsl", "ACC_TYPE x;\n")]));
		let result = Preprocessor::default().preprocess_str(
			"memory/main.comp",
			"#include <memory/common.glsl>\nvoid main() {}\n",
			&macros(),
			&resolver,
		);
		assert_eq!(result.output.as_deref(), Some("float x;\nvoid main() {}\n"));
	}

	#[test]
	fn unreadable_include_is_fatal_by_default() {
		let result = run_file("test_shaders/unreadable_include.glsl", PreprocessOptions::default());
		assert_eq!(result.output, None);
		assert_eq!(result.diagnostics.len(), 1);
		let diagnostic = &result.diagnostics[0];
		assert_eq!(diagnostic.kind, DiagnosticKind::UnreadableFile);
		assert!(diagnostic.is_error());
		assert_eq!(diagnostic.location.as_ref().unwrap().line, 2);
	}

	#[test]
	fn unreadable_include_skipped() {
		let result = run_file("test_shaders/unreadable_include.glsl", skipping());
		assert_eq!(result.output.as_deref(), Some("// before\n\n// after\n"));
		assert_eq!(result.diagnostics.len(), 1);
		assert_eq!(result.diagnostics[0].kind, DiagnosticKind::UnreadableFile);
		assert_eq!(result.diagnostics[0].severity, Severity::Warning);
		assert!(result.is_success());
	}

	#[test]
	fn independent_runs_in_parallel() {
		let table = macros();
		let includer = FileIncluder::default();
		let preprocessor = Preprocessor::default();
		let expected = output_of("test_shaders/macros.comp");
		std::thread::scope(|scope| {
			let handles = (0..4)
				.map(|_| {
					scope.spawn(|| {
						let unit = SourceUnit::read("test_shaders/macros.comp").unwrap();
						preprocessor.preprocess(&unit, &table, &includer).output
					})
				})
				.collect::<Vec<_>>();
			for handle in handles {
				assert_eq!(handle.join().unwrap().as_deref(), Some(expected.as_str()));
			}
		});
	}
}
