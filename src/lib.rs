use std::{borrow, fmt, path, str};

pub mod diagnostic;
pub mod include;
pub mod macros;
pub mod preprocess;

pub use diagnostic::{Diagnostic, DiagnosticKind, Location, Severity};
pub use include::{
	FileIncluder, IncludeError, IncludeRequest, IncludeResolver, IncludeStyle, SearchPath,
	SourceUnit,
};
pub use macros::{GlslLiteral, MacroTable};
pub use preprocess::{IncludePolicy, PreprocessOptions, Preprocessed, Preprocessor};

/// Pipeline stage a shader is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderKind {
	Vertex,
	Fragment,
	Compute,
}

impl ShaderKind {
	/// Infers the stage from the conventional `.vert`, `.frag` and `.comp` extensions.
	pub fn from_path(path: impl AsRef<path::Path>) -> Option<Self> {
		match path.as_ref().extension()?.to_str()? {
			"vert" => Some(ShaderKind::Vertex),
			"frag" => Some(ShaderKind::Fragment),
			"comp" => Some(ShaderKind::Compute),
			_ => None,
		}
	}
}

impl str::FromStr for ShaderKind {
	type Err = String;

	fn from_str(name: &str) -> Result<Self, Self::Err> {
		match name {
			"vert" | "vertex" => Ok(ShaderKind::Vertex),
			"frag" | "fragment" => Ok(ShaderKind::Fragment),
			"comp" | "compute" => Ok(ShaderKind::Compute),
			_ => Err(format!("unknown shader stage `{name}`")),
		}
	}
}

impl From<ShaderKind> for naga::ShaderStage {
	fn from(kind: ShaderKind) -> Self {
		match kind {
			ShaderKind::Vertex => naga::ShaderStage::Vertex,
			ShaderKind::Fragment => naga::ShaderStage::Fragment,
			ShaderKind::Compute => naga::ShaderStage::Compute,
		}
	}
}

impl fmt::Display for ShaderKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ShaderKind::Vertex => f.write_str("vertex"),
			ShaderKind::Fragment => f.write_str("fragment"),
			ShaderKind::Compute => f.write_str("compute"),
		}
	}
}

/// Everything a [`ShaderBuilder`] needs besides the shader itself.
#[derive(Debug, Clone, Default)]
pub struct Config {
	pub macros: MacroTable,
	pub search_path: SearchPath,
	pub options: PreprocessOptions,
	/// Overrides the stage inferred from the file extension.
	pub stage: Option<ShaderKind>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] ex::io::Error),
	#[error("cannot tell the shader stage of {}; name it .vert, .frag or .comp or set one", .0.display())]
	UnknownStage(path::PathBuf),
	#[error("preprocessing {} failed", .path.display())]
	Preprocess {
		path: path::PathBuf,
		diagnostics: Vec<Diagnostic>,
	},
	#[error("parsing {} failed", .path.display())]
	Parse {
		path: path::PathBuf,
		diagnostics: Vec<Diagnostic>,
	},
}

impl Error {
	/// Diagnostics collected before the failure, if any.
	pub fn diagnostics(&self) -> &[Diagnostic] {
		match self {
			Error::Preprocess { diagnostics, .. } | Error::Parse { diagnostics, .. } => diagnostics,
			Error::Io(_) | Error::UnknownStage(_) => &[],
		}
	}
}

/// Preprocesses GLSL code and hands it to [`wgpu`] or to the [`naga`] GLSL front end.
pub struct ShaderBuilder {
	/// String with the preprocessed GLSL source.
	pub source_string: String,
	/// Warnings left over from preprocessing.
	pub diagnostics: Vec<Diagnostic>,
	/// Every file that went into `source_string`, the root module first.
	pub files: Vec<path::PathBuf>,
	source_path: path::PathBuf,
	stage: ShaderKind,
	defines: MacroTable,
}

impl ShaderBuilder {
	/// Creates a new [`ShaderBuilder`].
	///
	/// # Arguments
	/// - `source_path` - Path to the root GLSL module.
	/// 	Quoted includes are looked up next to the including file, then on `config.search_path`.
	/// - `config` - Macros, search path and preprocessing options.
	pub fn new(source_path: impl AsRef<path::Path>, config: &Config) -> Result<Self, Error> {
		let source_path = source_path.as_ref();
		let stage = config
			.stage
			.or_else(|| ShaderKind::from_path(source_path))
			.ok_or_else(|| Error::UnknownStage(source_path.to_path_buf()))?;
		let unit = SourceUnit::read(source_path)?;
		let includer = FileIncluder::new(config.search_path.clone());
		let preprocessed =
			Preprocessor::new(config.options.clone()).preprocess(&unit, &config.macros, &includer);
		let files = preprocessed.files.clone();
		let diagnostics = preprocessed.diagnostics.clone();
		let source_string = preprocessed
			.into_result()
			.map_err(|diagnostics| Error::Preprocess {
				path: source_path.to_path_buf(),
				diagnostics,
			})?;
		Ok(Self {
			source_string,
			diagnostics,
			files,
			source_path: source_path.to_path_buf(),
			stage,
			defines: config.macros.clone(),
		})
	}

	pub fn stage(&self) -> ShaderKind {
		self.stage
	}

	/// Builds a [`wgpu::ShaderModuleDescriptor`] from the shader.
	/// The `label` member of the built [`wgpu::ShaderModuleDescriptor`] is the name of the shader file without the postfix.
	pub fn build(&self) -> wgpu::ShaderModuleDescriptor<'_> {
		wgpu::ShaderModuleDescriptor {
			label: self.source_path.file_stem().and_then(|stem| stem.to_str()),
			source: wgpu::ShaderSource::Glsl {
				shader: borrow::Cow::Borrowed(&self.source_string),
				stage: self.stage.into(),
				defines: self.naga_defines(),
			},
		}
	}

	/// Parses the preprocessed source with naga's GLSL front end.
	///
	/// The macro table is passed along as defines, so conditional blocks that test a
	/// macro name still see it.
	pub fn parse(&self) -> Result<naga::Module, Error> {
		let options = naga::front::glsl::Options {
			stage: self.stage.into(),
			defines: self.naga_defines(),
		};
		naga::front::glsl::Frontend::default()
			.parse(&options, &self.source_string)
			.map_err(|error| Error::Parse {
				path: self.source_path.clone(),
				diagnostics: error
					.errors
					.iter()
					.map(|error| {
						let location = error.meta.location(&self.source_string);
						Diagnostic::error(DiagnosticKind::Parse, error.kind.to_string())
							.at(&self.source_path, location.line_number as usize)
					})
					.collect(),
			})
	}

	fn naga_defines(&self) -> naga::FastHashMap<String, String> {
		self.defines
			.iter()
			.map(|(name, value)| (name.to_string(), value.to_string()))
			.collect()
	}
}
