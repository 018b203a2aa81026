use clap::Parser;
use glsl_preprocessor::{Config, Diagnostic, IncludePolicy, MacroTable, SearchPath, ShaderBuilder, ShaderKind};
use std::{path, process};

/// Preprocess a GLSL shader and check that naga can parse the result.
#[derive(Parser, Debug)]
#[command(name = "glsl_preprocessor", version)]
struct Cli {
	/// Shader to preprocess
	input: path::PathBuf,

	/// Macro definition, NAME or NAME=VALUE
	#[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]", action = clap::ArgAction::Append)]
	defines: Vec<String>,

	/// Directory searched for included files, in the order given
	#[arg(short = 'I', long = "include-path", value_name = "DIR", action = clap::ArgAction::Append)]
	include_paths: Vec<path::PathBuf>,

	/// Shader stage (vert, frag or comp); inferred from the extension by default
	#[arg(long)]
	stage: Option<ShaderKind>,

	/// Warn about unresolvable includes and continue instead of failing
	#[arg(long)]
	skip_missing_includes: bool,

	/// Surround spliced includes with #line directives
	#[arg(long)]
	line_markers: bool,

	/// Preprocess only, do not parse
	#[arg(short = 'E')]
	preprocess_only: bool,

	/// Write the preprocessed source to FILE instead of stdout
	#[arg(short, long, value_name = "FILE")]
	output: Option<path::PathBuf>,

	/// Print the files that went into the output to stderr
	#[arg(long)]
	list_includes: bool,

	/// Enable debug logging
	#[arg(short, long)]
	verbose: bool,
}

impl Cli {
	fn config(&self) -> Config {
		let mut macros = MacroTable::new();
		for definition in &self.defines {
			macros.parse_definition(definition);
		}
		let mut config = Config {
			macros,
			search_path: self.include_paths.iter().cloned().collect::<SearchPath>(),
			stage: self.stage,
			..Default::default()
		};
		config.options.line_markers = self.line_markers;
		if self.skip_missing_includes {
			config.options.include_failures = IncludePolicy::Skip;
		}
		config
	}
}

fn main() {
	let cli = Cli::parse();
	let default_filter = if cli.verbose { "debug" } else { "warn" };
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
	if !run(&cli) {
		process::exit(1);
	}
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
	for diagnostic in diagnostics {
		eprintln!("{diagnostic}");
	}
}

fn run(cli: &Cli) -> bool {
	let builder = match ShaderBuilder::new(&cli.input, &cli.config()) {
		Ok(builder) => builder,
		Err(error) => {
			print_diagnostics(error.diagnostics());
			eprintln!("error: {error}");
			return false;
		}
	};
	print_diagnostics(&builder.diagnostics);
	if cli.list_includes {
		for file in &builder.files {
			eprintln!("{}", file.display());
		}
	}

	match &cli.output {
		Some(output) => {
			if let Err(error) = ex::fs::write(output, &builder.source_string) {
				eprintln!("error: {error}");
				return false;
			}
		}
		None => print!("{}", builder.source_string),
	}

	if cli.preprocess_only {
		return true;
	}
	match builder.parse() {
		Ok(module) => {
			log::info!(
				"parsed {} as a {} shader with {} entry point(s)",
				cli.input.display(),
				builder.stage(),
				module.entry_points.len()
			);
			true
		}
		Err(error) => {
			print_diagnostics(error.diagnostics());
			eprintln!("error: {error}");
			false
		}
	}
}
