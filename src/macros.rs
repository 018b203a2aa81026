use std::collections::HashMap;
#[cfg(any(feature = "array_vectors", feature = "cgmath_vectors"))]
use std::any;

/// Type for values that can be written as a GLSL literal.
/// [`GlslLiteral`] is already implemented for the GLSL scalar types.
pub trait GlslLiteral {
	/// Returns the name of the type in GLSL syntax.
	fn type_name() -> String;

	/// Returns the value as a GLSL literal or constructor expression.
	fn literal(&self) -> String;
}

impl GlslLiteral for u32 {
	fn type_name() -> String {
		"uint".to_string()
	}

	fn literal(&self) -> String {
		format!("{self}u")
	}
}

#[duplicate::duplicate_item(literal_type glsl_name; [i32] ["int"]; [f32] ["float"])]
impl GlslLiteral for literal_type {
	fn type_name() -> String {
		glsl_name.to_string()
	}

	fn literal(&self) -> String {
		format!("{self:?}")
	}
}

impl GlslLiteral for f64 {
	fn type_name() -> String {
		"double".to_string()
	}

	fn literal(&self) -> String {
		format!("{self:?}lf")
	}
}

impl GlslLiteral for bool {
	fn type_name() -> String {
		"bool".to_string()
	}

	fn literal(&self) -> String {
		self.to_string()
	}
}

#[cfg(any(feature = "array_vectors", feature = "cgmath_vectors"))]
fn vector_prefix<T>() -> &'static str {
	match any::type_name::<T>() {
		"u32" => "u",
		"i32" => "i",
		_ => "",
	}
}

#[cfg(any(feature = "array_vectors", feature = "cgmath_vectors"))]
fn constructor<T: GlslLiteral>(type_name: String, components: &[T]) -> String {
	let arguments = components
		.iter()
		.map(GlslLiteral::literal)
		.collect::<Vec<_>>()
		.join(", ");
	format!("{type_name}({arguments})")
}

#[cfg(feature = "array_vectors")]
#[duplicate::duplicate_item(component; [u32]; [i32]; [f32])]
impl<const N: usize> GlslLiteral for [component; N] {
	fn type_name() -> String {
		format!("{}vec{N}", vector_prefix::<component>())
	}

	fn literal(&self) -> String {
		constructor(Self::type_name(), self)
	}
}

#[cfg(feature = "cgmath_vectors")]
#[duplicate::duplicate_item(
	vector_type component size;
	[cgmath::Vector2<u32>] [u32] [2]; [cgmath::Vector2<i32>] [i32] [2]; [cgmath::Vector2<f32>] [f32] [2];
	[cgmath::Vector3<u32>] [u32] [3]; [cgmath::Vector3<i32>] [i32] [3]; [cgmath::Vector3<f32>] [f32] [3];
	[cgmath::Vector4<u32>] [u32] [4]; [cgmath::Vector4<i32>] [i32] [4]; [cgmath::Vector4<f32>] [f32] [4]
)]
impl GlslLiteral for vector_type {
	fn type_name() -> String {
		format!("{}vec{}", vector_prefix::<component>(), size)
	}

	fn literal(&self) -> String {
		let components: &[component; size] = self.as_ref();
		constructor(Self::type_name(), components)
	}
}

/// Object-like macros that are substituted into shader source before parsing.
///
/// A name maps to exactly one value; defining a name again replaces the earlier value.
/// The table is only read while a preprocessing run is in progress, so one table can be
/// shared between runs on several threads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroTable {
	definitions: HashMap<String, String>,
}

impl MacroTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Performs the equivalent of `#define name value`.
	///
	/// # Arguments
	/// - `name` - Identifier that will be replaced in the code.
	/// - `value` - Replacement text, inserted verbatim.
	pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
		self.definitions.insert(name.into(), value.into());
		self
	}

	/// Defines `name` as the GLSL literal for `value`.
	pub fn define_value(&mut self, name: impl Into<String>, value: impl GlslLiteral) -> &mut Self {
		self.define(name, value.literal())
	}

	/// Calls [`MacroTable::define_value`] for every (key, value) pair in a given [`HashMap`].
	pub fn define_map(&mut self, values: &HashMap<&str, impl GlslLiteral>) -> &mut Self {
		values.iter().for_each(|(name, value)| {
			self.define(*name, value.literal());
		});
		self
	}

	/// Defines a macro from its command-line form, `NAME` or `NAME=VALUE`.
	/// A bare `NAME` is defined with an empty value.
	pub fn parse_definition(&mut self, definition: &str) -> &mut Self {
		match definition.split_once('=') {
			Some((name, value)) => self.define(name.trim(), value),
			None => self.define(definition.trim(), ""),
		}
	}

	pub fn resolve(&self, name: &str) -> Option<&str> {
		self.definitions.get(name).map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.definitions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.definitions.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.definitions
			.iter()
			.map(|(name, value)| (name.as_str(), value.as_str()))
	}
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for MacroTable {
	fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
		let mut table = Self::new();
		for (name, value) in iter {
			table.define(name, value);
		}
		table
	}
}
