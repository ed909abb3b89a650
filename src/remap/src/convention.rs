//! Conventions decide which source member feeds which target member.
//!
//! Each convention is a pure function over a [ConventionContext]. Conventions run in registration
//! order and may freely overwrite the correspondences written by the ones before them.

use std::{any::Any, fmt, sync::Arc};

use log::trace;
use smallvec::SmallVec;

use remap_util::mem::hash::FxHashMap;

use crate::{
	config::MatchOptions,
	convert::{is_assignable, is_convertible, ConverterRegistry, ScalarCoercion, ValueConverter},
	error::{ConfigError, MapError},
	member::{Member, MemberKey, MemberSet},
	reflect::{DynValue, TypeInfo, TypePair},
};

// === Convention === //

pub trait Convention: Send + Sync + 'static {
	fn apply(&self, cx: &mut ConventionContext<'_>);
}

impl<F> Convention for F
where
	F: 'static + Send + Sync + Fn(&mut ConventionContext<'_>),
{
	fn apply(&self, cx: &mut ConventionContext<'_>) {
		self(cx)
	}
}

// === Correspondences === //

pub(crate) type SourceFn = dyn Fn(&dyn Any) -> Result<DynValue, MapError> + Send + Sync;

/// Where the value of a target member comes from.
#[derive(Clone)]
pub enum Origin {
	/// A member of the source.
	Member(Member),

	/// A function of the whole source producing a value of type `output`.
	Function { output: TypeInfo, func: Arc<SourceFn> },

	/// The whole source value, typically handed to an attached converter.
	WholeSource,
}

impl fmt::Debug for Origin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Member(member) => f.debug_tuple("Member").field(&member.name()).finish(),
			Self::Function { output, .. } => f.debug_tuple("Function").field(output).finish(),
			Self::WholeSource => f.write_str("WholeSource"),
		}
	}
}

impl Origin {
	/// The type of the value this origin produces when reading from a `source`.
	pub fn value_type(&self, source: TypeInfo) -> TypeInfo {
		match self {
			Self::Member(member) => member.value_type(),
			Self::Function { output, .. } => *output,
			Self::WholeSource => source,
		}
	}
}

#[derive(Debug, Clone)]
pub struct Correspondence {
	pub target: Member,
	pub origin: Origin,

	/// An explicitly attached converter. When present, it is used instead of every other way of
	/// converting the origin's value.
	pub converter: Option<ValueConverter>,
}

/// An ordered set of correspondences holding at most one entry per target member.
#[derive(Debug, Clone, Default)]
pub struct Correspondences {
	entries: Vec<Correspondence>,
	index: FxHashMap<MemberKey, usize>,
}

impl Correspondences {
	/// Inserts a correspondence. An existing entry for the same target member is replaced in place,
	/// keeping its position.
	pub fn insert(&mut self, entry: Correspondence) -> Option<Correspondence> {
		let key = entry.target.key();

		if let Some(&at) = self.index.get(&key) {
			return Some(std::mem::replace(&mut self.entries[at], entry));
		}

		self.index.insert(key, self.entries.len());
		self.entries.push(entry);
		None
	}

	pub fn remove(&mut self, key: &MemberKey) -> Option<Correspondence> {
		let at = self.index.remove(key)?;
		let removed = self.entries.remove(at);

		for slot in self.index.values_mut() {
			if *slot > at {
				*slot -= 1;
			}
		}

		Some(removed)
	}

	pub fn get(&self, key: &MemberKey) -> Option<&Correspondence> {
		self.index.get(key).map(|&at| &self.entries[at])
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Correspondence> {
		self.entries.iter()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

impl IntoIterator for Correspondences {
	type Item = Correspondence;
	type IntoIter = std::vec::IntoIter<Correspondence>;

	fn into_iter(self) -> Self::IntoIter {
		self.entries.into_iter()
	}
}

// === ConventionContext === //

pub struct ConventionContext<'a> {
	pair: TypePair,
	source: Arc<MemberSet>,
	target: Arc<MemberSet>,
	options: MatchOptions,
	coercions: &'a [Arc<dyn ScalarCoercion>],
	converters: &'a ConverterRegistry,
	correspondences: &'a mut Correspondences,
}

impl<'a> ConventionContext<'a> {
	pub(crate) fn new(
		pair: TypePair,
		source: Arc<MemberSet>,
		target: Arc<MemberSet>,
		options: MatchOptions,
		coercions: &'a [Arc<dyn ScalarCoercion>],
		converters: &'a ConverterRegistry,
		correspondences: &'a mut Correspondences,
	) -> Self {
		Self {
			pair,
			source,
			target,
			options,
			coercions,
			converters,
			correspondences,
		}
	}

	pub fn pair(&self) -> TypePair {
		self.pair
	}

	pub fn source(&self) -> &Arc<MemberSet> {
		&self.source
	}

	pub fn target(&self) -> &Arc<MemberSet> {
		&self.target
	}

	pub fn options(&self) -> MatchOptions {
		self.options
	}

	pub fn is_assignable(&self, from: TypeInfo, to: TypeInfo) -> bool {
		is_assignable(self.coercions, from, to)
	}

	pub fn converter(&self, from: TypeInfo, to: TypeInfo) -> Option<&ValueConverter> {
		self.converters.get(from, to)
	}

	/// Whether plan compilation can turn a `from` into a `to` without structural mapping, using
	/// scalar coercions and registered converters, also inside wrappers and sequences.
	pub fn can_convert(&self, from: TypeInfo, to: TypeInfo) -> bool {
		is_convertible(self.coercions, self.converters, from, to)
	}

	/// Links `target` to `source` without any type checks. Conversion is resolved later, when the
	/// plan compiles; a pair which turns out to be unconvertible is then skipped.
	pub fn link(&mut self, target: &Member, source: &Member) {
		trace!(
			"{}: linking `{}` <- `{}`",
			self.pair,
			target.name(),
			source.name()
		);

		self.correspondences.insert(Correspondence {
			target: target.clone(),
			origin: Origin::Member(source.clone()),
			converter: None,
		});
	}

	/// Links `target` to an arbitrary origin, checking that an attached converter really converts
	/// the origin's type into the target member's type.
	pub fn link_with(
		&mut self,
		target: &Member,
		origin: Origin,
		converter: Option<ValueConverter>,
	) -> Result<(), ConfigError> {
		check_converter(self.pair.source, target, &origin, converter.as_ref())?;

		self.correspondences.insert(Correspondence {
			target: target.clone(),
			origin,
			converter,
		});
		Ok(())
	}

	pub fn unlink(&mut self, target: &Member) -> Option<Correspondence> {
		self.correspondences.remove(&target.key())
	}

	pub fn correspondences(&self) -> &Correspondences {
		self.correspondences
	}
}

pub(crate) fn check_converter(
	source: TypeInfo,
	target: &Member,
	origin: &Origin,
	converter: Option<&ValueConverter>,
) -> Result<(), ConfigError> {
	let Some(converter) = converter else {
		return Ok(());
	};

	let expected = TypePair::new(origin.value_type(source), target.value_type());
	if converter.pair() != expected {
		return Err(ConfigError::ConverterMismatch {
			member: target.name(),
			converter: converter.pair(),
			expected,
		});
	}

	Ok(())
}

// === NameMatching === //

/// Links same-named members. Installed on every container by default.
///
/// Members are grouped by name (folding case when matching is case-insensitive). Each group is
/// walked from its end, i.e. from the most-derived members towards flattened base members. Without
/// hierarchy mode, a target member whose type cannot accept the current source member is skipped
/// and the source member stays available for the next target. In hierarchy mode, members are
/// paired positionally and type checking is left to plan compilation.
#[derive(Debug, Copy, Clone, Default)]
pub struct NameMatching;

type Group = SmallVec<[Member; 4]>;

fn group_by_name<'m>(
	members: impl IntoIterator<Item = &'m Member>,
	case_sensitive: bool,
) -> (Vec<(String, Group)>, FxHashMap<String, usize>) {
	let mut groups = Vec::<(String, Group)>::new();
	let mut index = FxHashMap::default();

	for member in members {
		let name = if case_sensitive {
			member.name().to_string()
		} else {
			member.name().to_lowercase()
		};

		let at = *index.entry(name.clone()).or_insert_with(|| {
			groups.push((name, Group::new()));
			groups.len() - 1
		});
		groups[at].1.push(member.clone());
	}

	(groups, index)
}

impl Convention for NameMatching {
	fn apply(&self, cx: &mut ConventionContext<'_>) {
		let options = cx.options();
		let source = cx.source().clone();
		let target = cx.target().clone();

		let (sources, source_index) = group_by_name(
			source
				.iter()
				.filter(|m| m.is_readable(options.include_non_public)),
			options.case_sensitive,
		);
		let (targets, _) = group_by_name(
			target
				.iter()
				.filter(|m| m.is_writable(options.include_non_public)),
			options.case_sensitive,
		);

		for (name, target_group) in &targets {
			let Some(&at) = source_index.get(name) else {
				trace!("{}: no source member for `{name}`", cx.pair());
				continue;
			};
			let source_group = &sources[at].1;

			if options.hierarchy {
				for (t, s) in target_group.iter().rev().zip(source_group.iter().rev()) {
					cx.link(t, s);
				}
				continue;
			}

			let mut remaining = source_group.len();
			for t in target_group.iter().rev() {
				let Some(s) = remaining.checked_sub(1).map(|i| &source_group[i]) else {
					break;
				};

				let (from, to) = (s.value_type(), t.value_type());
				if cx.can_convert(from, to) {
					cx.link(t, s);
					remaining -= 1;
				} else {
					trace!(
						"{}: `{}` cannot accept `{from}`, skipping it",
						cx.pair(),
						t.name(),
					);
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		convert::PrimitiveWidening,
		member::{members_of, Shape, ShapeBuilder},
		reflect::{Reflect, TypeKind},
	};

	#[derive(Debug, Clone, Default)]
	struct Source {
		name: String,
		age: u8,
		extra: bool,
	}

	crate::shape!(Source: Default { name, age, extra });

	#[derive(Debug, Clone, Default)]
	struct Target {
		name: String,
		age: i32,
		note: String,
	}

	crate::shape!(Target: Default { name, age, note });

	#[derive(Debug, Clone, Default)]
	struct Shouting {
		name: String,
		age: u8,
	}

	impl Reflect for Shouting {
		fn kind() -> TypeKind {
			TypeKind::shape::<Self>()
		}
	}

	impl Shape for Shouting {
		fn describe(shape: &mut ShapeBuilder<Self>) {
			shape.field("NAME", |s| &s.name, |s| &mut s.name);
			shape.field("Age", |s| &s.age, |s| &mut s.age);
		}
	}

	fn run<S: Shape, T: Shape>(
		options: MatchOptions,
		converters: &ConverterRegistry,
	) -> Correspondences {
		let coercions: Vec<Arc<dyn ScalarCoercion>> = vec![Arc::new(PrimitiveWidening)];
		let mut out = Correspondences::default();
		let mut cx = ConventionContext::new(
			TypePair::of::<S, T>(),
			members_of::<S>(),
			members_of::<T>(),
			options,
			&coercions,
			converters,
			&mut out,
		);
		NameMatching.apply(&mut cx);
		out
	}

	fn linked(out: &Correspondences) -> Vec<(&'static str, &'static str)> {
		out.iter()
			.map(|c| match &c.origin {
				Origin::Member(m) => (c.target.name(), m.name()),
				_ => (c.target.name(), "?"),
			})
			.collect()
	}

	#[test]
	fn links_assignable_same_names() {
		let out = run::<Source, Target>(MatchOptions::default(), &ConverterRegistry::default());
		assert_eq!(linked(&out), [("name", "name"), ("age", "age")]);
	}

	#[test]
	fn case_folding_is_optional() {
		let strict =
			run::<Shouting, Target>(MatchOptions::default(), &ConverterRegistry::default());
		assert!(strict.is_empty());

		let relaxed = run::<Shouting, Target>(
			MatchOptions {
				case_sensitive: false,
				..MatchOptions::default()
			},
			&ConverterRegistry::default(),
		);
		assert_eq!(linked(&relaxed), [("name", "NAME"), ("age", "Age")]);
	}

	#[test]
	fn registered_converters_make_members_linkable() {
		let mut converters = ConverterRegistry::default();
		converters.insert(ValueConverter::new(|v: &bool| v.to_string()));

		#[derive(Debug, Clone, Default)]
		struct WithExtra {
			extra: String,
		}
		crate::shape!(WithExtra: Default { extra });

		assert!(
			run::<Source, WithExtra>(MatchOptions::default(), &ConverterRegistry::default())
				.is_empty()
		);
		let out = run::<Source, WithExtra>(MatchOptions::default(), &converters);
		assert_eq!(linked(&out), [("extra", "extra")]);
	}

	#[test]
	fn replacing_keeps_position() {
		let mut out = run::<Source, Target>(MatchOptions::default(), &ConverterRegistry::default());
		let name = members_of::<Target>().get("name").unwrap().clone();

		let replaced = out.insert(Correspondence {
			target: name.clone(),
			origin: Origin::WholeSource,
			converter: None,
		});
		assert!(replaced.is_some());
		assert_eq!(out.len(), 2);
		assert!(matches!(out.iter().next().unwrap().origin, Origin::WholeSource));

		out.remove(&name.key());
		assert_eq!(linked(&out), [("age", "age")]);
		assert!(out.get(&members_of::<Target>().get("age").unwrap().key()).is_some());
	}

	#[test]
	fn link_with_checks_converter_types() {
		let mut out = Correspondences::default();
		let converters = ConverterRegistry::default();
		let mut cx = ConventionContext::new(
			TypePair::of::<Source, Target>(),
			members_of::<Source>(),
			members_of::<Target>(),
			MatchOptions::default(),
			&[],
			&converters,
			&mut out,
		);

		let target = cx.target().get("note").unwrap().clone();
		let source = cx.source().get("age").unwrap().clone();

		let err = cx
			.link_with(
				&target,
				Origin::Member(source.clone()),
				Some(ValueConverter::new(|v: &i32| v.to_string())),
			)
			.unwrap_err();
		assert!(matches!(err, ConfigError::ConverterMismatch { member: "note", .. }));

		cx.link_with(
			&target,
			Origin::Member(source),
			Some(ValueConverter::new(|v: &u8| format!("{v} years"))),
		)
		.unwrap();
		assert_eq!(cx.correspondences().len(), 1);
	}
}
