//! Type-to-type value converters and implicit scalar coercions.

use std::{
	any::{Any, TypeId},
	fmt,
	sync::{Arc, OnceLock},
};

use num_traits::AsPrimitive;
use remap_util::{debug::type_id::NamedTypeId, mem::hash::FxHashMap};

use crate::{
	error::MapError,
	reflect::{DynValue, Reflect, TypeInfo, TypeKind, TypePair},
};

// === ValueConverter === //

type ConvertFn = dyn Fn(&dyn Any) -> Result<DynValue, MapError> + Send + Sync;

/// A pure function from a declared source type to a declared target type.
#[derive(Clone)]
pub struct ValueConverter {
	from: TypeInfo,
	to: TypeInfo,
	func: Arc<ConvertFn>,
}

impl fmt::Debug for ValueConverter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ValueConverter<{} -> {}>", self.from, self.to)
	}
}

impl ValueConverter {
	pub fn new<S, T>(f: impl 'static + Send + Sync + Fn(&S) -> T) -> Self
	where
		S: Reflect,
		T: Reflect,
	{
		Self::fallible(move |value: &S| Ok(f(value)))
	}

	pub fn fallible<S, T>(f: impl 'static + Send + Sync + Fn(&S) -> anyhow::Result<T>) -> Self
	where
		S: Reflect,
		T: Reflect,
	{
		Self {
			from: TypeInfo::of::<S>(),
			to: TypeInfo::of::<T>(),
			func: Arc::new(move |value: &dyn Any| -> Result<DynValue, MapError> {
				let value = value
					.downcast_ref::<S>()
					.ok_or_else(|| MapError::mismatch::<S>("running a converter"))?;

				match f(value) {
					Ok(value) => Ok(Box::new(value) as DynValue),
					Err(err) => Err(MapError::User(err)),
				}
			}),
		}
	}

	pub fn from_type(&self) -> TypeInfo {
		self.from
	}

	pub fn to_type(&self) -> TypeInfo {
		self.to
	}

	pub fn pair(&self) -> TypePair {
		TypePair::new(self.from, self.to)
	}

	pub fn convert(&self, value: &dyn Any) -> Result<DynValue, MapError> {
		(self.func)(value)
	}
}

/// Converters keyed by their declared (source, target) pair. Registering a second converter for
/// a pair replaces the first.
#[derive(Debug, Clone, Default)]
pub struct ConverterRegistry {
	converters: FxHashMap<(NamedTypeId, NamedTypeId), ValueConverter>,
}

impl ConverterRegistry {
	pub fn insert(&mut self, converter: ValueConverter) -> Option<ValueConverter> {
		self.converters
			.insert((converter.from.id(), converter.to.id()), converter)
	}

	pub fn remove(&mut self, from: TypeInfo, to: TypeInfo) -> Option<ValueConverter> {
		self.converters.remove(&(from.id(), to.id()))
	}

	pub fn get(&self, from: TypeInfo, to: TypeInfo) -> Option<&ValueConverter> {
		self.converters.get(&(from.id(), to.id()))
	}

	pub fn len(&self) -> usize {
		self.converters.len()
	}

	pub fn is_empty(&self) -> bool {
		self.converters.is_empty()
	}
}

// === ScalarCoercion === //

/// An implicit conversion rule between scalar types.
pub trait ScalarCoercion: Send + Sync {
	fn can_coerce(&self, from: TypeInfo, to: TypeInfo) -> bool;

	/// Converts `value` (of type `from`) into `to`. Returns `None` if `value` is not a `from` or if
	/// this coercion does not handle the pair.
	fn coerce(&self, value: &dyn Any, from: TypeInfo, to: TypeInfo) -> Option<DynValue>;
}

/// Lossless numeric widening (`u8 -> u32`, `i32 -> i64`, `f32 -> f64`, `u16 -> f32`, ...).
#[derive(Debug, Copy, Clone, Default)]
pub struct PrimitiveWidening;

type CoerceFn = fn(&dyn Any) -> Option<DynValue>;

fn widen<F, T>(value: &dyn Any) -> Option<DynValue>
where
	F: AsPrimitive<T>,
	T: 'static + Copy + Send + Sync,
{
	value
		.downcast_ref::<F>()
		.map(|value| Box::new(value.as_()) as DynValue)
}

macro_rules! widening_rules {
	($table:ident, $from:ty => $($to:ty),+ $(,)?) => {$(
		$table.insert(
			(TypeId::of::<$from>(), TypeId::of::<$to>()),
			widen::<$from, $to> as CoerceFn,
		);
	)+};
}

impl PrimitiveWidening {
	fn table() -> &'static FxHashMap<(TypeId, TypeId), CoerceFn> {
		static TABLE: OnceLock<FxHashMap<(TypeId, TypeId), CoerceFn>> = OnceLock::new();

		TABLE.get_or_init(|| {
			let mut table = FxHashMap::default();
			widening_rules!(table, i8 => i16, i32, i64, i128, isize, f32, f64);
			widening_rules!(
				table,
				u8 => u16, u32, u64, u128, usize, i16, i32, i64, i128, isize, f32, f64
			);
			widening_rules!(table, i16 => i32, i64, i128, isize, f32, f64);
			widening_rules!(table, u16 => u32, u64, u128, usize, i32, i64, i128, f32, f64);
			widening_rules!(table, i32 => i64, i128, f64);
			widening_rules!(table, u32 => u64, u128, i64, i128, f64);
			widening_rules!(table, i64 => i128);
			widening_rules!(table, u64 => u128, i128);
			widening_rules!(table, f32 => f64);
			table
		})
	}
}

impl ScalarCoercion for PrimitiveWidening {
	fn can_coerce(&self, from: TypeInfo, to: TypeInfo) -> bool {
		Self::table().contains_key(&(from.id().raw(), to.id().raw()))
	}

	fn coerce(&self, value: &dyn Any, from: TypeInfo, to: TypeInfo) -> Option<DynValue> {
		let coerce = Self::table().get(&(from.id().raw(), to.id().raw()))?;
		coerce(value)
	}
}

// === Assignability === //

/// Whether a value of type `from` can be stored into a slot of type `to` without a registered
/// converter or structural mapping: identical types, scalar coercions and the wrapper/sequence
/// forms built from them.
pub fn is_assignable(coercions: &[Arc<dyn ScalarCoercion>], from: TypeInfo, to: TypeInfo) -> bool {
	convertible(coercions, None, from, to)
}

/// Like [is_assignable] but also accepts registered converters at any wrapper or sequence level.
/// Nested shapes never qualify.
pub fn is_convertible(
	coercions: &[Arc<dyn ScalarCoercion>],
	converters: &ConverterRegistry,
	from: TypeInfo,
	to: TypeInfo,
) -> bool {
	convertible(coercions, Some(converters), from, to)
}

fn convertible(
	coercions: &[Arc<dyn ScalarCoercion>],
	converters: Option<&ConverterRegistry>,
	from: TypeInfo,
	to: TypeInfo,
) -> bool {
	if from == to
		|| coercions.iter().any(|c| c.can_coerce(from, to))
		|| converters.is_some_and(|r| r.get(from, to).is_some())
	{
		return true;
	}

	let recurse = |from: TypeInfo, to: TypeInfo| convertible(coercions, converters, from, to);

	match (from.kind(), to.kind()) {
		(TypeKind::Nullable(f), TypeKind::Nullable(t))
		| (TypeKind::Boxed(f), TypeKind::Boxed(t))
		| (TypeKind::Boxed(f), TypeKind::Nullable(t)) => recurse(f.inner(), t.inner()),
		(TypeKind::Nullable(_), TypeKind::Boxed(_)) => false,
		(_, TypeKind::Nullable(t)) | (_, TypeKind::Boxed(t)) => recurse(from, t.inner()),
		(TypeKind::Boxed(f), _) => recurse(f.inner(), to),
		(TypeKind::Sequence(f), TypeKind::Sequence(t)) => recurse(f.element(), t.element()),
		_ => false,
	}
}
