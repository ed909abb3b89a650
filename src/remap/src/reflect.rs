//! Runtime type descriptors for every value the mapper can move around.
//!
//! A [TypeInfo] is a small `Copy` table of function pointers which lets the rest of the crate
//! clone, construct, assign and structurally inspect values it only sees as `dyn Any`. Everything
//! is derived from the [Reflect] trait, which is implemented for primitives, `String`,
//! `Option<T>`, `Box<T>` and `Vec<T>` here and for user types through
//! [Shape](crate::member::Shape).

use std::{any::Any, fmt, hash, sync::Arc};

use remap_util::{debug::type_id::NamedTypeId, lang::any::AnyLike};

use crate::member::{members_of, MemberSet, Shape};

/// A type-erased owned value.
pub type DynValue = Box<dyn Any + Send + Sync>;

// === Reflect === //

/// A type which can appear on either side of a mapping or as the type of a member.
pub trait Reflect: Clone + Send + Sync + 'static {
	fn kind() -> TypeKind {
		TypeKind::Scalar
	}

	/// Produces a fresh default instance or `None` if the type has no parameterless constructor.
	///
	/// This is consulted once while compiling a plan to decide whether the default creation
	/// strategy is usable, so it must be cheap and free of side effects.
	fn instantiate() -> Option<Self> {
		None
	}
}

macro_rules! impl_scalar {
	($($ty:ty),*$(,)?) => {$(
		impl Reflect for $ty {
			fn instantiate() -> Option<Self> {
				Some(<$ty>::default())
			}
		}
	)*};
}

impl_scalar!(
	bool, char, String,
	u8, u16, u32, u64, u128, usize,
	i8, i16, i32, i64, i128, isize,
	f32, f64,
);

impl<T: Reflect> Reflect for Option<T> {
	fn kind() -> TypeKind {
		TypeKind::Nullable(WrapperOps::nullable::<T>())
	}

	fn instantiate() -> Option<Self> {
		Some(None)
	}
}

impl<T: Reflect> Reflect for Box<T> {
	fn kind() -> TypeKind {
		TypeKind::Boxed(WrapperOps::boxed::<T>())
	}

	fn instantiate() -> Option<Self> {
		T::instantiate().map(Box::new)
	}
}

impl<T: Reflect> Reflect for Vec<T> {
	fn kind() -> TypeKind {
		TypeKind::Sequence(SequenceOps::vec::<T>())
	}

	fn instantiate() -> Option<Self> {
		Some(Vec::new())
	}
}

// === TypeKind === //

/// The structural category of a type.
#[derive(Copy, Clone)]
pub enum TypeKind {
	/// A leaf value which is only ever copied, coerced or converted as a whole.
	Scalar,

	/// A type with named members.
	Shape(fn() -> Arc<MemberSet>),

	/// A reference-shaped value which may be null (`Option<T>`).
	Nullable(WrapperOps),

	/// A reference-shaped value which is never null (`Box<T>`).
	Boxed(WrapperOps),

	/// An ordered collection (`Vec<T>`).
	Sequence(SequenceOps),
}

impl TypeKind {
	pub fn shape<S: Shape>() -> Self {
		Self::Shape(members_of::<S>)
	}
}

impl fmt::Debug for TypeKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Scalar => f.write_str("Scalar"),
			Self::Shape(_) => f.write_str("Shape"),
			Self::Nullable(ops) => f.debug_tuple("Nullable").field(&ops.inner).finish(),
			Self::Boxed(ops) => f.debug_tuple("Boxed").field(&ops.inner).finish(),
			Self::Sequence(ops) => f.debug_tuple("Sequence").field(&ops.element).finish(),
		}
	}
}

/// Erased operations over a single-element wrapper such as `Option<T>` or `Box<T>`.
#[derive(Copy, Clone)]
pub struct WrapperOps {
	pub(crate) inner: TypeInfo,
	pub(crate) get: fn(&dyn Any) -> Option<&dyn Any>,
	pub(crate) get_mut: fn(&mut dyn Any) -> Option<&mut dyn Any>,
	pub(crate) wrap: fn(DynValue) -> Result<DynValue, DynValue>,
	pub(crate) empty: Option<fn() -> DynValue>,
}

impl WrapperOps {
	pub fn nullable<T: Reflect>() -> Self {
		fn get<T: Reflect>(v: &dyn Any) -> Option<&dyn Any> {
			v.downcast_ref::<Option<T>>()?
				.as_ref()
				.map(|v| v as &dyn Any)
		}

		fn get_mut<T: Reflect>(v: &mut dyn Any) -> Option<&mut dyn Any> {
			v.downcast_mut::<Option<T>>()?
				.as_mut()
				.map(|v| v as &mut dyn Any)
		}

		fn wrap<T: Reflect>(v: DynValue) -> Result<DynValue, DynValue> {
			v.downcast::<T>().map(|v| Box::new(Some(*v)) as DynValue)
		}

		fn empty<T: Reflect>() -> DynValue {
			Box::new(None::<T>)
		}

		Self {
			inner: TypeInfo::of::<T>(),
			get: get::<T>,
			get_mut: get_mut::<T>,
			wrap: wrap::<T>,
			empty: Some(empty::<T>),
		}
	}

	pub fn boxed<T: Reflect>() -> Self {
		fn get<T: Reflect>(v: &dyn Any) -> Option<&dyn Any> {
			v.downcast_ref::<Box<T>>().map(|v| &**v as &dyn Any)
		}

		fn get_mut<T: Reflect>(v: &mut dyn Any) -> Option<&mut dyn Any> {
			v.downcast_mut::<Box<T>>().map(|v| &mut **v as &mut dyn Any)
		}

		fn wrap<T: Reflect>(v: DynValue) -> Result<DynValue, DynValue> {
			// `downcast` already hands us the `Box<T>` we are after.
			v.downcast::<T>().map(|v| Box::new(v) as DynValue)
		}

		Self {
			inner: TypeInfo::of::<T>(),
			get: get::<T>,
			get_mut: get_mut::<T>,
			wrap: wrap::<T>,
			empty: None,
		}
	}

	pub fn inner(&self) -> TypeInfo {
		self.inner
	}
}

/// Erased operations over an ordered collection.
#[derive(Copy, Clone)]
pub struct SequenceOps {
	pub(crate) element: TypeInfo,
	pub(crate) len: fn(&dyn Any) -> Option<usize>,
	pub(crate) get: fn(&dyn Any, usize) -> Option<&dyn Any>,
	pub(crate) get_mut: fn(&mut dyn Any, usize) -> Option<&mut dyn Any>,
	pub(crate) collect: fn(Vec<DynValue>) -> Result<DynValue, DynValue>,
}

impl SequenceOps {
	pub fn vec<T: Reflect>() -> Self {
		fn len<T: Reflect>(v: &dyn Any) -> Option<usize> {
			v.downcast_ref::<Vec<T>>().map(Vec::len)
		}

		fn get<T: Reflect>(v: &dyn Any, i: usize) -> Option<&dyn Any> {
			v.downcast_ref::<Vec<T>>()?.get(i).map(|v| v as &dyn Any)
		}

		fn get_mut<T: Reflect>(v: &mut dyn Any, i: usize) -> Option<&mut dyn Any> {
			v.downcast_mut::<Vec<T>>()?
				.get_mut(i)
				.map(|v| v as &mut dyn Any)
		}

		fn collect<T: Reflect>(values: Vec<DynValue>) -> Result<DynValue, DynValue> {
			let mut out = Vec::<T>::with_capacity(values.len());
			for value in values {
				out.push(*value.downcast::<T>()?);
			}
			Ok(Box::new(out))
		}

		Self {
			element: TypeInfo::of::<T>(),
			len: len::<T>,
			get: get::<T>,
			get_mut: get_mut::<T>,
			collect: collect::<T>,
		}
	}

	pub fn element(&self) -> TypeInfo {
		self.element
	}
}

// === TypeInfo === //

/// An erased, `Copy` descriptor of a [Reflect] type.
#[derive(Copy, Clone)]
pub struct TypeInfo {
	id: NamedTypeId,
	kind: fn() -> TypeKind,
	clone_value: fn(&dyn Any) -> Option<DynValue>,
	instantiate: fn() -> Option<DynValue>,
	assign: fn(&mut dyn Any, DynValue) -> Result<(), DynValue>,
}

impl TypeInfo {
	pub fn of<T: Reflect>() -> Self {
		fn clone_value<T: Reflect>(v: &dyn Any) -> Option<DynValue> {
			v.downcast_ref::<T>().map(|v| Box::new(v.clone()) as DynValue)
		}

		fn instantiate<T: Reflect>() -> Option<DynValue> {
			T::instantiate().map(|v| Box::new(v) as DynValue)
		}

		fn assign<T: Reflect>(slot: &mut dyn Any, value: DynValue) -> Result<(), DynValue> {
			let Some(slot) = slot.downcast_mut::<T>() else {
				return Err(value);
			};
			*slot = *value.downcast::<T>()?;
			Ok(())
		}

		Self {
			id: NamedTypeId::of::<T>(),
			kind: T::kind,
			clone_value: clone_value::<T>,
			instantiate: instantiate::<T>,
			assign: assign::<T>,
		}
	}

	pub fn id(&self) -> NamedTypeId {
		self.id
	}

	pub fn name(&self) -> &'static str {
		self.id.name()
	}

	pub fn kind(&self) -> TypeKind {
		(self.kind)()
	}

	pub fn is<T: 'static>(&self) -> bool {
		self.id.is::<T>()
	}

	/// Whether values of this type are reference-shaped, i.e. whether mapping into an existing
	/// value should update it in place rather than replace it.
	pub fn is_reference(&self) -> bool {
		matches!(self.kind(), TypeKind::Nullable(_) | TypeKind::Boxed(_))
	}

	pub fn is_shape(&self) -> bool {
		matches!(self.kind(), TypeKind::Shape(_))
	}

	/// Fetches the member set of a shape type.
	pub fn members(&self) -> Option<Arc<MemberSet>> {
		match self.kind() {
			TypeKind::Shape(members) => Some(members()),
			_ => None,
		}
	}

	pub fn clone_value(&self, value: &dyn Any) -> Option<DynValue> {
		(self.clone_value)(value)
	}

	pub fn instantiate(&self) -> Option<DynValue> {
		(self.instantiate)()
	}

	/// Overwrites `slot` with `value`. Both must be of this type; otherwise, `value` is handed
	/// back.
	pub fn assign(&self, slot: &mut dyn Any, value: DynValue) -> Result<(), DynValue> {
		(self.assign)(slot, value)
	}

	/// Views an owned erased value as a plain `dyn Any`.
	pub fn view(value: &DynValue) -> &dyn Any {
		AnyLike::as_any(&**value)
	}

	pub fn view_mut(value: &mut DynValue) -> &mut dyn Any {
		AnyLike::as_any_mut(&mut **value)
	}
}

impl fmt::Debug for TypeInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TypeInfo<{}>", self.id.short_name())
	}
}

impl fmt::Display for TypeInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.id.short_name())
	}
}

impl Eq for TypeInfo {}

impl PartialEq for TypeInfo {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl hash::Hash for TypeInfo {
	fn hash<H: hash::Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

// === TypePair === //

/// An ordered (source, target) pair of types. This is the key of every mapping plan.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct TypePair {
	pub source: TypeInfo,
	pub target: TypeInfo,
}

impl TypePair {
	pub fn new(source: TypeInfo, target: TypeInfo) -> Self {
		Self { source, target }
	}

	pub fn of<S: Reflect, T: Reflect>() -> Self {
		Self::new(TypeInfo::of::<S>(), TypeInfo::of::<T>())
	}

	pub fn is_structural(&self) -> bool {
		self.source.is_shape() && self.target.is_shape()
	}
}

impl fmt::Debug for TypePair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TypePair<{} -> {}>", self.source, self.target)
	}
}

impl fmt::Display for TypePair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} -> {}", self.source, self.target)
	}
}
