//! The member model: a uniform view over the named, typed members of a shape.
//!
//! Stored fields, accessor pairs and members flattened in from an embedded base shape all sit
//! behind the same [MemberAccess] interface so nothing downstream of a [MemberSet] needs to care
//! about how a member is physically stored.

use std::{
	any::Any,
	fmt,
	ops::Deref,
	sync::{Arc, OnceLock},
};

use remap_util::{
	debug::type_id::NamedTypeId,
	lang::marker::PhantomFn,
	mem::hash::{new_fx_dash_map, FxDashMap, FxHashSet},
};

use crate::{
	error::{ConfigError, MapError},
	reflect::{DynValue, Reflect, TypeInfo},
};

// === Shape === //

/// A type whose members can be enumerated.
///
/// Plain structs usually implement this through the [shape!](crate::shape) macro. Types with
/// accessors, read-only projections or embedded bases implement it by hand:
///
/// ```ignore
/// impl Shape for Account {
///     fn describe(shape: &mut ShapeBuilder<Self>) {
///         shape.flatten(|a| &a.base, |a| &mut a.base);
///         shape.field("id", |a| &a.id, |a| &mut a.id);
///         shape.accessor("owner", Account::owner, Account::set_owner);
///         shape.getter("display", Account::display);
///     }
/// }
/// ```
pub trait Shape: Reflect {
	fn describe(shape: &mut ShapeBuilder<Self>);
}

/// Fetches the (cached) member set of `S`. Each shape is described at most once per process
/// unless two threads race on its very first lookup, in which case one of the results is dropped.
pub fn members_of<S: Shape>() -> Arc<MemberSet> {
	static REGISTRY: OnceLock<FxDashMap<NamedTypeId, Arc<MemberSet>>> = OnceLock::new();

	let registry = REGISTRY.get_or_init(new_fx_dash_map);
	let id = NamedTypeId::of::<S>();

	if let Some(cached) = registry.get(&id) {
		return cached.value().clone();
	}

	// We describe outside of the map's locks since flattening a base shape recursively queries the
	// registry.
	let mut builder = ShapeBuilder::<S>::new();
	S::describe(&mut builder);
	let set = Arc::new(builder.finish());

	let published = registry.entry(id).or_insert(set).value().clone();
	published
}

/// Implements [Reflect] and [Shape] for a plain struct by listing its fields.
///
/// ```ignore
/// shape!(Person: Default { name, age });     // instantiable through `Default`
/// shape!(Account { id, #[private] secret }); // no parameterless constructor
/// ```
#[macro_export]
macro_rules! shape {
	(@impl $ty:ident, $instantiate:expr, $($(#[$vis:ident])? $field:ident),* $(,)?) => {
		impl $crate::reflect::Reflect for $ty {
			fn kind() -> $crate::reflect::TypeKind {
				$crate::reflect::TypeKind::shape::<Self>()
			}

			fn instantiate() -> ::core::option::Option<Self> {
				$instantiate
			}
		}

		impl $crate::member::Shape for $ty {
			fn describe(shape: &mut $crate::member::ShapeBuilder<Self>) {
				$(
					#[allow(unused_variables)]
					let decl = shape.field(
						::core::stringify!($field),
						|v: &$ty| &v.$field,
						|v: &mut $ty| &mut v.$field,
					);
					$($crate::shape!(@vis decl $vis);)?
				)*
			}
		}
	};
	(@vis $decl:ident private) => {
		$decl.private();
	};
	($ty:ident : Default { $($body:tt)* }) => {
		$crate::shape!(
			@impl $ty,
			::core::option::Option::Some(<$ty as ::core::default::Default>::default()),
			$($body)*
		);
	};
	($ty:ident { $($body:tt)* }) => {
		$crate::shape!(@impl $ty, ::core::option::Option::None, $($body)*);
	};
}

// === Member === //

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Visibility {
	Public,
	NonPublic,
}

/// The identity of a member: the type declaring it and its name.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct MemberKey {
	pub declaring: NamedTypeId,
	pub name: &'static str,
}

/// A value read out of a member. Stored fields lend their value while accessors produce one.
pub enum MemberValue<'a> {
	Borrowed(&'a dyn Any),
	Owned(DynValue),
}

impl Deref for MemberValue<'_> {
	type Target = dyn Any;

	fn deref(&self) -> &Self::Target {
		match self {
			MemberValue::Borrowed(value) => *value,
			MemberValue::Owned(value) => TypeInfo::view(value),
		}
	}
}

/// Physical access to a member of some owner type. Every method is handed the owner as a
/// `dyn Any` and reports a type mismatch by doing nothing.
pub trait MemberAccess: Send + Sync {
	fn read<'a>(&self, owner: &'a dyn Any) -> Option<MemberValue<'a>>;

	/// Overwrites the member. The value is handed back if either the owner or the value has the
	/// wrong type, or if the member cannot be written.
	fn write(&self, owner: &mut dyn Any, value: DynValue) -> Result<(), DynValue>;

	/// Runs `f` on the member's current value and stores the result back. Returns `Ok(false)` if
	/// the member cannot be updated in place.
	fn modify(
		&self,
		owner: &mut dyn Any,
		f: &mut dyn FnMut(&mut dyn Any) -> Result<(), MapError>,
	) -> Result<bool, MapError>;
}

#[derive(Clone)]
pub struct Member(Arc<MemberInner>);

struct MemberInner {
	name: &'static str,
	declaring: TypeInfo,
	value_type: TypeInfo,
	depth: u32,
	read: Option<Visibility>,
	write: Option<Visibility>,
	access: Arc<dyn MemberAccess>,
}

impl fmt::Debug for Member {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Member")
			.field("name", &self.0.name)
			.field("declaring", &self.0.declaring)
			.field("value_type", &self.0.value_type)
			.field("depth", &self.0.depth)
			.field("read", &self.0.read)
			.field("write", &self.0.write)
			.finish_non_exhaustive()
	}
}

impl Member {
	pub fn name(&self) -> &'static str {
		self.0.name
	}

	pub fn declaring_type(&self) -> TypeInfo {
		self.0.declaring
	}

	pub fn value_type(&self) -> TypeInfo {
		self.0.value_type
	}

	/// How many embedded bases separate this member's declarer from the described shape. Zero for
	/// members declared by the shape itself.
	pub fn depth(&self) -> u32 {
		self.0.depth
	}

	pub fn key(&self) -> MemberKey {
		MemberKey {
			declaring: self.0.declaring.id(),
			name: self.0.name,
		}
	}

	pub fn read_visibility(&self) -> Option<Visibility> {
		self.0.read
	}

	pub fn write_visibility(&self) -> Option<Visibility> {
		self.0.write
	}

	pub fn is_readable(&self, include_non_public: bool) -> bool {
		match self.0.read {
			Some(Visibility::Public) => true,
			Some(Visibility::NonPublic) => include_non_public,
			None => false,
		}
	}

	pub fn is_writable(&self, include_non_public: bool) -> bool {
		match self.0.write {
			Some(Visibility::Public) => true,
			Some(Visibility::NonPublic) => include_non_public,
			None => false,
		}
	}

	pub fn read<'a>(&self, owner: &'a dyn Any) -> Option<MemberValue<'a>> {
		self.0.access.read(owner)
	}

	pub fn write(&self, owner: &mut dyn Any, value: DynValue) -> Result<(), DynValue> {
		self.0.access.write(owner, value)
	}

	pub fn modify(
		&self,
		owner: &mut dyn Any,
		f: &mut dyn FnMut(&mut dyn Any) -> Result<(), MapError>,
	) -> Result<bool, MapError> {
		self.0.access.modify(owner, f)
	}

	pub fn ptr_eq(&self, other: &Member) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}

// === MemberSet === //

/// The members of one shape. Members flattened in from bases come first (deepest base first),
/// followed by the shape's own members in declaration order.
pub struct MemberSet {
	owner: TypeInfo,
	members: Vec<Member>,
}

impl fmt::Debug for MemberSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemberSet")
			.field("owner", &self.owner)
			.field("members", &self.members)
			.finish()
	}
}

impl MemberSet {
	pub fn owner(&self) -> TypeInfo {
		self.owner
	}

	pub fn len(&self) -> usize {
		self.members.len()
	}

	pub fn is_empty(&self) -> bool {
		self.members.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Member> {
		self.members.iter()
	}

	/// Looks up a member by name, preferring the most-derived declarer when a base and a derived
	/// shape share a name.
	pub fn find(&self, name: &str) -> Option<&Member> {
		self.members
			.iter()
			.filter(|member| member.name() == name)
			.min_by_key(|member| member.depth())
	}

	/// Like [find](Self::find) but reports why the lookup failed.
	pub fn get(&self, name: &str) -> Result<&Member, ConfigError> {
		if name.is_empty() {
			return Err(ConfigError::EmptyMemberName);
		}

		self.find(name).ok_or_else(|| ConfigError::MemberNotFound {
			owner: self.owner.id(),
			name: name.to_string(),
		})
	}
}

impl<'a> IntoIterator for &'a MemberSet {
	type Item = &'a Member;
	type IntoIter = std::slice::Iter<'a, Member>;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}

// === ShapeBuilder === //

pub struct ShapeBuilder<S> {
	own: Vec<MemberDraft>,
	bases: Vec<Member>,
	_ty: PhantomFn<S, S>,
}

struct MemberDraft {
	name: &'static str,
	value_type: TypeInfo,
	read: Option<Visibility>,
	write: Option<Visibility>,
	access: Arc<dyn MemberAccess>,
}

/// A freshly declared member whose visibility can still be adjusted.
pub struct MemberDecl<'a> {
	draft: &'a mut MemberDraft,
}

impl MemberDecl<'_> {
	/// Marks every capability of the member as non-public.
	pub fn private(self) -> Self {
		self.draft.read = self.draft.read.map(|_| Visibility::NonPublic);
		self.draft.write = self.draft.write.map(|_| Visibility::NonPublic);
		self
	}

	pub fn private_read(self) -> Self {
		self.draft.read = self.draft.read.map(|_| Visibility::NonPublic);
		self
	}

	pub fn private_write(self) -> Self {
		self.draft.write = self.draft.write.map(|_| Visibility::NonPublic);
		self
	}
}

impl<S: Shape> ShapeBuilder<S> {
	fn new() -> Self {
		Self {
			own: Vec::new(),
			bases: Vec::new(),
			_ty: std::marker::PhantomData,
		}
	}

	fn push(
		&mut self,
		name: &'static str,
		value_type: TypeInfo,
		read: bool,
		write: bool,
		access: Arc<dyn MemberAccess>,
	) -> MemberDecl<'_> {
		let index = self.own.len();
		self.own.push(MemberDraft {
			name,
			value_type,
			read: read.then_some(Visibility::Public),
			write: write.then_some(Visibility::Public),
			access,
		});

		MemberDecl {
			draft: &mut self.own[index],
		}
	}

	/// Declares a stored field.
	pub fn field<V, G, M>(&mut self, name: &'static str, get: G, get_mut: M) -> MemberDecl<'_>
	where
		V: Reflect,
		G: 'static + Send + Sync + Fn(&S) -> &V,
		M: 'static + Send + Sync + Fn(&mut S) -> &mut V,
	{
		self.push(
			name,
			TypeInfo::of::<V>(),
			true,
			true,
			Arc::new(FieldAccess {
				get,
				get_mut,
				_ty: std::marker::PhantomData::<fn(S) -> V>,
			}),
		)
	}

	/// Declares a member backed by a getter and a setter.
	pub fn accessor<V, G, W>(&mut self, name: &'static str, get: G, set: W) -> MemberDecl<'_>
	where
		V: Reflect,
		G: 'static + Send + Sync + Fn(&S) -> V,
		W: 'static + Send + Sync + Fn(&mut S, V),
	{
		self.push(
			name,
			TypeInfo::of::<V>(),
			true,
			true,
			Arc::new(AccessorPair::<S, V> {
				get: Some(Box::new(get)),
				set: Some(Box::new(set)),
			}),
		)
	}

	/// Declares a read-only member.
	pub fn getter<V, G>(&mut self, name: &'static str, get: G) -> MemberDecl<'_>
	where
		V: Reflect,
		G: 'static + Send + Sync + Fn(&S) -> V,
	{
		self.push(
			name,
			TypeInfo::of::<V>(),
			true,
			false,
			Arc::new(AccessorPair::<S, V> {
				get: Some(Box::new(get)),
				set: None,
			}),
		)
	}

	/// Declares a write-only member.
	pub fn setter<V, W>(&mut self, name: &'static str, set: W) -> MemberDecl<'_>
	where
		V: Reflect,
		W: 'static + Send + Sync + Fn(&mut S, V),
	{
		self.push(
			name,
			TypeInfo::of::<V>(),
			false,
			true,
			Arc::new(AccessorPair::<S, V> {
				get: None,
				set: Some(Box::new(set)),
			}),
		)
	}

	/// Pulls every member of an embedded base shape into this shape. The flattened members keep
	/// their original declaring type and sit one level deeper than they did in `B`.
	pub fn flatten<B, G, M>(&mut self, get: G, get_mut: M)
	where
		B: Shape,
		G: 'static + Send + Sync + Fn(&S) -> &B,
		M: 'static + Send + Sync + Fn(&mut S) -> &mut B,
	{
		let outer: Arc<OuterRef<S, B>> = Arc::new(get);
		let outer_mut: Arc<OuterMut<S, B>> = Arc::new(get_mut);

		for member in members_of::<B>().iter() {
			self.bases.push(Member(Arc::new(MemberInner {
				name: member.name(),
				declaring: member.declaring_type(),
				value_type: member.value_type(),
				depth: member.depth() + 1,
				read: member.read_visibility(),
				write: member.write_visibility(),
				access: Arc::new(FlattenedAccess {
					outer: outer.clone(),
					outer_mut: outer_mut.clone(),
					inner: member.0.access.clone(),
				}),
			})));
		}
	}

	/// # Panics
	///
	/// Panics if two members share a name at the same declaring level.
	fn finish(self) -> MemberSet {
		let owner = TypeInfo::of::<S>();
		let mut members = self.bases;

		members.extend(self.own.into_iter().map(|draft| {
			Member(Arc::new(MemberInner {
				name: draft.name,
				declaring: owner,
				value_type: draft.value_type,
				depth: 0,
				read: draft.read,
				write: draft.write,
				access: draft.access,
			}))
		}));

		let mut seen = FxHashSet::default();
		for member in &members {
			assert!(
				seen.insert(member.key()),
				"`{}` declares member {:?} more than once",
				member.declaring_type(),
				member.name(),
			);
		}

		MemberSet { owner, members }
	}
}

// === Access implementations === //

struct FieldAccess<S, V, G, M> {
	get: G,
	get_mut: M,
	_ty: PhantomFn<S, V>,
}

impl<S, V, G, M> MemberAccess for FieldAccess<S, V, G, M>
where
	S: Reflect,
	V: Reflect,
	G: Send + Sync + Fn(&S) -> &V,
	M: Send + Sync + Fn(&mut S) -> &mut V,
{
	fn read<'a>(&self, owner: &'a dyn Any) -> Option<MemberValue<'a>> {
		let owner = owner.downcast_ref::<S>()?;
		Some(MemberValue::Borrowed((self.get)(owner)))
	}

	fn write(&self, owner: &mut dyn Any, value: DynValue) -> Result<(), DynValue> {
		let Some(owner) = owner.downcast_mut::<S>() else {
			return Err(value);
		};
		*(self.get_mut)(owner) = *value.downcast::<V>()?;
		Ok(())
	}

	fn modify(
		&self,
		owner: &mut dyn Any,
		f: &mut dyn FnMut(&mut dyn Any) -> Result<(), MapError>,
	) -> Result<bool, MapError> {
		let Some(owner) = owner.downcast_mut::<S>() else {
			return Ok(false);
		};
		f((self.get_mut)(owner))?;
		Ok(true)
	}
}

type Getter<S, V> = dyn Fn(&S) -> V + Send + Sync;
type Setter<S, V> = dyn Fn(&mut S, V) + Send + Sync;

struct AccessorPair<S, V> {
	get: Option<Box<Getter<S, V>>>,
	set: Option<Box<Setter<S, V>>>,
}

impl<S: Reflect, V: Reflect> MemberAccess for AccessorPair<S, V> {
	fn read<'a>(&self, owner: &'a dyn Any) -> Option<MemberValue<'a>> {
		let get = self.get.as_ref()?;
		let owner = owner.downcast_ref::<S>()?;
		Some(MemberValue::Owned(Box::new(get(owner))))
	}

	fn write(&self, owner: &mut dyn Any, value: DynValue) -> Result<(), DynValue> {
		let Some(set) = &self.set else {
			return Err(value);
		};
		let Some(owner) = owner.downcast_mut::<S>() else {
			return Err(value);
		};
		set(owner, *value.downcast::<V>()?);
		Ok(())
	}

	fn modify(
		&self,
		owner: &mut dyn Any,
		f: &mut dyn FnMut(&mut dyn Any) -> Result<(), MapError>,
	) -> Result<bool, MapError> {
		let (Some(get), Some(set)) = (&self.get, &self.set) else {
			return Ok(false);
		};
		let Some(owner) = owner.downcast_mut::<S>() else {
			return Ok(false);
		};

		let mut value = get(owner);
		f(&mut value)?;
		set(owner, value);
		Ok(true)
	}
}

type OuterRef<S, B> = dyn Fn(&S) -> &B + Send + Sync;
type OuterMut<S, B> = dyn Fn(&mut S) -> &mut B + Send + Sync;

struct FlattenedAccess<S, B> {
	outer: Arc<OuterRef<S, B>>,
	outer_mut: Arc<OuterMut<S, B>>,
	inner: Arc<dyn MemberAccess>,
}

impl<S: Reflect, B: Reflect> MemberAccess for FlattenedAccess<S, B> {
	fn read<'a>(&self, owner: &'a dyn Any) -> Option<MemberValue<'a>> {
		let owner = owner.downcast_ref::<S>()?;
		self.inner.read((self.outer)(owner))
	}

	fn write(&self, owner: &mut dyn Any, value: DynValue) -> Result<(), DynValue> {
		let Some(owner) = owner.downcast_mut::<S>() else {
			return Err(value);
		};
		self.inner.write((self.outer_mut)(owner), value)
	}

	fn modify(
		&self,
		owner: &mut dyn Any,
		f: &mut dyn FnMut(&mut dyn Any) -> Result<(), MapError>,
	) -> Result<bool, MapError> {
		let Some(owner) = owner.downcast_mut::<S>() else {
			return Ok(false);
		};
		self.inner.modify((self.outer_mut)(owner), f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug, Clone, Default, PartialEq)]
	struct Base {
		id: u32,
		label: String,
	}

	crate::shape!(Base: Default { id, label });

	#[derive(Debug, Clone, Default, PartialEq)]
	struct Derived {
		base: Base,
		label: i64,
		secret: String,
		total: u32,
	}

	impl Reflect for Derived {
		fn kind() -> crate::reflect::TypeKind {
			crate::reflect::TypeKind::shape::<Self>()
		}

		fn instantiate() -> Option<Self> {
			Some(Self::default())
		}
	}

	impl Shape for Derived {
		fn describe(shape: &mut ShapeBuilder<Self>) {
			shape.field("label", |d| &d.label, |d| &mut d.label);
			shape.field("secret", |d| &d.secret, |d| &mut d.secret).private();
			shape.accessor("total", |d: &Derived| d.total, |d: &mut Derived, v| d.total = v);
			shape.getter("summary", |d: &Derived| format!("{}:{}", d.base.id, d.label));
			shape.flatten(|d| &d.base, |d| &mut d.base);
		}
	}

	#[test]
	fn bases_come_first_and_lookup_prefers_most_derived() {
		let set = members_of::<Derived>();
		let names = set.iter().map(Member::name).collect::<Vec<_>>();
		assert_eq!(names, ["id", "label", "label", "secret", "total", "summary"]);

		let label = set.find("label").unwrap();
		assert_eq!(label.depth(), 0);
		assert!(label.value_type().is::<i64>());
		assert!(label.declaring_type().is::<Derived>());

		let id = set.get("id").unwrap();
		assert_eq!(id.depth(), 1);
		assert!(id.declaring_type().is::<Base>());
	}

	#[test]
	fn lookup_errors() {
		let set = members_of::<Derived>();
		assert!(matches!(set.get(""), Err(ConfigError::EmptyMemberName)));
		assert!(matches!(
			set.get("missing"),
			Err(ConfigError::MemberNotFound { name, .. }) if name == "missing"
		));
	}

	#[test]
	fn capabilities_are_tracked_separately() {
		let set = members_of::<Derived>();

		let secret = set.get("secret").unwrap();
		assert!(!secret.is_readable(false));
		assert!(secret.is_readable(true));
		assert_eq!(secret.write_visibility(), Some(Visibility::NonPublic));

		let summary = set.get("summary").unwrap();
		assert!(summary.is_readable(false));
		assert!(!summary.is_writable(true));
	}

	#[test]
	fn fields_accessors_and_bases_share_one_interface() {
		let set = members_of::<Derived>();
		let mut value = Derived {
			base: Base {
				id: 4,
				label: "base".to_string(),
			},
			label: 9,
			secret: String::new(),
			total: 1,
		};

		let summary = set.get("summary").unwrap();
		let read = summary.read(&value).unwrap();
		assert_eq!(read.downcast_ref::<String>().unwrap(), "4:9");
		drop(read);

		let total = set.get("total").unwrap();
		total.write(&mut value, Box::new(12u32)).unwrap();
		assert_eq!(value.total, 12);
		assert!(total.write(&mut value, Box::new("nope")).is_err());

		let base_label = set
			.iter()
			.find(|m| m.name() == "label" && m.depth() == 1)
			.unwrap();
		base_label
			.modify(&mut value, &mut |slot| {
				slot.downcast_mut::<String>().unwrap().push_str("-edited");
				Ok(())
			})
			.unwrap();
		assert_eq!(value.base.label, "base-edited");

		let handled = summary.modify(&mut value, &mut |_| Ok(())).unwrap();
		assert!(!handled);
	}

	#[derive(Debug, Clone)]
	struct Twice {
		a: u8,
	}

	impl Reflect for Twice {
		fn kind() -> crate::reflect::TypeKind {
			crate::reflect::TypeKind::shape::<Self>()
		}
	}

	impl Shape for Twice {
		fn describe(shape: &mut ShapeBuilder<Self>) {
			shape.field("a", |t| &t.a, |t| &mut t.a);
			shape.field("a", |t| &t.a, |t| &mut t.a);
		}
	}

	#[test]
	#[should_panic(expected = "more than once")]
	fn duplicate_names_at_one_level_panic() {
		members_of::<Twice>();
	}
}
