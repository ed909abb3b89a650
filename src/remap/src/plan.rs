//! Mapping plans: the per-pair unit of configuration and compilation.
//!
//! Every (container, source, target) triple owns exactly one [TypeMapper] cell. Configuration is
//! written into the cell through a [PlanBuilder] until the plan first compiles. Compiling runs the
//! container's conventions, applies the pair's bindings and ignores, resolves a conversion for each
//! surviving correspondence and composes the result with the pair's hooks into a single routine.
//! The outcome (including a failure) is published once and reused by every later caller.
//!
//! Nested shape pairs are only *linked* while compiling. Their own plans compile the first time a
//! value flows through the link, which is what keeps self-referential shapes from recursing.

use std::{
	any::Any,
	fmt,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, OnceLock, Weak,
	},
};

use derive_where::derive_where;
use log::{debug, trace};
use parking_lot::Mutex;
use remap_util::{debug::error::ErrorFormatExt, lang::marker::PhantomFn, mem::hash::FxHashSet};

use crate::{
	config::MatchOptions,
	container::{ContainerId, ContainerInner},
	convention::{
		check_converter, Convention, ConventionContext, Correspondence, Correspondences, Origin,
	},
	convert::ValueConverter,
	create::{erase_factory, CreateFn, InstanceCreator},
	error::{CompileError, ConfigError, MapError},
	member::{Member, MemberKey},
	member_mapper::{MemberMapper, Resolver, ValueConversion},
	reflect::{DynValue, Reflect, TypeInfo, TypePair},
	sequence,
};

// === PlanState === //

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PlanState {
	/// Created but never compiled. Still configurable.
	Uninitialized,

	/// Conventions and explicit configuration have produced the final correspondences.
	Resolved,

	/// The routine has been built but not yet published.
	Compiled,

	/// Published and immutable.
	Ready,

	/// Compilation failed. The failure is published like a routine would have been.
	Failed,
}

// === TypeMapper === //

type HookFn = dyn Fn(&dyn Any, &mut dyn Any) -> Result<(), MapError> + Send + Sync;

fn erase_hook<S: Reflect, T: Reflect>(
	f: impl 'static + Send + Sync + Fn(&S, &mut T) -> anyhow::Result<()>,
) -> Arc<HookFn> {
	Arc::new(
		move |source: &dyn Any, target: &mut dyn Any| -> Result<(), MapError> {
			let source = source
				.downcast_ref::<S>()
				.ok_or_else(|| MapError::mismatch::<S>("running a hook"))?;
			let target = target
				.downcast_mut::<T>()
				.ok_or_else(|| MapError::mismatch::<T>("running a hook"))?;

			f(source, target).map_err(MapError::User)
		},
	)
}

#[derive(Clone, Default)]
struct PlanConfig {
	options: Option<MatchOptions>,
	before: Option<Arc<HookFn>>,
	after: Option<Arc<HookFn>>,
	create_with: Option<Arc<CreateFn>>,
	whole: Option<Arc<HookFn>>,
	bindings: Correspondences,
	ignores: FxHashSet<MemberKey>,
}

pub(crate) struct TypeMapper {
	pair: TypePair,
	container: Weak<ContainerInner>,
	state: Mutex<PlanState>,
	config: Mutex<PlanConfig>,
	read_only: AtomicBool,
	compiled: OnceLock<Result<Arc<CompiledPlan>, CompileError>>,
}

impl fmt::Debug for TypeMapper {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TypeMapper")
			.field("pair", &self.pair)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

impl TypeMapper {
	pub(crate) fn new(pair: TypePair, container: Weak<ContainerInner>) -> Self {
		Self {
			pair,
			container,
			state: Mutex::new(PlanState::Uninitialized),
			config: Mutex::new(PlanConfig::default()),
			read_only: AtomicBool::new(false),
			compiled: OnceLock::new(),
		}
	}

	pub(crate) fn pair(&self) -> TypePair {
		self.pair
	}

	pub(crate) fn state(&self) -> PlanState {
		*self.state.lock()
	}

	pub(crate) fn is_read_only(&self) -> bool {
		self.read_only.load(Ordering::Acquire)
	}

	/// Fetches the compiled plan, compiling it on first use. Concurrent first callers block until
	/// the single compilation finishes.
	pub(crate) fn compiled(&self) -> Result<&Arc<CompiledPlan>, CompileError> {
		self.compiled
			.get_or_init(|| self.compile())
			.as_ref()
			.map_err(Clone::clone)
	}

	fn compile(&self) -> Result<Arc<CompiledPlan>, CompileError> {
		// Builders check this flag while holding the config lock and `build` only snapshots the
		// config after setting it, so no builder call can be lost.
		self.read_only.store(true, Ordering::Release);

		match self.build() {
			Ok(plan) => {
				*self.state.lock() = PlanState::Ready;
				debug!("compiled mapping plan for `{}`: {:?}", self.pair, plan);
				Ok(Arc::new(plan))
			}
			Err(err) => {
				*self.state.lock() = PlanState::Failed;
				err.log_warn(module_path!());
				Err(err)
			}
		}
	}

	fn build(&self) -> Result<CompiledPlan, CompileError> {
		let pair = self.pair;
		let container = self
			.container
			.upgrade()
			.ok_or(CompileError::ContainerDropped)?;
		let registrations = container.seal();
		let config = self.config.lock().clone();
		let options = config
			.options
			.unwrap_or(container.config().default_options);

		let resolver = Resolver {
			container: &container,
			registrations: &registrations,
		};

		// Non-shape pairs (sequences, wrappers, scalars) compile into a single value conversion.
		let (Some(source_members), Some(target_members)) =
			(pair.source.members(), pair.target.members())
		else {
			let conversion = resolver
				.resolve(pair.source, pair.target, true)
				.ok_or(CompileError::NoConversion { pair })?;

			*self.state.lock() = PlanState::Compiled;
			return Ok(CompiledPlan {
				pair,
				body: PlanBody::Value(conversion),
			});
		};

		let mut correspondences = Correspondences::default();

		if config.whole.is_none() {
			let mut cx = ConventionContext::new(
				pair,
				source_members,
				target_members,
				options,
				&registrations.coercions,
				&registrations.converters,
				&mut correspondences,
			);

			for (_, convention) in &registrations.conventions {
				convention.apply(&mut cx);
			}

			for binding in config.bindings {
				correspondences.insert(binding);
			}

			for key in &config.ignores {
				correspondences.remove(key);
			}
		}

		*self.state.lock() = PlanState::Resolved;

		let creator = InstanceCreator::resolve(
			pair.target,
			config.create_with.as_ref(),
			&registrations.creators,
		)?;

		let mut mappers = Vec::with_capacity(correspondences.len());
		for correspondence in correspondences {
			let name = correspondence.target.name();

			match MemberMapper::resolve(&resolver, pair.source, correspondence, options.hierarchy) {
				Some(mapper) => mappers.push(mapper),
				None => trace!("{pair}: no conversion into `{name}`; leaving it unmapped"),
			}
		}

		let member_count = mappers.len();
		let mut routine: Arc<HookFn> = match config.whole {
			Some(whole) => whole,
			None => Arc::new(
				move |source: &dyn Any, target: &mut dyn Any| -> Result<(), MapError> {
					for mapper in &mappers {
						mapper.apply(source, target)?;
					}
					Ok(())
				},
			),
		};

		if let Some(before) = config.before {
			let body = routine;
			routine = Arc::new(
				move |source: &dyn Any, target: &mut dyn Any| -> Result<(), MapError> {
					before(source, &mut *target)?;
					body(source, target)
				},
			);
		}

		if let Some(after) = config.after {
			let body = routine;
			routine = Arc::new(
				move |source: &dyn Any, target: &mut dyn Any| -> Result<(), MapError> {
					body(source, &mut *target)?;
					after(source, target)
				},
			);
		}

		*self.state.lock() = PlanState::Compiled;

		Ok(CompiledPlan {
			pair,
			body: PlanBody::Object {
				creator,
				routine,
				member_count,
			},
		})
	}
}

// === CompiledPlan === //

pub(crate) struct CompiledPlan {
	pair: TypePair,
	body: PlanBody,
}

enum PlanBody {
	Object {
		creator: InstanceCreator,
		routine: Arc<HookFn>,
		member_count: usize,
	},
	Value(ValueConversion),
}

impl fmt::Debug for CompiledPlan {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.body {
			PlanBody::Object {
				creator,
				member_count,
				..
			} => f
				.debug_struct("ObjectPlan")
				.field("creator", creator)
				.field("member_count", member_count)
				.finish_non_exhaustive(),
			PlanBody::Value(conversion) => f.debug_tuple("ValuePlan").field(conversion).finish(),
		}
	}
}

impl CompiledPlan {
	fn check(&self, ty: TypeInfo, value: &dyn Any, during: &'static str) -> Result<(), MapError> {
		if value.type_id() == ty.id().raw() {
			Ok(())
		} else {
			Err(MapError::mismatch_of(ty.id(), during))
		}
	}

	pub(crate) fn map_new(&self, source: &dyn Any) -> Result<DynValue, MapError> {
		self.check(self.pair.source, source, "reading a mapping source")?;

		match &self.body {
			PlanBody::Object {
				creator, routine, ..
			} => {
				let mut target = creator.create(source)?;
				routine(source, TypeInfo::view_mut(&mut target))?;
				Ok(target)
			}
			PlanBody::Value(conversion) => conversion.convert(source),
		}
	}

	pub(crate) fn map_into(&self, source: &dyn Any, target: &mut dyn Any) -> Result<(), MapError> {
		self.check(self.pair.source, source, "reading a mapping source")?;
		self.check(self.pair.target, &*target, "writing a mapping target")?;

		match &self.body {
			PlanBody::Object { routine, .. } => routine(source, target),
			PlanBody::Value(conversion) => conversion.merge(source, target),
		}
	}

	pub(crate) fn member_count(&self) -> Option<usize> {
		match &self.body {
			PlanBody::Object { member_count, .. } => Some(*member_count),
			PlanBody::Value(_) => None,
		}
	}
}

// === PlanBuilder === //

/// Configures the plan of one type pair. Every method fails once the plan has begun compiling.
///
/// ```ignore
/// container
///     .configure::<Order, OrderDto>()?
///     .ignore("internal_id")?
///     .bind_member("customer", "buyer")?
///     .after(|order, dto| {
///         dto.total = order.lines.iter().map(|l| l.price).sum();
///         Ok(())
///     })?;
/// ```
pub struct PlanBuilder<S, T> {
	plan: Arc<TypeMapper>,
	_ty: PhantomFn<S, T>,
}

impl<S: Reflect, T: Reflect> PlanBuilder<S, T> {
	pub(crate) fn new(plan: Arc<TypeMapper>) -> Self {
		Self {
			plan,
			_ty: std::marker::PhantomData,
		}
	}

	pub fn pair(&self) -> TypePair {
		self.plan.pair
	}

	fn update(
		&self,
		structural: bool,
		f: impl FnOnce(&mut PlanConfig) -> Result<(), ConfigError>,
	) -> Result<&Self, ConfigError> {
		let mut config = self.plan.config.lock();
		let pair = self.plan.pair;

		if self.plan.is_read_only() {
			return Err(ConfigError::PlanReadOnly { pair });
		}

		if structural && !pair.is_structural() {
			return Err(ConfigError::NotStructural { pair });
		}

		f(&mut config)?;
		Ok(self)
	}

	fn target_member(&self, name: &str) -> Result<Member, ConfigError> {
		let pair = self.plan.pair;
		let members = pair
			.target
			.members()
			.ok_or(ConfigError::NotStructural { pair })?;
		let member = members.get(name)?;

		if member.write_visibility().is_none() {
			return Err(ConfigError::MemberInaccessible {
				owner: pair.target.id(),
				name: member.name(),
				access: "written",
			});
		}

		Ok(member.clone())
	}

	fn source_member(&self, name: &str) -> Result<Member, ConfigError> {
		let pair = self.plan.pair;
		let members = pair
			.source
			.members()
			.ok_or(ConfigError::NotStructural { pair })?;
		let member = members.get(name)?;

		if member.read_visibility().is_none() {
			return Err(ConfigError::MemberInaccessible {
				owner: pair.source.id(),
				name: member.name(),
				access: "read",
			});
		}

		Ok(member.clone())
	}

	fn bind(
		&self,
		target: &str,
		origin: impl FnOnce(&Self) -> Result<Origin, ConfigError>,
		converter: Option<ValueConverter>,
	) -> Result<&Self, ConfigError> {
		self.update(true, |config| {
			let target = self.target_member(target)?;
			let origin = origin(self)?;
			check_converter(self.plan.pair.source, &target, &origin, converter.as_ref())?;

			config.ignores.remove(&target.key());
			config.bindings.insert(Correspondence {
				target,
				origin,
				converter,
			});
			Ok(())
		})
	}

	/// Overrides the matching options used for this pair.
	pub fn options(&self, options: MatchOptions) -> Result<&Self, ConfigError> {
		self.update(false, |config| {
			config.options = Some(options);
			Ok(())
		})
	}

	/// Runs `f` on the freshly created (or supplied) target before any member is mapped.
	pub fn before(
		&self,
		f: impl 'static + Send + Sync + Fn(&S, &mut T) -> anyhow::Result<()>,
	) -> Result<&Self, ConfigError> {
		self.update(true, |config| {
			config.before = Some(erase_hook(f));
			Ok(())
		})
	}

	/// Runs `f` once every member has been mapped.
	pub fn after(
		&self,
		f: impl 'static + Send + Sync + Fn(&S, &mut T) -> anyhow::Result<()>,
	) -> Result<&Self, ConfigError> {
		self.update(true, |config| {
			config.after = Some(erase_hook(f));
			Ok(())
		})
	}

	/// Creates new targets from the source instead of through the default strategy.
	pub fn create_with(
		&self,
		f: impl 'static + Send + Sync + Fn(&S) -> anyhow::Result<T>,
	) -> Result<&Self, ConfigError> {
		self.update(true, |config| {
			config.create_with = Some(erase_factory(f));
			Ok(())
		})
	}

	/// Replaces member-by-member mapping with `f`. Hooks still run around it.
	pub fn map_whole(
		&self,
		f: impl 'static + Send + Sync + Fn(&S, &mut T) -> anyhow::Result<()>,
	) -> Result<&Self, ConfigError> {
		self.update(true, |config| {
			config.whole = Some(erase_hook(f));
			Ok(())
		})
	}

	/// Feeds target member `target` from source member `source`.
	pub fn bind_member(&self, target: &str, source: &str) -> Result<&Self, ConfigError> {
		self.bind(target, |me| Ok(Origin::Member(me.source_member(source)?)), None)
	}

	/// Feeds target member `target` from a function of the whole source.
	pub fn bind_with<V: Reflect>(
		&self,
		target: &str,
		f: impl 'static + Send + Sync + Fn(&S) -> anyhow::Result<V>,
	) -> Result<&Self, ConfigError> {
		self.bind(
			target,
			|_| {
				Ok(Origin::Function {
					output: TypeInfo::of::<V>(),
					func: erase_factory(f),
				})
			},
			None,
		)
	}

	/// Feeds target member `target` from source member `source` through `converter`, which then
	/// takes precedence over every other conversion.
	pub fn bind_converter(
		&self,
		target: &str,
		source: &str,
		converter: ValueConverter,
	) -> Result<&Self, ConfigError> {
		self.bind(
			target,
			|me| Ok(Origin::Member(me.source_member(source)?)),
			Some(converter),
		)
	}

	/// Feeds target member `target` with `converter` applied to the whole source.
	pub fn bind_source_converter(
		&self,
		target: &str,
		converter: ValueConverter,
	) -> Result<&Self, ConfigError> {
		self.bind(target, |_| Ok(Origin::WholeSource), Some(converter))
	}

	/// Leaves target member `target` untouched regardless of what conventions or earlier bindings
	/// say.
	pub fn ignore(&self, target: &str) -> Result<&Self, ConfigError> {
		self.update(true, |config| {
			let key = self.target_member(target)?.key();
			config.bindings.remove(&key);
			config.ignores.insert(key);
			Ok(())
		})
	}
}

// === Mapper === //

/// A cached handle to the compiled plan of one type pair. Cloning it is cheap.
#[derive_where(Clone)]
pub struct Mapper<S, T> {
	container: Arc<ContainerInner>,
	plan: Arc<TypeMapper>,
	compiled: Arc<CompiledPlan>,
	_ty: PhantomFn<S, T>,
}

impl<S, T> fmt::Debug for Mapper<S, T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Mapper")
			.field("container", &self.container.id())
			.field("plan", &self.compiled)
			.finish()
	}
}

impl<S: Reflect, T: Reflect> Mapper<S, T> {
	pub(crate) fn new(
		container: Arc<ContainerInner>,
		plan: Arc<TypeMapper>,
	) -> Result<Self, CompileError> {
		let compiled = plan.compiled()?.clone();

		Ok(Self {
			container,
			plan,
			compiled,
			_ty: std::marker::PhantomData,
		})
	}

	pub fn pair(&self) -> TypePair {
		self.plan.pair()
	}

	pub fn container_id(&self) -> ContainerId {
		self.container.id()
	}

	pub fn state(&self) -> PlanState {
		self.plan.state()
	}

	/// The number of member mappers in the compiled routine or `None` for non-shape pairs.
	pub fn member_count(&self) -> Option<usize> {
		self.compiled.member_count()
	}

	/// Whether both handles share the same compiled routine.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.compiled, &other.compiled)
	}

	/// Maps `source` into a newly created target.
	pub fn map(&self, source: &S) -> Result<T, MapError> {
		let target = self.compiled.map_new(source)?;

		target
			.downcast::<T>()
			.map(|target| *target)
			.map_err(|_| MapError::mismatch::<T>("producing a mapped value"))
	}

	/// Like [map](Self::map) but maps a missing source to a missing target without running any hook
	/// or creator.
	pub fn map_opt(&self, source: Option<&S>) -> Result<Option<T>, MapError> {
		source.map(|source| self.map(source)).transpose()
	}

	/// Maps `source` into an existing target.
	pub fn map_into(&self, source: &S, target: &mut T) -> Result<(), MapError> {
		self.compiled.map_into(source, target)
	}

	/// Like [map_into](Self::map_into) but does nothing if either side is missing.
	pub fn map_into_opt(&self, source: Option<&S>, target: Option<&mut T>) -> Result<(), MapError> {
		match (source, target) {
			(Some(source), Some(target)) => self.map_into(source, target),
			_ => Ok(()),
		}
	}

	/// Maps every element of `source` into a new sequence of the same length and order.
	pub fn map_sequence(&self, source: &[S]) -> Result<Vec<T>, MapError> {
		sequence::map_all(source, |item| self.map(item))
	}

	pub fn map_sequence_opt(&self, source: Option<&[S]>) -> Result<Option<Vec<T>>, MapError> {
		source.map(|source| self.map_sequence(source)).transpose()
	}

	/// Maps `source` into `target` element by element and returns the number of elements mapped.
	/// Sequences of different lengths are handled according to the container's
	/// [SequenceLengthPolicy](crate::SequenceLengthPolicy).
	pub fn map_sequence_into(&self, source: &[S], target: &mut [T]) -> Result<usize, MapError> {
		sequence::map_all_into(
			self.container.config().sequence_length,
			source,
			target,
			|from, to| self.map_into(from, to),
		)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;
	use crate::{
		config::{ContainerConfig, SequenceLengthPolicy},
		container::Container,
		member::{Shape, ShapeBuilder},
		reflect::TypeKind,
		shape,
	};

	#[derive(Debug, Clone, Default, PartialEq)]
	struct Person {
		name: String,
		age: i32,
	}

	shape!(Person: Default { name, age });

	#[derive(Debug, Clone, Default, PartialEq)]
	struct PersonDto {
		name: String,
		age: i64,
		nickname: String,
	}

	shape!(PersonDto: Default { name, age, nickname });

	fn ann() -> Person {
		Person {
			name: "ann".to_string(),
			age: 5,
		}
	}

	#[test]
	fn maps_same_names_and_leaves_the_rest_alone() {
		let container = Container::new();
		let dto: PersonDto = container.map(&ann()).unwrap();

		assert_eq!(
			dto,
			PersonDto {
				name: "ann".to_string(),
				age: 5,
				nickname: String::new(),
			}
		);
	}

	#[test]
	fn missing_sides_are_no_ops() {
		let container = Container::new();
		let calls = Arc::new(AtomicUsize::new(0));

		let counter = calls.clone();
		container
			.configure::<Person, PersonDto>()
			.unwrap()
			.before(move |_, _| {
				counter.fetch_add(1, Ordering::Relaxed);
				Ok(())
			})
			.unwrap();

		let mapper = container.mapper::<Person, PersonDto>().unwrap();
		assert_eq!(mapper.map_opt(None).unwrap(), None);

		let mut target = PersonDto::default();
		mapper.map_into_opt(None, Some(&mut target)).unwrap();
		mapper.map_into_opt(Some(&ann()), None).unwrap();
		assert_eq!(target, PersonDto::default());
		assert_eq!(calls.load(Ordering::Relaxed), 0);

		assert!(mapper.map_opt(Some(&ann())).unwrap().is_some());
		assert_eq!(calls.load(Ordering::Relaxed), 1);
	}

	#[test]
	fn attached_converter_beats_assignability() {
		let container = Container::new();
		container
			.configure::<Person, PersonDto>()
			.unwrap()
			.bind_converter(
				"name",
				"name",
				ValueConverter::new(|name: &String| name.to_uppercase()),
			)
			.unwrap();

		let dto: PersonDto = container.map(&ann()).unwrap();
		assert_eq!(dto.name, "ANN");
		assert_eq!(dto.age, 5);
	}

	#[test]
	fn bindings_and_ignores() {
		let container = Container::new();
		container
			.configure::<Person, PersonDto>()
			.unwrap()
			.bind_with("nickname", |p: &Person| Ok(format!("{}{}", p.name, p.age)))
			.unwrap()
			.ignore("age")
			.unwrap()
			.bind_source_converter(
				"name",
				ValueConverter::new(|p: &Person| format!("{} ({})", p.name, p.age)),
			)
			.unwrap();

		let dto: PersonDto = container.map(&ann()).unwrap();
		assert_eq!(dto.nickname, "ann5");
		assert_eq!(dto.name, "ann (5)");
		assert_eq!(dto.age, 0);
	}

	#[test]
	fn configuration_errors_are_immediate() {
		let container = Container::new();
		let builder = container.configure::<Person, PersonDto>().unwrap();

		assert!(matches!(
			builder.bind_member("", "name"),
			Err(ConfigError::EmptyMemberName)
		));
		assert!(matches!(
			builder.bind_member("name", "missing"),
			Err(ConfigError::MemberNotFound { name, .. }) if name == "missing"
		));
		assert!(matches!(
			builder.bind_converter("age", "age", ValueConverter::new(|v: &i32| *v as u8)),
			Err(ConfigError::ConverterMismatch { member: "age", .. })
		));

		let value_pair = container
			.configure::<Vec<Person>, Vec<PersonDto>>()
			.unwrap();
		assert!(matches!(
			value_pair.after(|_, _| Ok(())),
			Err(ConfigError::NotStructural { .. })
		));
		assert!(value_pair.options(MatchOptions::default()).is_ok());

		container.mapper::<Person, PersonDto>().unwrap();
		assert!(matches!(
			builder.ignore("age"),
			Err(ConfigError::PlanReadOnly { .. })
		));
		assert!(matches!(
			container.configure::<Person, PersonDto>(),
			Err(ConfigError::PlanReadOnly { .. })
		));
	}

	#[test]
	fn hooks_wrap_the_whole_object_override() {
		let container = Container::new();
		container
			.configure::<Person, PersonDto>()
			.unwrap()
			.before(|_, dto| {
				dto.nickname.push_str("before;");
				Ok(())
			})
			.unwrap()
			.map_whole(|p, dto| {
				dto.nickname.push_str("whole;");
				dto.age = i64::from(p.age) * 10;
				Ok(())
			})
			.unwrap()
			.after(|_, dto| {
				dto.nickname.push_str("after");
				Ok(())
			})
			.unwrap();

		let dto: PersonDto = container.map(&ann()).unwrap();
		assert_eq!(dto.nickname, "before;whole;after");
		assert_eq!(dto.age, 50);
		assert_eq!(dto.name, "");
	}

	#[test]
	fn hook_errors_propagate_untouched() {
		let container = Container::new();
		container
			.configure::<Person, PersonDto>()
			.unwrap()
			.after(|p, _| anyhow::bail!("rejected {}", p.name))
			.unwrap();

		let err = container.map::<Person, PersonDto>(&ann()).unwrap_err();
		assert!(matches!(&err, MapError::User(_)));
		assert_eq!(err.to_string(), "rejected ann");
	}

	// === Creation === //

	#[derive(Debug, Clone, PartialEq)]
	struct Badge {
		name: String,
		issued: u32,
	}

	shape!(Badge { name, issued });

	#[test]
	fn compile_failures_are_cached() {
		let container = Container::new();

		let first = container.mapper::<Person, Badge>().unwrap_err();
		let second = container.mapper::<Person, Badge>().unwrap_err();
		assert!(matches!(first, CompileError::NoDefaultConstructor { .. }));
		assert_eq!(first.to_string(), second.to_string());
		assert_eq!(container.plan_state::<Person, Badge>(), PlanState::Failed);
		assert!(matches!(
			container.configure::<Person, Badge>(),
			Err(ConfigError::PlanReadOnly { .. })
		));
	}

	#[test]
	fn creators_take_the_source() {
		let container = Container::new();
		container
			.configure::<Person, Badge>()
			.unwrap()
			.create_with(|p| {
				Ok(Badge {
					name: String::new(),
					issued: p.age as u32 + 100,
				})
			})
			.unwrap();

		let badge: Badge = container.map(&ann()).unwrap();
		assert_eq!(
			badge,
			Badge {
				name: "ann".to_string(),
				issued: 105,
			}
		);
	}

	#[test]
	fn registered_creators_dispatch_on_the_runtime_source() {
		let container = Container::new();
		container
			.register_creator(|source: &dyn Any| {
				let issued = match source.downcast_ref::<Person>() {
					Some(person) => person.age as u32,
					None => 0,
				};
				Ok(Badge {
					name: String::new(),
					issued,
				})
			})
			.unwrap();

		let badge: Badge = container.map(&ann()).unwrap();
		assert_eq!(badge.issued, 5);

		let badge: Badge = container
			.map(&PersonDto {
				name: "dto".to_string(),
				..PersonDto::default()
			})
			.unwrap();
		assert_eq!(badge.issued, 0);
		assert_eq!(badge.name, "dto");
	}

	// === Hierarchy === //

	#[derive(Debug, Clone, Default, PartialEq)]
	struct Inner {
		value: i32,
	}

	shape!(Inner: Default { value });

	#[derive(Debug, Clone, Default, PartialEq)]
	struct InnerDto {
		value: i64,
		tag: String,
	}

	shape!(InnerDto: Default { value, tag });

	#[derive(Debug, Clone, Default)]
	struct Outer {
		inner: Option<Box<Inner>>,
	}

	shape!(Outer: Default { inner });

	#[derive(Debug, Clone, Default)]
	struct OuterDto {
		inner: Option<Box<InnerDto>>,
	}

	shape!(OuterDto: Default { inner });

	fn hierarchical(container: &Container) {
		container
			.configure::<Outer, OuterDto>()
			.unwrap()
			.options(MatchOptions {
				hierarchy: true,
				..MatchOptions::default()
			})
			.unwrap();
	}

	#[test]
	fn nested_shapes_need_hierarchy_mode() {
		let container = Container::new();
		let source = Outer {
			inner: Some(Box::new(Inner { value: 3 })),
		};

		let dto: OuterDto = container.map(&source).unwrap();
		assert!(dto.inner.is_none());
	}

	#[test]
	fn existing_nested_targets_are_merged() {
		let container = Container::new();
		hierarchical(&container);

		let source = Outer {
			inner: Some(Box::new(Inner { value: 3 })),
		};

		let mut target = OuterDto {
			inner: Some(Box::new(InnerDto {
				value: 0,
				tag: "keep".to_string(),
			})),
		};
		let before = target.inner.as_deref().map(|v| v as *const InnerDto);

		container.map_into(&source, &mut target).unwrap();

		let after = target.inner.as_deref().map(|v| v as *const InnerDto);
		assert_eq!(before, after);
		assert_eq!(
			target.inner.as_deref(),
			Some(&InnerDto {
				value: 3,
				tag: "keep".to_string(),
			})
		);
	}

	#[derive(Debug, Clone, Default)]
	struct Holder {
		inner: Inner,
	}

	shape!(Holder: Default { inner });

	#[derive(Debug, Clone, Default)]
	struct HolderDto {
		inner: InnerDto,
	}

	shape!(HolderDto: Default { inner });

	#[test]
	fn plain_nested_fields_are_merged() {
		let container = Container::new();
		container
			.configure::<Holder, HolderDto>()
			.unwrap()
			.options(MatchOptions {
				hierarchy: true,
				..MatchOptions::default()
			})
			.unwrap();

		let source = Holder {
			inner: Inner { value: 3 },
		};

		let mut target = HolderDto {
			inner: InnerDto {
				value: 0,
				tag: "keep".to_string(),
			},
		};
		container.map_into(&source, &mut target).unwrap();
		assert_eq!(
			target.inner,
			InnerDto {
				value: 3,
				tag: "keep".to_string(),
			}
		);

		let fresh: HolderDto = container.map(&source).unwrap();
		assert_eq!(fresh.inner.value, 3);
		assert_eq!(fresh.inner.tag, "");
	}

	#[derive(Debug, Clone, Default)]
	struct Top {
		mid: Holder,
	}

	shape!(Top: Default { mid });

	#[derive(Debug, Clone, Default)]
	struct TopDto {
		mid: HolderDto,
	}

	shape!(TopDto: Default { mid });

	#[test]
	fn hierarchy_mode_stays_with_its_pair() {
		let source = Top {
			mid: Holder {
				inner: Inner { value: 5 },
			},
		};

		let per_pair = Container::new();
		per_pair
			.configure::<Top, TopDto>()
			.unwrap()
			.options(MatchOptions {
				hierarchy: true,
				..MatchOptions::default()
			})
			.unwrap();
		let dto: TopDto = per_pair.map(&source).unwrap();
		assert_eq!(dto.mid.inner.value, 0);

		let everywhere = Container::with_config(ContainerConfig {
			default_options: MatchOptions {
				hierarchy: true,
				..MatchOptions::default()
			},
			..ContainerConfig::default()
		});
		let dto: TopDto = everywhere.map(&source).unwrap();
		assert_eq!(dto.mid.inner.value, 5);
	}

	#[test]
	fn missing_nested_targets_are_allocated_and_null_sources_clear() {
		let container = Container::new();
		hierarchical(&container);

		let mut target = OuterDto::default();
		container
			.map_into(
				&Outer {
					inner: Some(Box::new(Inner { value: 8 })),
				},
				&mut target,
			)
			.unwrap();
		assert_eq!(target.inner.as_ref().map(|v| v.value), Some(8));

		container
			.map_into(&Outer { inner: None }, &mut target)
			.unwrap();
		assert!(target.inner.is_none());
	}

	#[derive(Debug, Clone)]
	struct Node {
		value: i32,
		next: Option<Box<Node>>,
	}

	impl Reflect for Node {
		fn kind() -> TypeKind {
			TypeKind::shape::<Self>()
		}

		fn instantiate() -> Option<Self> {
			Some(Node {
				value: 0,
				next: None,
			})
		}
	}

	impl Shape for Node {
		fn describe(shape: &mut ShapeBuilder<Self>) {
			shape.field("value", |n| &n.value, |n| &mut n.value);
			shape.field("next", |n| &n.next, |n| &mut n.next);
		}
	}

	#[derive(Debug, Clone, Default, PartialEq)]
	struct NodeDto {
		value: i64,
		next: Option<Box<NodeDto>>,
	}

	shape!(NodeDto: Default { value, next });

	#[test]
	fn self_referential_shapes_compile_once() {
		let container = Container::with_config(ContainerConfig {
			default_options: MatchOptions {
				hierarchy: true,
				..MatchOptions::default()
			},
			..ContainerConfig::default()
		});

		let list = (1..=3).rev().fold(None, |next, value| {
			Some(Box::new(Node { value, next }))
		});
		let Some(head) = list else {
			unreachable!();
		};

		let dto: NodeDto = container.map(&*head).unwrap();
		let mut values = Vec::new();
		let mut cursor = Some(&dto);
		while let Some(node) = cursor {
			values.push(node.value);
			cursor = node.next.as_deref();
		}

		assert_eq!(values, [1, 2, 3]);
		assert_eq!(container.compiled_plan_count(), 1);
	}

	// === Sequences === //

	#[derive(Debug, Clone, Default)]
	struct Team {
		members: Vec<Person>,
	}

	shape!(Team: Default { members });

	#[derive(Debug, Clone, Default)]
	struct TeamDto {
		members: Vec<PersonDto>,
	}

	shape!(TeamDto: Default { members });

	fn people(n: usize) -> Vec<Person> {
		(0..n)
			.map(|i| Person {
				name: format!("p{i}"),
				age: i as i32,
			})
			.collect()
	}

	#[test]
	fn sequences_keep_order_and_length() {
		let container = Container::new();
		let source = people(3);

		let mapped: Vec<PersonDto> = container.map_sequence(&source).unwrap();
		let names = mapped.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
		assert_eq!(names, ["p0", "p1", "p2"]);

		let whole: Vec<PersonDto> = container.map(&source).unwrap();
		assert_eq!(whole, mapped);

		assert_eq!(
			container
				.map_sequence_opt::<Person, PersonDto>(None)
				.unwrap(),
			None
		);
	}

	#[test]
	fn sequence_members_map_element_wise() {
		let container = Container::new();
		container
			.configure::<Team, TeamDto>()
			.unwrap()
			.options(MatchOptions {
				hierarchy: true,
				..MatchOptions::default()
			})
			.unwrap();

		let dto: TeamDto = container.map(&Team { members: people(2) }).unwrap();
		assert_eq!(dto.members.len(), 2);
		assert_eq!(dto.members[1].age, 1);
	}

	#[test]
	fn sequence_length_policy() {
		let lenient = Container::new();
		let mut target = vec![PersonDto::default(); 2];
		let n = lenient
			.map_sequence_into(&people(3), &mut target)
			.unwrap();
		assert_eq!(n, 2);
		assert_eq!(target[1].name, "p1");

		let strict = Container::with_config(ContainerConfig {
			sequence_length: SequenceLengthPolicy::Strict,
			..ContainerConfig::default()
		});
		let mut target = vec![PersonDto::default(); 2];
		assert!(matches!(
			strict.map_sequence_into(&people(3), &mut target),
			Err(MapError::LengthMismatch {
				source_len: 3,
				target_len: 2
			})
		));
		assert_eq!(target[0], PersonDto::default());
	}

	// === Accessors === //

	#[derive(Debug, Clone, Default)]
	struct Account {
		id: u32,
		owner: String,
	}

	impl Reflect for Account {
		fn kind() -> TypeKind {
			TypeKind::shape::<Self>()
		}

		fn instantiate() -> Option<Self> {
			Some(Self::default())
		}
	}

	impl Shape for Account {
		fn describe(shape: &mut ShapeBuilder<Self>) {
			shape.field("id", |a| &a.id, |a| &mut a.id).private();
			shape.accessor(
				"owner",
				|a: &Account| a.owner.clone(),
				|a: &mut Account, owner: String| a.owner = owner.trim().to_string(),
			);
			shape.getter("display", |a: &Account| format!("#{} {}", a.id, a.owner));
		}
	}

	#[derive(Debug, Clone, Default, PartialEq)]
	struct AccountDto {
		id: u32,
		owner: String,
		display: String,
	}

	shape!(AccountDto: Default { id, owner, display });

	#[test]
	fn accessors_and_visibility() {
		let container = Container::new();
		let account = Account {
			id: 7,
			owner: "bo".to_string(),
		};

		let dto: AccountDto = container.map(&account).unwrap();
		assert_eq!(
			dto,
			AccountDto {
				id: 0,
				owner: "bo".to_string(),
				display: "#7 bo".to_string(),
			}
		);

		let back: Account = container
			.map(&AccountDto {
				id: 9,
				owner: "  cy ".to_string(),
				display: String::new(),
			})
			.unwrap();
		assert_eq!(back.owner, "cy");
		assert_eq!(back.id, 0);

		let open = Container::new();
		open.configure::<Account, AccountDto>()
			.unwrap()
			.options(MatchOptions {
				include_non_public: true,
				..MatchOptions::default()
			})
			.unwrap();
		assert_eq!(open.map::<Account, AccountDto>(&account).unwrap().id, 7);
	}
}
