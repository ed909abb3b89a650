use std::{
	any::Any,
	fmt,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, OnceLock,
	},
};

use log::debug;
use parking_lot::Mutex;
use remap_util::mem::hash::{new_fx_dash_map, FxDashMap};

use crate::{
	config::ContainerConfig,
	convention::{Convention, NameMatching},
	convert::{ConverterRegistry, PrimitiveWidening, ScalarCoercion, ValueConverter},
	create::CreatorRegistry,
	error::{CompileError, ConfigError, MapError},
	plan::{Mapper, PlanBuilder, PlanState, TypeMapper},
	reflect::{Reflect, TypeInfo, TypePair},
};

// === Registrations === //

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ConventionId(u64);

/// Everything registered on a container. Frozen into an `Arc` when the container is sealed.
pub(crate) struct Registrations {
	pub conventions: Vec<(ConventionId, Arc<dyn Convention>)>,
	pub converters: ConverterRegistry,
	pub coercions: Vec<Arc<dyn ScalarCoercion>>,
	pub creators: CreatorRegistry,
	next_convention: u64,
}

impl Default for Registrations {
	fn default() -> Self {
		let mut registrations = Self {
			conventions: Vec::new(),
			converters: ConverterRegistry::default(),
			coercions: vec![Arc::new(PrimitiveWidening)],
			creators: CreatorRegistry::default(),
			next_convention: 0,
		};
		registrations.push_convention(Arc::new(NameMatching));
		registrations
	}
}

impl Registrations {
	fn push_convention(&mut self, convention: Arc<dyn Convention>) -> ConventionId {
		let id = ConventionId(self.next_convention);
		self.next_convention += 1;
		self.conventions.push((id, convention));
		id
	}
}

// === Container === //

/// Identifies a container. Never reused within a process.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ContainerId(u64);

impl fmt::Display for ContainerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "container#{}", self.0)
	}
}

pub(crate) struct ContainerInner {
	id: ContainerId,
	config: ContainerConfig,
	/// `None` once sealed.
	pending: Mutex<Option<Registrations>>,
	sealed: OnceLock<Arc<Registrations>>,
	plans: FxDashMap<TypePair, Arc<TypeMapper>>,
}

impl ContainerInner {
	pub(crate) fn id(&self) -> ContainerId {
		self.id
	}

	pub(crate) fn config(&self) -> &ContainerConfig {
		&self.config
	}

	/// Freezes the registrations. Idempotent.
	pub(crate) fn seal(&self) -> Arc<Registrations> {
		self.sealed
			.get_or_init(|| {
				debug!("sealing {}", self.id);
				Arc::new(self.pending.lock().take().unwrap_or_default())
			})
			.clone()
	}

	/// Fetches the plan cell for `pair`, creating it if this is the pair's first request.
	pub(crate) fn plan(self: &Arc<Self>, pair: TypePair) -> Arc<TypeMapper> {
		if let Some(plan) = self.plans.get(&pair) {
			return plan.value().clone();
		}

		let plan = self
			.plans
			.entry(pair)
			.or_insert_with(|| Arc::new(TypeMapper::new(pair, Arc::downgrade(self))))
			.value()
			.clone();
		plan
	}

	fn mutate<R>(
		&self,
		what: &'static str,
		f: impl FnOnce(&mut Registrations) -> R,
	) -> Result<R, ConfigError> {
		match &mut *self.pending.lock() {
			Some(registrations) => Ok(f(registrations)),
			None => Err(ConfigError::Sealed { what }),
		}
	}
}

/// Owns the conventions, converters, coercions and creators used to build mapping plans, along
/// with the plans themselves.
///
/// Registration is only possible until the container is sealed, which happens on the first
/// compilation or through [seal](Self::seal). Plans are cached per container: two containers never
/// share a compiled routine, even for identically configured pairs. Cloning a container yields
/// another handle to the same one.
#[derive(Clone)]
pub struct Container {
	inner: Arc<ContainerInner>,
}

impl fmt::Debug for Container {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Container")
			.field("id", &self.inner.id)
			.field("sealed", &self.is_sealed())
			.field("plans", &self.inner.plans.len())
			.finish()
	}
}

impl Default for Container {
	fn default() -> Self {
		Self::new()
	}
}

impl Container {
	pub fn new() -> Self {
		Self::with_config(ContainerConfig::default())
	}

	pub fn with_config(config: ContainerConfig) -> Self {
		static NEXT_ID: AtomicU64 = AtomicU64::new(0);

		Self {
			inner: Arc::new(ContainerInner {
				id: ContainerId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
				config,
				pending: Mutex::new(Some(Registrations::default())),
				sealed: OnceLock::new(),
				plans: new_fx_dash_map(),
			}),
		}
	}

	pub fn id(&self) -> ContainerId {
		self.inner.id
	}

	pub fn config(&self) -> &ContainerConfig {
		&self.inner.config
	}

	/// Freezes every registration list. Later registrations fail with [ConfigError::Sealed].
	pub fn seal(&self) {
		self.inner.seal();
	}

	pub fn is_sealed(&self) -> bool {
		self.inner.sealed.get().is_some()
	}

	// === Registration === //

	/// Appends a convention. Conventions run in registration order after the built-in
	/// [NameMatching] convention.
	pub fn add_convention(&self, convention: impl Convention) -> Result<ConventionId, ConfigError> {
		self.inner.mutate("the convention list", |r| {
			r.push_convention(Arc::new(convention))
		})
	}

	pub fn remove_convention(&self, id: ConventionId) -> Result<bool, ConfigError> {
		self.inner.mutate("the convention list", |r| {
			let before = r.conventions.len();
			r.conventions.retain(|(other, _)| *other != id);
			r.conventions.len() != before
		})
	}

	/// Removes every convention, including the built-in one.
	pub fn clear_conventions(&self) -> Result<(), ConfigError> {
		self.inner
			.mutate("the convention list", |r| r.conventions.clear())
	}

	pub fn add_converter<S: Reflect, T: Reflect>(
		&self,
		f: impl 'static + Send + Sync + Fn(&S) -> T,
	) -> Result<(), ConfigError> {
		self.insert_converter(ValueConverter::new(f))
	}

	pub fn add_fallible_converter<S: Reflect, T: Reflect>(
		&self,
		f: impl 'static + Send + Sync + Fn(&S) -> anyhow::Result<T>,
	) -> Result<(), ConfigError> {
		self.insert_converter(ValueConverter::fallible(f))
	}

	/// Registers a prebuilt converter, replacing any converter for the same pair.
	pub fn insert_converter(&self, converter: ValueConverter) -> Result<(), ConfigError> {
		self.inner.mutate("the converter registry", |r| {
			r.converters.insert(converter);
		})
	}

	pub fn remove_converter<S: Reflect, T: Reflect>(&self) -> Result<bool, ConfigError> {
		self.inner.mutate("the converter registry", |r| {
			r.converters
				.remove(TypeInfo::of::<S>(), TypeInfo::of::<T>())
				.is_some()
		})
	}

	pub fn add_coercion(&self, coercion: impl 'static + ScalarCoercion) -> Result<(), ConfigError> {
		self.inner.mutate("the coercion list", |r| {
			r.coercions.push(Arc::new(coercion));
		})
	}

	/// Registers the creator used for every plan targeting `T` that has no creator of its own. The
	/// creator receives the source of whatever pair is being mapped.
	pub fn register_creator<T: Reflect>(
		&self,
		f: impl 'static + Send + Sync + Fn(&dyn Any) -> anyhow::Result<T>,
	) -> Result<(), ConfigError> {
		self.inner
			.mutate("the creator registry", |r| r.creators.register(f))
	}

	/// Opens the plan of `(S, T)` for configuration.
	pub fn configure<S: Reflect, T: Reflect>(&self) -> Result<PlanBuilder<S, T>, ConfigError> {
		let plan = self.inner.plan(TypePair::of::<S, T>());

		if plan.is_read_only() {
			return Err(ConfigError::PlanReadOnly { pair: plan.pair() });
		}

		Ok(PlanBuilder::new(plan))
	}

	// === Invocation === //

	/// Fetches the cached handle of `(S, T)`, compiling its plan on first use.
	pub fn mapper<S: Reflect, T: Reflect>(&self) -> Result<Mapper<S, T>, CompileError> {
		let plan = self.inner.plan(TypePair::of::<S, T>());
		Mapper::new(self.inner.clone(), plan)
	}

	pub fn map<S: Reflect, T: Reflect>(&self, source: &S) -> Result<T, MapError> {
		self.mapper::<S, T>()?.map(source)
	}

	pub fn map_opt<S: Reflect, T: Reflect>(
		&self,
		source: Option<&S>,
	) -> Result<Option<T>, MapError> {
		self.mapper::<S, T>()?.map_opt(source)
	}

	pub fn map_into<S: Reflect, T: Reflect>(
		&self,
		source: &S,
		target: &mut T,
	) -> Result<(), MapError> {
		self.mapper::<S, T>()?.map_into(source, target)
	}

	pub fn map_into_opt<S: Reflect, T: Reflect>(
		&self,
		source: Option<&S>,
		target: Option<&mut T>,
	) -> Result<(), MapError> {
		self.mapper::<S, T>()?.map_into_opt(source, target)
	}

	pub fn map_sequence<S: Reflect, T: Reflect>(&self, source: &[S]) -> Result<Vec<T>, MapError> {
		self.mapper::<S, T>()?.map_sequence(source)
	}

	pub fn map_sequence_opt<S: Reflect, T: Reflect>(
		&self,
		source: Option<&[S]>,
	) -> Result<Option<Vec<T>>, MapError> {
		self.mapper::<S, T>()?.map_sequence_opt(source)
	}

	pub fn map_sequence_into<S: Reflect, T: Reflect>(
		&self,
		source: &[S],
		target: &mut [T],
	) -> Result<usize, MapError> {
		self.mapper::<S, T>()?.map_sequence_into(source, target)
	}

	// === Introspection === //

	/// The lifecycle state of the plan of `(S, T)`, without creating it.
	pub fn plan_state<S: Reflect, T: Reflect>(&self) -> PlanState {
		self.inner
			.plans
			.get(&TypePair::of::<S, T>())
			.map_or(PlanState::Uninitialized, |plan| plan.state())
	}

	/// The number of plans which compiled successfully.
	pub fn compiled_plan_count(&self) -> usize {
		self.inner
			.plans
			.iter()
			.filter(|plan| plan.state() == PlanState::Ready)
			.count()
	}
}
