//! Strategies for producing the target instance a plan maps into.

use std::{any::Any, fmt, sync::Arc};

use remap_util::{debug::type_id::NamedTypeId, mem::hash::FxHashMap};

use crate::{
	error::{CompileError, MapError},
	reflect::{DynValue, Reflect, TypeInfo},
};

/// An erased factory receiving the whole source value.
pub type CreateFn = dyn Fn(&dyn Any) -> Result<DynValue, MapError> + Send + Sync;

pub(crate) fn erase_factory<S, T>(
	f: impl 'static + Send + Sync + Fn(&S) -> anyhow::Result<T>,
) -> Arc<CreateFn>
where
	S: Reflect,
	T: Reflect,
{
	Arc::new(move |source: &dyn Any| -> Result<DynValue, MapError> {
		let source = source
			.downcast_ref::<S>()
			.ok_or_else(|| MapError::mismatch::<S>("creating a target instance"))?;

		f(source)
			.map(|target| Box::new(target) as DynValue)
			.map_err(MapError::User)
	})
}

/// Creators registered on a container by target type. A registered creator sees the source as a
/// `dyn Any` and may therefore pick its output based on the source's runtime type.
#[derive(Clone, Default)]
pub struct CreatorRegistry {
	creators: FxHashMap<NamedTypeId, Arc<CreateFn>>,
}

impl fmt::Debug for CreatorRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.creators.keys()).finish()
	}
}

impl CreatorRegistry {
	pub fn register<T: Reflect>(
		&mut self,
		f: impl 'static + Send + Sync + Fn(&dyn Any) -> anyhow::Result<T>,
	) {
		self.creators.insert(
			NamedTypeId::of::<T>(),
			Arc::new(move |source: &dyn Any| -> Result<DynValue, MapError> {
				f(source)
					.map(|target| Box::new(target) as DynValue)
					.map_err(MapError::User)
			}),
		);
	}

	pub fn get(&self, target: TypeInfo) -> Option<&Arc<CreateFn>> {
		self.creators.get(&target.id())
	}
}

/// The single creation strategy a compiled plan uses.
#[derive(Clone)]
pub enum InstanceCreator {
	/// `Reflect::instantiate` of the target type.
	Default(TypeInfo),

	/// A factory supplied for this one type pair.
	Factory(Arc<CreateFn>),

	/// A factory registered on the container for the target type.
	Registered(Arc<CreateFn>),
}

impl fmt::Debug for InstanceCreator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Default(ty) => f.debug_tuple("Default").field(ty).finish(),
			Self::Factory(_) => f.write_str("Factory"),
			Self::Registered(_) => f.write_str("Registered"),
		}
	}
}

impl InstanceCreator {
	/// Picks the strategy for `target`: the pair's own factory, then the container's creator for
	/// the target type, then the default instance.
	pub(crate) fn resolve(
		target: TypeInfo,
		factory: Option<&Arc<CreateFn>>,
		registry: &CreatorRegistry,
	) -> Result<Self, CompileError> {
		if let Some(factory) = factory {
			return Ok(Self::Factory(factory.clone()));
		}

		if let Some(registered) = registry.get(target) {
			return Ok(Self::Registered(registered.clone()));
		}

		if target.instantiate().is_some() {
			return Ok(Self::Default(target));
		}

		Err(CompileError::NoDefaultConstructor { ty: target.id() })
	}

	pub fn create(&self, source: &dyn Any) -> Result<DynValue, MapError> {
		match self {
			Self::Default(ty) => ty
				.instantiate()
				.ok_or(MapError::Compile(CompileError::NoDefaultConstructor { ty: ty.id() })),
			Self::Factory(f) | Self::Registered(f) => f(source),
		}
	}
}
