//! Per-member execution units: fetch a value, convert or recurse, and store it.

use std::{
	any::Any,
	fmt,
	sync::{Arc, Weak},
};

use crate::{
	config::SequenceLengthPolicy,
	container::{ContainerInner, Registrations},
	convention::{Correspondence, Origin, SourceFn},
	convert::{ScalarCoercion, ValueConverter},
	error::MapError,
	member::{Member, MemberValue},
	plan::TypeMapper,
	reflect::{DynValue, SequenceOps, TypeInfo, TypeKind, TypePair, WrapperOps},
	sequence,
};

// === ValueConversion === //

/// A resolved way of turning a value of one type into a value of another.
#[derive(Clone)]
pub(crate) enum ValueConversion {
	/// Identical types; the value is cloned.
	Copy(TypeInfo),

	/// A scalar coercion such as primitive widening.
	Coerce {
		coercion: Arc<dyn ScalarCoercion>,
		from: TypeInfo,
		to: TypeInfo,
	},

	/// A registered or explicitly attached converter.
	Convert(ValueConverter),

	/// Structural mapping through the plan of a nested shape pair. The plan is only compiled once
	/// the conversion first runs.
	Hierarchy {
		link: Weak<TypeMapper>,
		target: TypeInfo,
	},

	/// `Option`/`Box` on both sides.
	Wrapped {
		from: WrapperOps,
		to: WrapperOps,
		target: TypeInfo,
		inner: Box<ValueConversion>,
	},

	/// A plain value into an `Option`/`Box`.
	Lift {
		to: WrapperOps,
		target: TypeInfo,
		inner: Box<ValueConversion>,
	},

	/// A `Box` into a plain value.
	Unwrap {
		from: WrapperOps,
		inner: Box<ValueConversion>,
	},

	/// Element-wise conversion between sequences.
	Sequence {
		from: SequenceOps,
		to: SequenceOps,
		target: TypeInfo,
		element: Box<ValueConversion>,
		policy: SequenceLengthPolicy,
	},
}

impl fmt::Debug for ValueConversion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Copy(ty) => f.debug_tuple("Copy").field(ty).finish(),
			Self::Coerce { from, to, .. } => write!(f, "Coerce({from} -> {to})"),
			Self::Convert(converter) => fmt::Debug::fmt(converter, f),
			Self::Hierarchy { target, .. } => f.debug_tuple("Hierarchy").field(target).finish(),
			Self::Wrapped { inner, .. } => f.debug_tuple("Wrapped").field(inner).finish(),
			Self::Lift { inner, .. } => f.debug_tuple("Lift").field(inner).finish(),
			Self::Unwrap { inner, .. } => f.debug_tuple("Unwrap").field(inner).finish(),
			Self::Sequence { element, .. } => f.debug_tuple("Sequence").field(element).finish(),
		}
	}
}

fn store(ty: TypeInfo, slot: &mut dyn Any, value: DynValue) -> Result<(), MapError> {
	ty.assign(slot, value)
		.map_err(|_| MapError::mismatch_of(ty.id(), "storing a converted value"))
}

fn wrap_converted(
	to: WrapperOps,
	inner: &ValueConversion,
	value: &dyn Any,
) -> Result<DynValue, MapError> {
	(to.wrap)(inner.convert(value)?)
		.map_err(|_| MapError::mismatch_of(to.inner.id(), "wrapping a value"))
}

fn linked_plan(link: &Weak<TypeMapper>) -> Result<Arc<TypeMapper>, MapError> {
	link.upgrade().ok_or(MapError::ContainerDropped)
}

impl ValueConversion {
	pub(crate) fn target(&self) -> TypeInfo {
		match self {
			Self::Copy(ty) => *ty,
			Self::Coerce { to, .. } => *to,
			Self::Convert(converter) => converter.to_type(),
			Self::Hierarchy { target, .. }
			| Self::Wrapped { target, .. }
			| Self::Lift { target, .. }
			| Self::Sequence { target, .. } => *target,
			Self::Unwrap { inner, .. } => inner.target(),
		}
	}

	/// Whether a member using this conversion should be updated in place rather than overwritten.
	/// This holds for nested shapes and for reference-shaped targets, whose existing contents are
	/// reused when present.
	pub(crate) fn merges_in_place(&self) -> bool {
		match self {
			Self::Hierarchy { .. } | Self::Wrapped { .. } | Self::Lift { .. } => true,
			Self::Unwrap { inner, .. } => inner.merges_in_place(),
			_ => false,
		}
	}

	/// Produces a fresh target value.
	pub(crate) fn convert(&self, value: &dyn Any) -> Result<DynValue, MapError> {
		match self {
			Self::Copy(ty) => ty
				.clone_value(value)
				.ok_or_else(|| MapError::mismatch_of(ty.id(), "copying a value")),
			Self::Coerce { coercion, from, to } => coercion
				.coerce(value, *from, *to)
				.ok_or_else(|| MapError::mismatch_of(from.id(), "coercing a value")),
			Self::Convert(converter) => converter.convert(value),
			Self::Hierarchy { link, .. } => linked_plan(link)?.compiled()?.map_new(value),
			Self::Wrapped { from, to, inner, .. } => match (from.get)(value) {
				Some(value) => wrap_converted(*to, inner, value),
				None => to
					.empty
					.map(|empty| empty())
					.ok_or_else(|| MapError::mismatch_of(from.inner.id(), "unwrapping a value")),
			},
			Self::Lift { to, inner, .. } => wrap_converted(*to, inner, value),
			Self::Unwrap { from, inner } => {
				let value = (from.get)(value)
					.ok_or_else(|| MapError::mismatch_of(from.inner.id(), "unwrapping a value"))?;
				inner.convert(value)
			}
			Self::Sequence {
				from, to, element, ..
			} => {
				let len = (from.len)(value)
					.ok_or_else(|| MapError::mismatch_of(from.element.id(), "reading a sequence"))?;

				let mut out = Vec::with_capacity(len);
				for i in 0..len {
					let item = (from.get)(value, i).ok_or_else(|| {
						MapError::mismatch_of(from.element.id(), "reading a sequence")
					})?;
					out.push(element.convert(item)?);
				}

				(to.collect)(out)
					.map_err(|_| MapError::mismatch_of(to.element.id(), "collecting a sequence"))
			}
		}
	}

	/// Maps `value` into an existing target value.
	///
	/// Nested shapes are mapped into through their plan, non-empty wrappers are recursed into and
	/// sequences are updated element-wise. A null source empties a nullable target. Everything else
	/// is overwritten with a freshly converted value.
	pub(crate) fn merge(&self, value: &dyn Any, slot: &mut dyn Any) -> Result<(), MapError> {
		match self {
			Self::Hierarchy { link, .. } => linked_plan(link)?.compiled()?.map_into(value, slot),
			Self::Wrapped {
				from,
				to,
				target,
				inner,
			} => match (from.get)(value) {
				Some(value) => match (to.get_mut)(slot) {
					Some(existing) => inner.merge(value, existing),
					None => store(*target, slot, wrap_converted(*to, inner, value)?),
				},
				None => match to.empty {
					Some(empty) => store(*target, slot, empty()),
					None => Err(MapError::mismatch_of(from.inner.id(), "unwrapping a value")),
				},
			},
			Self::Lift { to, target, inner } => match (to.get_mut)(slot) {
				Some(existing) => inner.merge(value, existing),
				None => store(*target, slot, wrap_converted(*to, inner, value)?),
			},
			Self::Unwrap { from, inner } => {
				let value = (from.get)(value)
					.ok_or_else(|| MapError::mismatch_of(from.inner.id(), "unwrapping a value"))?;
				inner.merge(value, slot)
			}
			Self::Sequence {
				from,
				to,
				element,
				policy,
				..
			} => {
				let source_len = (from.len)(value)
					.ok_or_else(|| MapError::mismatch_of(from.element.id(), "reading a sequence"))?;
				let target_len = (to.len)(slot)
					.ok_or_else(|| MapError::mismatch_of(to.element.id(), "updating a sequence"))?;
				let len = sequence::lockstep_len(*policy, source_len, target_len)?;

				for i in 0..len {
					let item = (from.get)(value, i).ok_or_else(|| {
						MapError::mismatch_of(from.element.id(), "reading a sequence")
					})?;
					let existing = (to.get_mut)(slot, i).ok_or_else(|| {
						MapError::mismatch_of(to.element.id(), "updating a sequence")
					})?;
					element.merge(item, existing)?;
				}
				Ok(())
			}
			Self::Copy(_) | Self::Coerce { .. } | Self::Convert(_) => {
				store(self.target(), slot, self.convert(value)?)
			}
		}
	}
}

// === Resolver === //

/// Resolves value conversions against a container's sealed registrations.
pub(crate) struct Resolver<'a> {
	pub container: &'a Arc<ContainerInner>,
	pub registrations: &'a Registrations,
}

impl Resolver<'_> {
	/// Finds the conversion from `from` to `to`, trying in order: identical types, scalar
	/// coercions, registered converters and finally the structural forms. Nested shapes are only
	/// linked when `hierarchy` is set.
	pub(crate) fn resolve(
		&self,
		from: TypeInfo,
		to: TypeInfo,
		hierarchy: bool,
	) -> Option<ValueConversion> {
		if from == to {
			return Some(ValueConversion::Copy(to));
		}

		if let Some(coercion) = self
			.registrations
			.coercions
			.iter()
			.find(|c| c.can_coerce(from, to))
		{
			return Some(ValueConversion::Coerce {
				coercion: coercion.clone(),
				from,
				to,
			});
		}

		if let Some(converter) = self.registrations.converters.get(from, to) {
			return Some(ValueConversion::Convert(converter.clone()));
		}

		let conversion = match (from.kind(), to.kind()) {
			(TypeKind::Shape(_), TypeKind::Shape(_)) => {
				if !hierarchy {
					return None;
				}

				let plan = self.container.plan(TypePair::new(from, to));
				ValueConversion::Hierarchy {
					link: Arc::downgrade(&plan),
					target: to,
				}
			}
			(TypeKind::Nullable(f), TypeKind::Nullable(t))
			| (TypeKind::Boxed(f), TypeKind::Boxed(t))
			| (TypeKind::Boxed(f), TypeKind::Nullable(t)) => ValueConversion::Wrapped {
				from: f,
				to: t,
				target: to,
				inner: Box::new(self.resolve(f.inner, t.inner, hierarchy)?),
			},
			(TypeKind::Nullable(_), TypeKind::Boxed(_)) => return None,
			(_, TypeKind::Nullable(t)) | (_, TypeKind::Boxed(t)) => ValueConversion::Lift {
				to: t,
				target: to,
				inner: Box::new(self.resolve(from, t.inner, hierarchy)?),
			},
			(TypeKind::Boxed(f), _) => ValueConversion::Unwrap {
				from: f,
				inner: Box::new(self.resolve(f.inner, to, hierarchy)?),
			},
			(TypeKind::Sequence(f), TypeKind::Sequence(t)) => ValueConversion::Sequence {
				from: f,
				to: t,
				target: to,
				element: Box::new(self.resolve(f.element, t.element, hierarchy)?),
				policy: self.container.config().sequence_length,
			},
			_ => return None,
		};

		Some(conversion)
	}
}

// === MemberMapper === //

pub(crate) enum ValueSource {
	Member(Member),
	Function(Arc<SourceFn>),
	WholeSource,
}

/// Maps one target member.
pub(crate) struct MemberMapper {
	target: Member,
	source: ValueSource,
	conversion: ValueConversion,
}

impl fmt::Debug for MemberMapper {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemberMapper")
			.field("target", &self.target.name())
			.field("conversion", &self.conversion)
			.finish_non_exhaustive()
	}
}

impl MemberMapper {
	/// Builds the mapper for one correspondence or returns `None` if no conversion exists between
	/// the origin's type and the target member's type.
	pub(crate) fn resolve(
		resolver: &Resolver<'_>,
		source_type: TypeInfo,
		correspondence: Correspondence,
		hierarchy: bool,
	) -> Option<Self> {
		let Correspondence {
			target,
			origin,
			converter,
		} = correspondence;

		let conversion = match converter {
			Some(converter) => ValueConversion::Convert(converter),
			None => {
				resolver.resolve(origin.value_type(source_type), target.value_type(), hierarchy)?
			}
		};

		let source = match origin {
			Origin::Member(member) => ValueSource::Member(member),
			Origin::Function { func, .. } => ValueSource::Function(func),
			Origin::WholeSource => ValueSource::WholeSource,
		};

		Some(Self {
			target,
			source,
			conversion,
		})
	}

	pub(crate) fn apply(&self, source: &dyn Any, target: &mut dyn Any) -> Result<(), MapError> {
		let value = match &self.source {
			ValueSource::Member(member) => match member.read(source) {
				Some(value) => value,
				// Write-only source members have nothing to contribute.
				None => return Ok(()),
			},
			ValueSource::Function(func) => MemberValue::Owned(func(source)?),
			ValueSource::WholeSource => MemberValue::Borrowed(source),
		};

		if self.conversion.merges_in_place() {
			let merged = self
				.target
				.modify(target, &mut |slot| self.conversion.merge(&*value, slot))?;

			if merged {
				return Ok(());
			}
		}

		let converted = self.conversion.convert(&*value)?;
		self.target.write(target, converted).map_err(|_| {
			MapError::mismatch_of(self.target.value_type().id(), "writing a member")
		})
	}
}
