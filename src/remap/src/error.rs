use remap_util::debug::type_id::NamedTypeId;
use thiserror::Error;

use crate::reflect::TypePair;

// === ConfigError === //

/// An error raised synchronously by the call which attempted an invalid configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
	#[error("the container is sealed; {what} can no longer be modified")]
	Sealed { what: &'static str },

	#[error("the mapping plan for `{pair}` has begun compiling and is now read-only")]
	PlanReadOnly { pair: TypePair },

	#[error("member names must not be empty")]
	EmptyMemberName,

	#[error("`{owner}` has no member named {name:?}")]
	MemberNotFound { owner: NamedTypeId, name: String },

	#[error("member `{owner}::{name}` cannot be {access}")]
	MemberInaccessible {
		owner: NamedTypeId,
		name: &'static str,
		access: &'static str,
	},

	#[error("converter `{converter}` cannot feed `{member}`, which needs `{expected}`")]
	ConverterMismatch {
		member: &'static str,
		converter: TypePair,
		expected: TypePair,
	},

	#[error("`{pair}` is not a pair of shapes; only its matching options can be configured")]
	NotStructural { pair: TypePair },
}

// === CompileError === //

/// An error raised while compiling a mapping plan. Compile failures are cached by the plan so every
/// later attempt observes the same error.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
	#[error("`{ty}` has no default constructor and no instance creator was supplied")]
	NoDefaultConstructor { ty: NamedTypeId },

	#[error("no conversion exists for `{pair}`")]
	NoConversion { pair: TypePair },

	#[error("the container owning this plan was dropped")]
	ContainerDropped,
}

// === MapError === //

#[derive(Debug, Error)]
pub enum MapError {
	#[error(transparent)]
	Compile(#[from] CompileError),

	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error("expected a value of type `{expected}` while {during}")]
	TypeMismatch {
		expected: NamedTypeId,
		during: &'static str,
	},

	#[error("cannot map a sequence of {source_len} element(s) into one of {target_len}")]
	LengthMismatch { source_len: usize, target_len: usize },

	#[error("the container owning this plan was dropped")]
	ContainerDropped,

	/// An error raised by a user-supplied hook, converter, factory or binding.
	#[error(transparent)]
	User(anyhow::Error),
}

impl MapError {
	pub fn mismatch<T: ?Sized + 'static>(during: &'static str) -> Self {
		Self::TypeMismatch {
			expected: NamedTypeId::of::<T>(),
			during,
		}
	}

	pub(crate) fn mismatch_of(expected: NamedTypeId, during: &'static str) -> Self {
		Self::TypeMismatch { expected, during }
	}
}
