//! Structural object-to-object mapping.
//!
//! A [Container] derives, for each (source, target) type pair it is asked about, a correspondence
//! between the members of the two types and compiles it into a cached routine. Later requests for
//! the same pair reuse that routine without any further member lookup.
//!
//! ```ignore
//! #[derive(Clone, Default)]
//! struct Person { name: String, age: u8 }
//! remap::shape!(Person: Default { name, age });
//!
//! #[derive(Clone, Default)]
//! struct PersonDto { name: String, age: i32 }
//! remap::shape!(PersonDto: Default { name, age });
//!
//! let container = remap::Container::new();
//! let dto: PersonDto = container.map(&Person { name: "A".into(), age: 5 })?;
//! ```

pub mod config;
pub mod container;
pub mod convention;
pub mod convert;
pub mod create;
pub mod error;
pub mod member;
pub mod plan;
pub mod reflect;

mod member_mapper;
mod sequence;

pub mod prelude {
	pub use crate::{
		config::{ContainerConfig, MatchOptions, SequenceLengthPolicy},
		container::{Container, ContainerId, ConventionId},
		convention::{Convention, ConventionContext, NameMatching, Origin},
		convert::{PrimitiveWidening, ScalarCoercion, ValueConverter},
		error::{CompileError, ConfigError, MapError},
		member::{Member, MemberSet, Shape, ShapeBuilder, Visibility},
		plan::{Mapper, PlanBuilder, PlanState},
		reflect::{Reflect, TypeInfo, TypeKind, TypePair},
		shape,
	};
}

pub use prelude::*;
