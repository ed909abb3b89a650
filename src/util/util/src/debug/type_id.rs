use std::{
	any::{self, TypeId},
	borrow::Borrow,
	fmt,
};

/// A [TypeId] which remembers the name of the type it was created from.
///
/// Equality, ordering and hashing only consider the underlying [TypeId]. The name is kept around in
/// every build profile since it ends up in user-facing error messages.
#[derive(Copy, Clone)]
#[derive_where::derive_where(Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NamedTypeId {
	id: TypeId,
	#[derive_where(skip)]
	name: &'static str,
}

impl fmt::Debug for NamedTypeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TypeId<{}>", self.name)
	}
}

impl fmt::Display for NamedTypeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name)
	}
}

impl NamedTypeId {
	pub fn of<T: ?Sized + 'static>() -> Self {
		Self {
			id: TypeId::of::<T>(),
			name: any::type_name::<T>(),
		}
	}

	pub fn raw(self) -> TypeId {
		self.id
	}

	pub fn name(self) -> &'static str {
		self.name
	}

	/// The type name with its module path stripped from every path segment, e.g.
	/// `alloc::vec::Vec<app::Person>` becomes `Vec<Person>`.
	pub fn short_name(self) -> String {
		let mut out = String::with_capacity(self.name.len());
		let mut segment_start = 0;

		for (i, c) in self.name.char_indices() {
			match c {
				':' => segment_start = i + 1,
				'<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
					out.push_str(&self.name[segment_start..i]);
					out.push(c);
					segment_start = i + 1;
				}
				_ => {}
			}
		}
		out.push_str(&self.name[segment_start..]);
		out
	}

	pub fn is<T: ?Sized + 'static>(self) -> bool {
		self.id == TypeId::of::<T>()
	}
}

impl Borrow<TypeId> for NamedTypeId {
	fn borrow(&self) -> &TypeId {
		&self.id
	}
}

impl From<NamedTypeId> for TypeId {
	fn from(id: NamedTypeId) -> Self {
		id.raw()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn equality_ignores_name() {
		assert_eq!(NamedTypeId::of::<u32>(), NamedTypeId::of::<u32>());
		assert_ne!(NamedTypeId::of::<u32>(), NamedTypeId::of::<i32>());
		assert!(NamedTypeId::of::<String>().is::<String>());
	}

	#[test]
	fn short_name_strips_paths() {
		assert_eq!(NamedTypeId::of::<Vec<String>>().short_name(), "Vec<String>");
		assert_eq!(
			NamedTypeId::of::<Option<Box<u8>>>().short_name(),
			"Option<Box<u8>>"
		);
	}
}
