#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Options controlling how members of one type pair are matched up.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct MatchOptions {
	/// Whether member names must match exactly or only up to ASCII/Unicode case.
	pub case_sensitive: bool,

	/// Pairs same-named members positionally regardless of their types and recursively maps nested
	/// shapes through their own plans.
	///
	/// This only applies to the pair it is set on. A nested pair is matched with its own options,
	/// so a graph more than one level deep needs hierarchy mode on every inner pair as well, most
	/// easily through [ContainerConfig::default_options].
	pub hierarchy: bool,

	/// Whether conventions may read and write non-public members.
	pub include_non_public: bool,
}

impl Default for MatchOptions {
	fn default() -> Self {
		Self {
			case_sensitive: true,
			hierarchy: false,
			include_non_public: false,
		}
	}
}

/// What `map_sequence_into` does when the two sequences differ in length.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SequenceLengthPolicy {
	/// Map the common prefix and report how many elements were mapped.
	#[default]
	Truncate,

	/// Refuse to map anything and return
	/// [MapError::LengthMismatch](crate::MapError::LengthMismatch).
	Strict,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct ContainerConfig {
	/// Options used by every pair which was not given its own.
	pub default_options: MatchOptions,
	pub sequence_length: SequenceLengthPolicy,
}
