//! Element-wise mapping across ordered collections.

use log::debug;

use crate::{config::SequenceLengthPolicy, error::MapError};

/// How many elements to walk when mapping a sequence of `source_len` elements into an existing one
/// of `target_len` elements.
pub(crate) fn lockstep_len(
	policy: SequenceLengthPolicy,
	source_len: usize,
	target_len: usize,
) -> Result<usize, MapError> {
	if source_len == target_len {
		return Ok(source_len);
	}

	match policy {
		SequenceLengthPolicy::Truncate => {
			debug!(
				"mapping {source_len} element(s) into a sequence of {target_len}; stopping at the \
				 shorter one"
			);
			Ok(source_len.min(target_len))
		}
		SequenceLengthPolicy::Strict => Err(MapError::LengthMismatch {
			source_len,
			target_len,
		}),
	}
}

/// Maps every element of `source` in order, stopping at the first failure.
pub(crate) fn map_all<S, T>(
	source: &[S],
	mut f: impl FnMut(&S) -> Result<T, MapError>,
) -> Result<Vec<T>, MapError> {
	let mut out = Vec::with_capacity(source.len());
	for item in source {
		out.push(f(item)?);
	}
	Ok(out)
}

/// Maps `source` into `target` in lockstep and returns the number of elements mapped.
pub(crate) fn map_all_into<S, T>(
	policy: SequenceLengthPolicy,
	source: &[S],
	target: &mut [T],
	mut f: impl FnMut(&S, &mut T) -> Result<(), MapError>,
) -> Result<usize, MapError> {
	let len = lockstep_len(policy, source.len(), target.len())?;

	for (from, to) in source.iter().zip(target.iter_mut()).take(len) {
		f(from, to)?;
	}

	Ok(len)
}
