//! Error reporting built off the Rust standard library [Error] trait.

use std::{error::Error, fmt};

use derive_where::derive_where;

// === Error formatting === //

pub trait ErrorFormatExt: Error {
	fn format_error(&self) -> FormattedError<Self> {
		FormattedError(self)
	}

	/// Logs the error and its cause chain at the `warn` level under the given log target.
	fn log_warn(&self, target: &str) {
		log::warn!(target: target, "{}", self.format_error());
	}
}

impl<T: ?Sized + Error> ErrorFormatExt for T {}

#[derive_where(Copy, Clone)]
pub struct FormattedError<'a, T: ?Sized>(pub &'a T);

impl<T: ?Sized + Error> fmt::Display for FormattedError<'_, T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let target = self.0;

		write!(f, "Error: {}", target)?;

		let mut cause_iter = target.source();
		if cause_iter.is_some() {
			writeln!(f, "\n\nCaused by:")?;
		}

		while let Some(cause) = cause_iter {
			for line in cause.to_string().lines() {
				writeln!(f, "\t{}", line)?;
			}
			cause_iter = cause.source();
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug)]
	struct Leaf;

	impl fmt::Display for Leaf {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			f.write_str("leaf failure")
		}
	}

	impl Error for Leaf {}

	#[derive(Debug)]
	struct Wrapper(Leaf);

	impl fmt::Display for Wrapper {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			f.write_str("outer failure")
		}
	}

	impl Error for Wrapper {
		fn source(&self) -> Option<&(dyn Error + 'static)> {
			Some(&self.0)
		}
	}

	#[test]
	fn formats_cause_chain() {
		let text = Wrapper(Leaf).format_error().to_string();
		assert!(text.starts_with("Error: outer failure"));
		assert!(text.contains("Caused by:"));
		assert!(text.contains("\tleaf failure"));
	}
}
