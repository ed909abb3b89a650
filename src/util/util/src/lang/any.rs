use std::any::Any;

/// Views over `dyn Any` flavours with extra auto-trait bounds as a plain `dyn Any`.
pub trait AnyLike: Any {
	fn as_any(me: &Self) -> &dyn Any;

	fn as_any_mut(me: &mut Self) -> &mut dyn Any;
}

impl AnyLike for dyn Any + Send + Sync {
	fn as_any(me: &Self) -> &dyn Any {
		me
	}

	fn as_any_mut(me: &mut Self) -> &mut dyn Any {
		me
	}
}
