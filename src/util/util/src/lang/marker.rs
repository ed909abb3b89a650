use std::marker::PhantomData;

/// A phantom marker that makes the structure covariant w.r.t `T`'s lifetime without owning a `T`.
/// This keeps the structure [Send] and [Sync] regardless of `T`.
pub type PhantomShorten<T> = PhantomData<fn() -> T>;

/// A phantom marker for a structure which consumes an `I` and produces an `O`. Like
/// [PhantomShorten], it implies nothing about auto-traits.
pub type PhantomFn<I, O> = PhantomData<fn(I) -> O>;
