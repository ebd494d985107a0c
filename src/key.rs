//! Key extraction and key equality capabilities.

/// Produces the part of a stored value that acts as its key.
pub trait KeyOf<T> {
    type Key: ?Sized;
    fn key_of(value: &T) -> &Self::Key;
}

/// The whole value is the key (sets).
#[derive(Copy, Clone, Debug, Default)]
pub struct Identity;

impl<T> KeyOf<T> for Identity {
    type Key = T;
    #[inline]
    fn key_of(value: &T) -> &T {
        value
    }
}

/// The first element of a pair is the key (maps).
#[derive(Copy, Clone, Debug, Default)]
pub struct First;

impl<K, V> KeyOf<(K, V)> for First {
    type Key = K;
    #[inline]
    fn key_of(value: &(K, V)) -> &K {
        &value.0
    }
}

/// Key equality predicate. Must agree with the table's hasher: keys that
/// compare equal must hash equal.
pub trait KeyEq<Q: ?Sized> {
    fn eq(&self, stored: &Q, query: &Q) -> bool;
}

/// Equality through `Eq`.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultEq;

impl<Q: ?Sized + Eq> KeyEq<Q> for DefaultEq {
    #[inline]
    fn eq(&self, stored: &Q, query: &Q) -> bool {
        stored == query
    }
}

impl<Q: ?Sized, F> KeyEq<Q> for F
where
    F: Fn(&Q, &Q) -> bool,
{
    #[inline]
    fn eq(&self, stored: &Q, query: &Q) -> bool {
        self(stored, query)
    }
}
