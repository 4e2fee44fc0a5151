//! Extension traits for standard collections.

/// Extension methods for iterators/collections that fleetd reaches for
/// repeatedly: pulling the single element out of a collection known (by
/// construction) to have exactly one.
pub trait CollectionExt<T>: IntoIterator<Item = T> {
    /// Consumes the collection and returns its only element.
    ///
    /// # Panics
    ///
    /// Panics if the collection does not have exactly one element.
    fn into_element(self) -> T
    where
        Self: Sized,
    {
        let mut iter = self.into_iter();
        let elem = iter
            .next()
            .unwrap_or_else(|| panic!("into_element called on empty collection"));
        assert!(
            iter.next().is_none(),
            "into_element called on collection with more than one element"
        );
        elem
    }
}

impl<T, C: IntoIterator<Item = T>> CollectionExt<T> for C {}
