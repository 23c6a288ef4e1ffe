//! Combining optional absolute elapsed-millis timepoints. All time in this crate is "elapsed
//! milliseconds since some base" the caller owns; we never read a clock.

/// Elapsed milliseconds since the caller's chosen base. Opaque: only ever compared or offset,
/// never interpreted as a wall-clock instant.
pub type ElapsedMillis = u64;

/// Minimum over a set of optional timepoints, treating `None` as the identity element (i.e. as
/// "no constraint", not as "now"). Mirrors the source's `foldTimeMin`.
#[must_use]
pub fn fold_time_min<I>(timepoints: I) -> Option<ElapsedMillis>
where
    I: IntoIterator<Item = Option<ElapsedMillis>>,
{
    timepoints.into_iter().flatten().min()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_of_none_is_none() {
        assert_eq!(fold_time_min(vec![None, None]), None);
    }

    #[test]
    fn ignores_absent_entries() {
        assert_eq!(fold_time_min(vec![None, Some(20), None, Some(5)]), Some(5));
    }

    #[test]
    fn single_value_passes_through() {
        assert_eq!(fold_time_min(vec![Some(42)]), Some(42));
    }
}
