//! Machine identifier selection.
//!
//! Automatically chosen identifiers come from a reserved block so they never
//! collide with machines created by hand. The set of identifiers in use is a
//! snapshot taken from the host; it is not re-checked before registration.

use std::collections::BTreeSet;
use std::ops::Range;

use crate::error::AllocationError;

/// 254 identifiers starting at 400.
pub const RESERVED_IDS: Range<u32> = 400..654;

/// The lowest reserved identifier not in `in_use`.
pub fn allocate(in_use: &BTreeSet<u32>) -> Result<u32, AllocationError> {
    RESERVED_IDS
        .clone()
        .find(|id| !in_use.contains(id))
        .ok_or(AllocationError::Exhausted {
            start: RESERVED_IDS.start,
            end: RESERVED_IDS.end,
        })
}

/// Check that a caller-chosen identifier is free.
pub fn validate(id: u32, in_use: &BTreeSet<u32>) -> Result<(), AllocationError> {
    if in_use.contains(&id) {
        return Err(AllocationError::AlreadyExists(id));
    }
    Ok(())
}

/// Validate `requested` if given, otherwise allocate.
pub fn resolve_identifier(
    requested: Option<u32>,
    in_use: &BTreeSet<u32>,
) -> Result<u32, AllocationError> {
    match requested {
        Some(id) => validate(id, in_use).map(|()| id),
        None => allocate(in_use),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_lowest_free() {
        assert_eq!(allocate(&BTreeSet::new()), Ok(400));
        assert_eq!(allocate(&BTreeSet::from([400, 401, 402])), Ok(403));
        assert_eq!(allocate(&BTreeSet::from([400, 402])), Ok(401));
    }

    #[test]
    fn test_allocate_ignores_ids_outside_range() {
        let in_use = BTreeSet::from([100, 101, 399, 654, 1000]);
        assert_eq!(allocate(&in_use), Ok(400));
    }

    #[test]
    fn test_allocate_exhausted() {
        let in_use: BTreeSet<u32> = RESERVED_IDS.collect();
        assert_eq!(in_use.len(), 254);
        assert_eq!(
            allocate(&in_use),
            Err(AllocationError::Exhausted { start: 400, end: 654 })
        );
        let mut almost = in_use;
        almost.remove(&653);
        assert_eq!(allocate(&almost), Ok(653));
    }

    #[test]
    fn test_validate() {
        let in_use = BTreeSet::from([400]);
        assert_eq!(validate(400, &in_use), Err(AllocationError::AlreadyExists(400)));
        assert_eq!(validate(500, &in_use), Ok(()));
    }

    #[test]
    fn test_resolve_identifier() {
        let in_use = BTreeSet::from([400, 120]);
        assert_eq!(resolve_identifier(None, &in_use), Ok(401));
        assert_eq!(resolve_identifier(Some(121), &in_use), Ok(121));
        assert_eq!(
            resolve_identifier(Some(120), &in_use),
            Err(AllocationError::AlreadyExists(120))
        );
    }
}
