use super::subset::SubsetRef;
use crate::errors::AstroError;
use crate::linalg::DVector;
use std::collections::HashMap;
use std::fmt;

/// An ordered registry mapping coordinate subsets to their offset inside a
/// flat state vector.
///
/// Subsets are registered in first-insertion order and offsets are contiguous
/// from zero, so the total width is the sum of the registered sizes. A broker
/// is only mutated while a propagator registers its dynamics; afterwards it
/// is shared immutably by every state of that propagation.
#[derive(Clone, Default)]
pub struct CoordinateBroker {
    subsets: Vec<SubsetRef>,
    offsets: HashMap<String, usize>,
    width: usize,
}

impl CoordinateBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_subsets(subsets: &[SubsetRef]) -> Self {
        let mut broker = Self::new();
        for subset in subsets {
            broker.add_subset(subset);
        }
        broker
    }

    /// Registers a subset and returns its offset. Idempotent by subset name.
    pub fn add_subset(&mut self, subset: &SubsetRef) -> usize {
        if let Some(offset) = self.offsets.get(subset.name()) {
            return *offset;
        }
        let offset = self.width;
        self.offsets.insert(subset.name().to_string(), offset);
        self.subsets.push(subset.clone());
        self.width += subset.size();
        offset
    }

    pub fn offset_of(&self, subset: &SubsetRef) -> Option<usize> {
        self.offset_of_name(subset.name())
    }

    pub fn offset_of_name(&self, name: &str) -> Option<usize> {
        self.offsets.get(name).copied()
    }

    pub fn has_subset(&self, subset: &SubsetRef) -> bool {
        self.offsets.contains_key(subset.name())
    }

    pub fn subsets(&self) -> &[SubsetRef] {
        &self.subsets
    }

    /// Total number of coordinates across all registered subsets.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Borrows the coordinates of the named subset out of a full vector.
    pub fn extract_raw<'a>(
        &self,
        coordinates: &'a DVector<f64>,
        name: &str,
    ) -> Result<&'a [f64], AstroError> {
        let offset = self
            .offset_of_name(name)
            .ok_or_else(|| AstroError::UndefinedInput(format!("subset {} not in broker", name)))?;
        let subset = self
            .subsets
            .iter()
            .find(|s| s.name() == name)
            .expect("offset map and subset list out of sync");
        Ok(&coordinates.as_slice()[offset..offset + subset.size()])
    }
}

impl fmt::Debug for CoordinateBroker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CoordinateBroker[")?;
        for (no, subset) in self.subsets.iter().enumerate() {
            if no > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} ({})", subset.name(), subset.size())?;
        }
        write!(f, "]")
    }
}

impl PartialEq for CoordinateBroker {
    /// Brokers are equal when they registered the same subsets in the same order.
    fn eq(&self, other: &Self) -> bool {
        self.subsets.len() == other.subsets.len()
            && self
                .subsets
                .iter()
                .zip(other.subsets.iter())
                .all(|(a, b)| a.name() == b.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::subset::{
        cartesian_position, cartesian_velocity, drag_coefficient, mass, surface_area,
    };

    #[test]
    fn offsets_are_contiguous_from_zero() {
        let mut broker = CoordinateBroker::new();
        assert_eq!(broker.add_subset(&cartesian_position()), 0);
        assert_eq!(broker.add_subset(&cartesian_velocity()), 3);
        assert_eq!(broker.add_subset(&mass()), 6);
        assert_eq!(broker.add_subset(&surface_area()), 7);
        assert_eq!(broker.width(), 8);

        // Offset of each successor is the predecessor's offset plus its size
        let subsets = broker.subsets().to_vec();
        for pair in subsets.windows(2) {
            let prev = broker.offset_of(&pair[0]).unwrap();
            let next = broker.offset_of(&pair[1]).unwrap();
            assert_eq!(next, prev + pair[0].size());
        }
    }

    #[test]
    fn add_subset_is_idempotent() {
        let mut broker = CoordinateBroker::new();
        broker.add_subset(&cartesian_position());
        let velocity_offset = broker.add_subset(&cartesian_velocity());
        assert_eq!(broker.add_subset(&cartesian_velocity()), velocity_offset);
        assert_eq!(broker.subsets().len(), 2);
        assert_eq!(broker.width(), 6);
    }

    #[test]
    fn equality_requires_identical_sequences() {
        let a = CoordinateBroker::from_subsets(&[cartesian_position(), cartesian_velocity()]);
        let b = CoordinateBroker::from_subsets(&[cartesian_position(), cartesian_velocity()]);
        let c = CoordinateBroker::from_subsets(&[cartesian_velocity(), cartesian_position()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn extract_raw_by_name() {
        let broker = CoordinateBroker::from_subsets(&[mass(), drag_coefficient()]);
        let coords = DVector::from_vec(vec![250.0, 2.2]);
        assert_eq!(broker.extract_raw(&coords, "DRAG_COEFFICIENT").unwrap(), &[2.2]);
        assert!(broker.extract_raw(&coords, "CARTESIAN_POSITION").is_err());
    }
}
