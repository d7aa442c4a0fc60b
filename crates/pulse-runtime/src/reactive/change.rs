#![forbid(unsafe_code)]

//! Old/new value pairs emitted by [`PropertyStream::changes`].
//!
//! Every change event takes a sequence number from one process-wide counter,
//! so change events from different properties can be put in the order they
//! happened.
//!
//! [`PropertyStream::changes`]: super::PropertyStream::changes

use std::sync::atomic::{AtomicU64, Ordering};

use pulse_core::error::OrRaise;
use pulse_core::{ContractViolation, Result};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// A property moving from `old_value` to `new_value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChangeEvent<M> {
    old_value: M,
    new_value: M,
    sequence: u64,
}

impl<M: PartialEq> PropertyChangeEvent<M> {
    /// Raises [`ContractViolation::UnchangedValue`] if the values are equal.
    #[track_caller]
    pub fn new(old_value: M, new_value: M) -> Self {
        Self::try_new(old_value, new_value).or_raise()
    }

    pub fn try_new(old_value: M, new_value: M) -> Result<Self> {
        if old_value == new_value {
            return Err(ContractViolation::UnchangedValue);
        }
        Ok(Self {
            old_value,
            new_value,
            sequence: next_sequence(),
        })
    }

    #[must_use]
    pub fn old_value(&self) -> &M {
        &self.old_value
    }

    #[must_use]
    pub fn new_value(&self) -> &M {
        &self.new_value
    }

    /// Position in the process-wide order of change events.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The change from this event's new value to `value`.
    pub fn next(&self, value: M) -> Result<Self>
    where
        M: Clone,
    {
        Self::try_new(self.new_value.clone(), value)
    }

    #[must_use]
    pub fn into_values(self) -> (M, M) {
        (self.old_value, self.new_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_are_rejected() {
        assert_eq!(
            PropertyChangeEvent::try_new(1, 1),
            Err(ContractViolation::UnchangedValue)
        );
    }

    #[test]
    #[should_panic(expected = "distinct old and new values")]
    fn new_raises_on_equal_values() {
        let _ = PropertyChangeEvent::new("salsa", "salsa");
    }

    #[test]
    fn sequence_increases() {
        let first = PropertyChangeEvent::new(1, 2);
        let second = PropertyChangeEvent::new(7, 3);
        assert!(second.sequence() > first.sequence());
    }

    #[test]
    fn next_chains_from_new_value() {
        let first = PropertyChangeEvent::new("tacos", "burritos");
        let second = first.next("fajitas").unwrap();
        assert_eq!(second.old_value(), &"burritos");
        assert_eq!(second.into_values(), ("burritos", "fajitas"));
        assert_eq!(first.next("burritos"), Err(ContractViolation::UnchangedValue));
    }
}
