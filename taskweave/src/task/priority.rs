use crate::errors::SchedulerError;
use std::fmt;

/// Number of priority tiers. Every task thread owns one queue per tier.
pub const NUM_PRIORITIES: usize = 3;

/// Urgency tier of a task. The lowest index is the most urgent.
///
/// Queues are drained highest priority first on every consumer, and a wait
/// bounded by a maximum priority only contributes work at or above that
/// urgency.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    High = 0,
    Medium = 1,
    #[default]
    Low = 2,
}

impl Priority {
    /// All tiers, most urgent first.
    pub const ALL: [Priority; NUM_PRIORITIES] = [Priority::High, Priority::Medium, Priority::Low];

    /// Least urgent tier, i.e. "all work" when used as a wait bound.
    pub const LOWEST: Priority = Priority::Low;

    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Panics if `index >= NUM_PRIORITIES`.
    #[track_caller]
    pub fn from_index(index: usize) -> Self {
        assert!(
            index < NUM_PRIORITIES,
            "priority {index} out of range [0, {NUM_PRIORITIES})"
        );
        Self::ALL[index]
    }

    /// Tiers from most urgent down to `self`, inclusive.
    #[inline(always)]
    pub(crate) fn up_to(self) -> impl Iterator<Item = Priority> {
        Self::ALL.into_iter().take(self.index() + 1)
    }
}

impl TryFrom<usize> for Priority {
    type Error = SchedulerError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(SchedulerError::PriorityOutOfRange(index))
    }
}

impl TryFrom<i32> for Priority {
    type Error = SchedulerError;

    fn try_from(index: i32) -> Result<Self, Self::Error> {
        usize::try_from(index)
            .map_err(|_| SchedulerError::PriorityOutOfRange(usize::MAX))
            .and_then(Priority::try_from)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => f.write_str("high"),
            Priority::Medium => f.write_str("medium"),
            Priority::Low => f.write_str("low"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::high(0, Priority::High)]
    #[case::medium(1, Priority::Medium)]
    #[case::low(2, Priority::Low)]
    fn test_priority_from_index(#[case] index: usize, #[case] expected: Priority) {
        assert_eq!(Priority::from_index(index), expected);
        assert_eq!(Priority::try_from(index).ok(), Some(expected));
        assert_eq!(expected.index(), index);
    }

    #[test]
    fn test_priority_out_of_range() {
        assert!(matches!(
            Priority::try_from(3usize),
            Err(SchedulerError::PriorityOutOfRange(3))
        ));
        assert!(Priority::try_from(-1i32).is_err());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_priority_from_index_panics() {
        let _ = Priority::from_index(NUM_PRIORITIES);
    }

    #[test]
    fn test_priority_up_to() {
        assert_eq!(Priority::High.up_to().collect::<Vec<_>>(), [Priority::High]);
        assert_eq!(
            Priority::LOWEST.up_to().collect::<Vec<_>>(),
            Priority::ALL.to_vec()
        );
        assert!(Priority::High < Priority::Low);
    }
}
