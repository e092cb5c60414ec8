use crate::errors::SchedulerError;
use crate::queue::LocalQueues;
use parking_lot::Mutex;

/// Reserved task thread indices for host threads that register themselves
/// after initialization. Slot `i` maps to task thread index `first + i`.
///
/// A free slot holds the queues for its index; registering moves them into
/// the registering thread's context and deregistering hands them back. Any
/// partitions left in them stay stealable through the shared stealers in the
/// meantime.
#[derive(Debug)]
pub(crate) struct ExternalSlots {
    first: u32,

    slots: Mutex<Vec<Option<LocalQueues>>>,
}

impl ExternalSlots {
    pub(crate) fn new(first: u32, queues: Vec<LocalQueues>) -> Self {
        Self {
            first,
            slots: Mutex::new(queues.into_iter().map(Some).collect()),
        }
    }

    pub(crate) fn contains(&self, thread_num: u32) -> bool {
        thread_num
            .checked_sub(self.first)
            .is_some_and(|i| (i as usize) < self.len())
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub(crate) fn num_free(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Takes the lowest free slot.
    pub(crate) fn reserve_any(&self) -> Result<(u32, LocalQueues), SchedulerError> {
        let mut slots = self.slots.lock();

        slots
            .iter_mut()
            .enumerate()
            .find_map(|(i, slot)| slot.take().map(|q| (self.first + i as u32, q)))
            .ok_or(SchedulerError::NoFreeExternalSlot)
    }

    pub(crate) fn reserve(&self, thread_num: u32) -> Result<LocalQueues, SchedulerError> {
        if !self.contains(thread_num) {
            return Err(SchedulerError::NotAnExternalSlot(thread_num));
        }

        self.slots.lock()[(thread_num - self.first) as usize]
            .take()
            .ok_or(SchedulerError::ExternalSlotTaken(thread_num))
    }

    #[track_caller]
    pub(crate) fn release(&self, thread_num: u32, queues: LocalQueues) {
        debug_assert!(self.contains(thread_num), "not an external slot");

        let mut slots = self.slots.lock();
        let slot = &mut slots[(thread_num - self.first) as usize];
        debug_assert!(slot.is_none(), "releasing a free slot");
        *slot = Some(queues);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(ExternalSlots: Send, Sync);

    fn slots(first: u32, n: usize) -> ExternalSlots {
        ExternalSlots::new(first, (0..n).map(|_| LocalQueues::new().0).collect())
    }

    #[test]
    fn test_reserve_any_then_release() {
        let slots = slots(3, 2);
        assert!(slots.contains(3) && slots.contains(4));
        assert!(!slots.contains(2) && !slots.contains(5));

        let (a, qa) = slots.reserve_any().unwrap();
        let (b, _qb) = slots.reserve_any().unwrap();
        assert_eq!((a, b), (3, 4));
        assert!(matches!(
            slots.reserve_any(),
            Err(SchedulerError::NoFreeExternalSlot)
        ));

        slots.release(a, qa);
        assert_eq!(slots.num_free(), 1);
        assert_eq!(slots.reserve_any().unwrap().0, 3);
    }

    #[test]
    fn test_reserve_specific() {
        let slots = slots(2, 1);

        assert!(matches!(
            slots.reserve(1),
            Err(SchedulerError::NotAnExternalSlot(1))
        ));

        let q = slots.reserve(2).unwrap();
        assert!(matches!(
            slots.reserve(2),
            Err(SchedulerError::ExternalSlotTaken(2))
        ));

        slots.release(2, q);
        assert!(slots.reserve(2).is_ok());
    }

    #[test]
    fn test_no_external_slots() {
        let slots = slots(4, 0);
        assert_eq!(slots.len(), 0);
        assert!(!slots.contains(4));
        assert!(slots.reserve_any().is_err());
    }
}
