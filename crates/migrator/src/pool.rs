/// Fixed number of concurrency slots, each holding at most one occupant.
///
/// The scheduler owns the pool exclusively; slots are only filled when empty
/// and only emptied by [`SlotPool::release`].
#[derive(Debug)]
pub struct SlotPool<T> {
    slots: Vec<Option<T>>,
}

impl<T> SlotPool<T> {
    pub fn new(size: usize) -> Self {
        SlotPool {
            slots: (0..size).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Lowest empty slot, if any
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    /// Place an occupant in an empty slot; hands it back if the slot is taken
    /// or out of range
    pub fn assign(&mut self, slot: usize, occupant: T) -> Result<(), T> {
        match self.slots.get_mut(slot) {
            Some(entry @ None) => {
                *entry = Some(occupant);
                Ok(())
            }
            _ => Err(occupant),
        }
    }

    /// Place an occupant in the lowest empty slot and return that slot; hands
    /// the occupant back when every slot is taken
    pub fn assign_first_free(&mut self, occupant: T) -> Result<usize, T> {
        match self.slots.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
            Some((slot, entry)) => {
                *entry = Some(occupant);
                Ok(slot)
            }
            None => Err(occupant),
        }
    }

    /// Empty a slot, returning its occupant
    pub fn release(&mut self, slot: usize) -> Option<T> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Occupied slots with their index
    pub fn iter_occupied(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|t| (i, t)))
    }

    pub fn iter_occupied_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|t| (i, t)))
    }
}
