/// Fixed-capacity FIFO ring.
///
/// `head` is the write index and `tail` the read index. One slot is always left
/// empty so that `head == tail` means empty and `head + 1 == tail` means full;
/// a ring of length `n` therefore holds at most `n - 1` items.
pub struct BoundedQueue<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
}

impl<T: Copy> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    /// Ring length, including the sacrificed slot.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        (self.head + self.capacity() - self.tail) % self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        self.advance(self.head) == self.tail
    }

    /// Copy `item` into the write slot. Hands it back when full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let next = self.advance(self.head);
        if next == self.tail {
            return Err(item);
        }
        self.slots[self.head] = Some(item);
        self.head = next;
        Ok(())
    }

    /// Oldest item, left in place.
    pub fn front(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.tail].as_ref()
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.tail].take();
        self.tail = self.advance(self.tail);
        item
    }

    fn advance(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holds_capacity_minus_one() {
        let mut q = BoundedQueue::new(4);
        assert!(q.is_empty());
        for i in 0..3 {
            assert!(q.push(i).is_ok());
        }
        assert!(q.is_full());
        assert_eq!(q.len(), 3);
        assert_eq!(q.push(99), Err(99));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_fifo_across_wraparound() {
        let mut q = BoundedQueue::new(3);
        let mut out = Vec::new();
        for i in 0..10 {
            assert!(q.push(i).is_ok());
            if q.is_full() {
                out.extend(q.pop());
            }
        }
        while let Some(v) = q.pop() {
            out.push(v);
        }
        assert_eq!(out, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_front_does_not_consume() {
        let mut q = BoundedQueue::new(3);
        assert!(q.front().is_none());
        q.push(7).unwrap();
        assert_eq!(q.front(), Some(&7));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(), Some(7));
        assert_eq!(q.pop(), None);
    }
}
