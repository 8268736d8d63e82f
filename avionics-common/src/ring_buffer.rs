use heapless::Deque;

/// Fixed capacity FIFO that drops its oldest element when pushed while full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T, const N: usize> {
    items: Deque<T, N>,
}

impl<T, const N: usize> RingBuffer<T, N> {
    pub const fn new() -> Self {
        Self {
            items: Deque::new(),
        }
    }

    /// Appends `item`, returning the evicted oldest element if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.is_full() {
            self.items.pop_front()
        } else {
            None
        };
        // cannot fail, one slot is free at this point
        let _ = self.items.push_back(item);
        evicted
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Oldest element.
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Newest element.
    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    /// Element `index` positions after the oldest one.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.iter().nth(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.is_full()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// Drops the `count` oldest elements.
    pub fn discard_front(&mut self, count: usize) {
        for _ in 0..count {
            if self.items.pop_front().is_none() {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::RingBuffer;

    #[test]
    fn keeps_insertion_order_until_full() {
        let mut buffer = RingBuffer::<u32, 4>::new();
        assert!(buffer.is_empty());
        for i in 0..3 {
            assert_eq!(buffer.push(i), None);
        }
        assert_eq!(buffer.len(), 3);
        assert!(!buffer.is_full());
        assert_eq!(buffer.front(), Some(&0));
        assert_eq!(buffer.back(), Some(&2));
        assert_eq!(buffer.get(1), Some(&1));
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let mut buffer = RingBuffer::<u32, 3>::new();
        buffer.push(1);
        buffer.push(2);
        buffer.push(3);
        assert!(buffer.is_full());

        assert_eq!(buffer.push(4), Some(1));
        assert_eq!(buffer.push(5), Some(2));

        let items: Vec<u32> = buffer.iter().copied().collect();
        assert_eq!(items, vec![3, 4, 5]);
        assert_eq!(buffer.len(), buffer.capacity());
    }

    #[test]
    fn discard_and_clear() {
        let mut buffer = RingBuffer::<u32, 5>::new();
        for i in 0..5 {
            buffer.push(i);
        }
        buffer.discard_front(2);
        assert_eq!(buffer.front(), Some(&2));
        buffer.discard_front(10);
        assert!(buffer.is_empty());

        buffer.push(7);
        buffer.clear();
        assert_eq!(buffer.pop_front(), None);
    }
}
