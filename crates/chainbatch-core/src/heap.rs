//! Array-backed binary heap ordered by a caller-supplied comparator.
//!
//! `std::collections::BinaryHeap` needs an `Ord` key; the batch merger orders
//! by `range.from` only and re-inserts split pieces, so the comparator is a
//! plain closure here.

/// Binary heap where `before(a, b) == true` means `a` is popped before `b`.
pub struct Heap<T, F> {
    items: Vec<T>,
    before: F,
}

impl<T, F> Heap<T, F>
where
    F: Fn(&T, &T) -> bool,
{
    /// Create an empty heap.
    pub fn new(before: F) -> Self {
        Self {
            items: Vec::new(),
            before,
        }
    }

    /// Build a heap from `items` in O(n).
    pub fn from_vec(items: Vec<T>, before: F) -> Self {
        let mut heap = Self { items, before };
        heap.init();
        heap
    }

    /// Re-establish the heap property over the whole backing array.
    pub fn init(&mut self) {
        let n = self.items.len();
        for i in (0..n / 2).rev() {
            self.sift_down(i);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The extreme element, without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
        let last = self.items.len() - 1;
        self.sift_up(last);
    }

    /// Remove and return the extreme element.
    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let top = self.items.pop();
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        top
    }

    /// Push `item`, then pop the extreme element. Never empty-handed.
    pub fn push_pop(&mut self, item: T) -> T {
        let heap_first = self
            .items
            .first()
            .map_or(false, |top| (self.before)(top, &item));
        if !heap_first {
            return item;
        }
        let top = std::mem::replace(&mut self.items[0], item);
        self.sift_down(0);
        top
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if (self.before)(&self.items[i], &self.items[parent]) {
                self.items.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.items.len();
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut best = i;
            if left < n && (self.before)(&self.items[left], &self.items[best]) {
                best = left;
            }
            if right < n && (self.before)(&self.items[right], &self.items[best]) {
                best = right;
            }
            if best == i {
                break;
            }
            self.items.swap(i, best);
            i = best;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<T, F: Fn(&T, &T) -> bool>(mut heap: Heap<T, F>) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(x) = heap.pop() {
            out.push(x);
        }
        out
    }

    #[test]
    fn min_heap_pops_ascending() {
        let heap = Heap::from_vec(vec![5, 1, 9, 3, 3, 7, 0], |a: &i32, b: &i32| a < b);
        assert_eq!(drain(heap), vec![0, 1, 3, 3, 5, 7, 9]);
    }

    #[test]
    fn max_heap_pops_descending() {
        let mut heap = Heap::new(|a: &i32, b: &i32| a > b);
        for x in [4, 8, 1, 6] {
            heap.push(x);
        }
        assert_eq!(heap.peek(), Some(&8));
        assert_eq!(drain(heap), vec![8, 6, 4, 1]);
    }

    #[test]
    fn empty_heap() {
        let mut heap = Heap::new(|a: &u8, b: &u8| a < b);
        assert!(heap.is_empty());
        assert_eq!(heap.peek(), None);
        assert_eq!(heap.pop(), None);
    }

    #[test]
    fn push_pop_returns_extreme() {
        let mut heap = Heap::from_vec(vec![3, 5], |a: &i32, b: &i32| a < b);
        assert_eq!(heap.push_pop(1), 1);
        assert_eq!(heap.push_pop(4), 3);
        assert_eq!(heap.len(), 2);
        assert_eq!(drain(heap), vec![4, 5]);

        let mut empty = Heap::new(|a: &i32, b: &i32| a < b);
        assert_eq!(empty.push_pop(9), 9);
        assert!(empty.is_empty());
    }

    #[test]
    fn comparator_keys_on_field_only() {
        let items = vec![(9, 'a'), (-1, 'b'), (4, 'c'), (-1, 'd')];
        let mut heap = Heap::from_vec(items, |a: &(i32, char), b: &(i32, char)| a.0 < b.0);
        assert_eq!(heap.pop().map(|x| x.0), Some(-1));
        assert_eq!(heap.pop().map(|x| x.0), Some(-1));
        assert_eq!(heap.pop(), Some((4, 'c')));
        assert_eq!(heap.pop(), Some((9, 'a')));
    }
}
