use std::collections::TryReserveError;

/// Error returned when a [`Pool`] cannot reserve its initial slots.
#[derive(Debug, thiserror::Error)]
#[error("failed to reserve {requested} pool slots: {source}")]
pub struct PoolError {
    requested: usize,
    #[source]
    source: TryReserveError,
}

/// A free-list slot allocator.
///
/// A `Pool` stores values of type `T` in a contiguous array and hands out
/// stable indices that are recycled after removal. It backs every
/// index-linked structure of the runtime: tasks, ready-queue nodes, fd
/// handles and in-flight I/O requests.
///
/// Internally, it keeps track of:
/// - occupied slots,
/// - a stack of free indices,
/// - the number of live values.
///
/// Indices are only meaningful to the pool that produced them and must not
/// be used after [`remove`](Self::remove).
pub(crate) struct Pool<T> {
    /// Storage for items (`None` marks a free slot).
    items: Vec<Option<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<usize>,
    /// Number of occupied slots.
    live: usize,
}

impl<T> Pool<T> {
    /// Creates a pool with `count` pre-reserved free slots.
    ///
    /// Fails instead of aborting when the allocation cannot be satisfied.
    pub(crate) fn with_capacity(count: usize) -> Result<Self, PoolError> {
        let mut items = Vec::new();
        let mut free = Vec::new();

        let reserve = |source| PoolError {
            requested: count,
            source,
        };
        items.try_reserve_exact(count).map_err(reserve)?;
        free.try_reserve_exact(count).map_err(reserve)?;

        items.extend((0..count).map(|_| None));
        // Lowest indices are handed out first.
        free.extend((0..count).rev());

        Ok(Self {
            items,
            free,
            live: 0,
        })
    }

    /// Takes a free slot, stores `item` in it and returns its index.
    ///
    /// If no free slot is left, the pool doubles its storage.
    pub(crate) fn insert(&mut self, item: T) -> usize {
        self.insert_with(|_| item)
    }

    /// Like [`insert`](Self::insert), for values that need their own index.
    pub(crate) fn insert_with(&mut self, make: impl FnOnce(usize) -> T) -> usize {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let len = self.items.len();
                let new_len = if len == 0 { 1 } else { 2 * len };

                self.items.extend((len..new_len).map(|_| None));
                self.free.extend(((len + 1)..new_len).rev());

                len
            }
        };

        self.items[index] = Some(make(index));
        self.live += 1;

        index
    }

    /// Removes the value at `index` and returns its slot to the free list.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range or the slot is already free.
    pub(crate) fn remove(&mut self, index: usize) -> T {
        let item = self
            .items
            .get_mut(index)
            .and_then(Option::take)
            .expect("pool slot is not occupied");

        self.free.push(index);
        self.live -= 1;

        item
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index).and_then(Option::as_mut)
    }

    pub(crate) fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Indices of all occupied slots, in ascending order.
    pub(crate) fn indices(&self) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| item.as_ref().map(|_| index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Pool;

    #[test]
    fn reuses_freed_slots() {
        let mut pool = Pool::with_capacity(2).unwrap();

        let a = pool.insert("a");
        let b = pool.insert("b");
        assert_eq!((a, b), (0, 1));
        assert_eq!(pool.len(), 2);

        assert_eq!(pool.remove(a), "a");
        assert!(!pool.contains(a));

        let c = pool.insert("c");
        assert_eq!(c, a);
        assert_eq!(pool.get(c), Some(&"c"));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut pool = Pool::with_capacity(1).unwrap();

        let ids: Vec<_> = (0..5).map(|i| pool.insert(i)).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(pool.indices(), ids);

        for id in ids {
            pool.remove(id);
        }
        assert!(pool.is_empty());
    }

    #[test]
    fn insert_with_sees_its_index() {
        let mut pool = Pool::with_capacity(4).unwrap();
        pool.insert(0);

        let id = pool.insert_with(|index| index * 10);
        assert_eq!(pool.get(id), Some(&10));
    }

    #[test]
    #[should_panic(expected = "pool slot is not occupied")]
    fn double_remove_panics() {
        let mut pool = Pool::with_capacity(1).unwrap();
        let id = pool.insert(1);
        pool.remove(id);
        pool.remove(id);
    }
}
