use std::collections::TryReserveError;
use std::mem::MaybeUninit;

/// A simple slab allocator.
///
/// A `Slab` stores values of type `T` in a contiguous array and
/// returns stable indices that can be reused after removal.
///
/// Internally, it keeps track of:
/// - initialized slots,
/// - free indices,
/// - and uninitialized memory using [`MaybeUninit`].
///
/// Indices stay valid until the slot is removed, no matter how many other
/// slots are inserted or removed in between. That is what lets the selector
/// remove one entry while another part of the call stack still holds the key
/// of a different one.
pub(crate) struct Slab<T> {
    /// Storage for items (may contain uninitialized slots).
    items: Vec<MaybeUninit<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<usize>,
    /// Marks whether a slot is currently initialized.
    used: Vec<bool>,
    /// Number of initialized slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a new `Slab` with a fixed initial capacity.
    ///
    /// All slots are initially free and uninitialized.
    pub(crate) fn new(size: usize) -> Self {
        let items = (0..size).map(|_| MaybeUninit::<T>::uninit()).collect();
        // Reversed so that the lowest index is handed out first.
        let free = (0..size).rev().collect();
        let used = vec![false; size];

        Self {
            items,
            free,
            used,
            len: 0,
        }
    }

    /// Inserts a value into the slab and returns its index.
    ///
    /// If a free slot is available, it is reused. Otherwise, the slab grows
    /// exponentially. Growth is fallible: on allocation failure the value is
    /// handed back together with the error and the slab is left untouched.
    pub(crate) fn try_insert(&mut self, item: T) -> Result<usize, (T, TryReserveError)> {
        if self.free.is_empty() {
            if let Err(e) = self.grow() {
                return Err((item, e));
            }
        }

        let Some(index) = self.free.pop() else {
            unreachable!("slab grew without producing a free slot");
        };

        self.items[index] = MaybeUninit::new(item);
        self.used[index] = true;
        self.len += 1;

        Ok(index)
    }

    /// Makes sure the next [`try_insert`](Self::try_insert) does not allocate.
    pub(crate) fn reserve_one(&mut self) -> Result<(), TryReserveError> {
        if self.free.is_empty() {
            self.grow()?;
        }
        Ok(())
    }

    fn grow(&mut self) -> Result<(), TryReserveError> {
        let len = self.items.len();
        let new_len = if len == 0 { 4 } else { 2 * len };
        let extra = new_len - len;

        self.items.try_reserve_exact(extra)?;
        self.used.try_reserve_exact(extra)?;
        self.free.try_reserve(extra)?;

        self.items
            .extend((len..new_len).map(|_| MaybeUninit::<T>::uninit()));
        self.used.extend((len..new_len).map(|_| false));
        self.free.extend((len..new_len).rev());

        Ok(())
    }

    /// Removes and returns the value stored at `index`.
    ///
    /// The slot becomes free and may be reused by future insertions.
    /// Returns `None` if the slot is not in use.
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        if !self.contains(index) {
            return None;
        }

        self.free.push(index);
        self.used[index] = false;
        self.len -= 1;

        // SAFETY: `used[index]` was true, so the slot is initialized, and it
        // is marked free before anything can observe it again.
        let item = unsafe { self.items[index].assume_init_read() };
        self.items[index] = MaybeUninit::uninit();

        Some(item)
    }

    /// Returns `true` if `index` refers to an initialized slot.
    pub(crate) fn contains(&self, index: usize) -> bool {
        self.used.get(index).copied().unwrap_or(false)
    }

    /// Returns a reference to the value at `index`, if any.
    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        if !self.contains(index) {
            return None;
        }

        // SAFETY: checked above that the slot is initialized.
        Some(unsafe { self.items[index].assume_init_ref() })
    }

    /// Number of values currently stored.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Iterates over the stored values in index order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.items
            .iter()
            .zip(self.used.iter())
            .enumerate()
            .filter(|(_, (_, used))| **used)
            // SAFETY: only slots flagged as used are yielded.
            .map(|(i, (slot, _))| (i, unsafe { slot.assume_init_ref() }))
    }

    /// Removes every value, returning them in index order.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let indices: Vec<usize> = self.iter().map(|(i, _)| i).collect();
        indices
            .into_iter()
            .filter_map(|i| self.remove(i))
            .collect()
    }
}

impl<T> Drop for Slab<T> {
    /// Drops all initialized elements stored in the slab.
    ///
    /// Uninitialized slots are ignored.
    fn drop(&mut self) {
        for (slot, &used) in self.items.iter_mut().zip(self.used.iter()) {
            if used {
                unsafe {
                    slot.assume_init_drop();
                }
            }
        }
    }
}
