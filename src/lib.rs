

mod errors;
mod constructor;

pub use errors::Error;
pub use constructor::{
    CollectionConstructor,
    host_page_size,
};

use std::{
    slice,
    fmt::{
        self,
        Debug,
        Display,
        Formatter,
    },
    ffi::c_void,
    marker::PhantomData,
    ptr::{
        self,
        NonNull,
    },
    mem::{
        self,
        align_of,
        size_of,
    },
    num::NonZeroUsize,
    os::fd::BorrowedFd,
    ops::{
        Index,
        IndexMut,
    },
};

use log::{
    debug,
    trace,
    warn,
};

use nix::sys::mman::{
    mmap,
    mremap,
    munmap,
    MapFlags,
    MRemapFlags,
    ProtFlags,
};

/// Capacity of a collection created with [`Collection::new`].
pub const DEFAULT_CAPACITY: usize = 16;

/// Builds a [`Collection`] from a list of elements.
///
/// Evaluates to `Result<Collection<T>, Error>`.
///
/// ```
/// let names = collection::collection!["George", "Pesho"].unwrap();
/// assert_eq!(names.to_string(), "[George, Pesho]");
/// ```
#[macro_export]
macro_rules! collection {
    () => {
        $crate::Collection::new()
    };
    ($($item:expr),+ $(,)?) => {
        $crate::Collection::from_items([$($item),+])
    };
}

/// A resizable array backed by an anonymous memory mapping.
///
/// Elements live in a dense prefix `[0, len)` of the mapping. When an insertion
/// would overflow, the capacity at least doubles (always to a power of two) and
/// the mapping is grown with `mremap`. Capacity never shrinks.
pub struct Collection<T>{
    len: usize,
    capacity: usize,
    byte_capacity: usize,
    page_size: usize,
    start: NonNull<T>,
    phantom: PhantomData<T>,
}

unsafe impl<T: Send> Send for Collection<T> {}
unsafe impl<T: Sync> Sync for Collection<T> {}

impl<T> Collection<T> {

    /// An empty collection with room for [`DEFAULT_CAPACITY`] elements.
    pub fn new() -> Result<Self, errors::Error> {
        CollectionConstructor::new().build()
    }

    /// An empty collection with room for `capacity` elements, clamped to at least 1.
    pub fn with_capacity(capacity:usize) -> Result<Self, errors::Error> {
        CollectionConstructor::new().initial_capacity(capacity).build()
    }

    /// Seeds a collection with `items`, in order. Capacity follows the same
    /// growth rule as [`push`](Self::push), starting from the default.
    pub fn from_items<I: IntoIterator<Item = T>>(items:I) -> Result<Self, errors::Error> {
        let mut holder = Self::new()?;
        holder.add_range(items)?;
        Ok(holder)
    }

    pub(crate) fn new_unchecked(capacity:usize, page_size:usize) -> Result<Self, errors::Error> {
        // mappings are only aligned to the host page
        let guaranteed_align = page_size.min(host_page_size());
        if size_of::<T>() != 0 && align_of::<T>() > guaranteed_align {
            return Err(errors::Error::UnsupportedAlignment{
                align: align_of::<T>(),
                page_size: guaranteed_align,
            });
        }

        let capacity = capacity.max(1);
        let byte_capacity = Self::mapped_bytes(capacity, page_size)?;

        let start = match NonZeroUsize::new(byte_capacity) {
            Some(length) => {
                let memory_holder = unsafe{mmap(
                    None,
                    length,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                    MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
                    None::<BorrowedFd>,
                    0
                )}.map_err(errors::Error::MmapFail)?;
                trace!("mapped {byte_capacity} bytes at {memory_holder:p}");
                unsafe{NonNull::new_unchecked(memory_holder as *mut T)}
            }
            // zero sized elements never touch memory
            None => NonNull::dangling(),
        };

        Ok(Self{
            len: 0,
            capacity,
            byte_capacity,
            page_size,
            start,
            phantom: PhantomData,
        })
    }

    // Bytes needed for `capacity` elements, rounded up to whole pages.
    fn mapped_bytes(capacity:usize, page_size:usize) -> Result<usize, errors::Error> {
        let bytes = capacity.checked_mul(size_of::<T>()).ok_or(errors::Error::CapacityOverflow)?;
        let rounded = bytes.checked_add(page_size - 1).ok_or(errors::Error::CapacityOverflow)? & !(page_size - 1);
        if rounded > isize::MAX as usize {
            return Err(errors::Error::CapacityOverflow);
        }
        Ok(rounded)
    }

    fn grow_to(&mut self, required:usize) -> Result<(), errors::Error> {
        if required <= self.capacity {
            return Ok(());
        }

        let new_capacity = self.capacity
            .saturating_mul(2)
            .max(required)
            .checked_next_power_of_two()
            .ok_or(errors::Error::CapacityOverflow)?;
        let new_byte_capacity = Self::mapped_bytes(new_capacity, self.page_size)?;

        if new_byte_capacity > self.byte_capacity {
            let old_byte_capacity = self.byte_capacity;
            let memory_holder = unsafe{mremap(
                self.start.as_ptr() as *mut c_void,
                old_byte_capacity,
                new_byte_capacity,
                MRemapFlags::MREMAP_MAYMOVE,
                None
            )}.map_err(errors::Error::MremapFail)?;
            trace!("remapped {old_byte_capacity} -> {new_byte_capacity} bytes at {memory_holder:p}");
            self.start = unsafe{NonNull::new_unchecked(memory_holder as *mut T)};
            self.byte_capacity = new_byte_capacity;
        }

        debug!("collection grew from {} to {} elements", self.capacity, new_capacity);
        self.capacity = new_capacity;
        Ok(())
    }

    fn check_index(&self, index:usize) -> Result<(), errors::Error> {
        if index >= self.len {
            return Err(errors::Error::OutOfRangeIndex{
                index,
                len: self.len,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Makes room for at least `additional` more elements.
    pub fn reserve(&mut self, additional:usize) -> Result<(), errors::Error> {
        let required = self.len.checked_add(additional).ok_or(errors::Error::CapacityOverflow)?;
        self.grow_to(required)
    }

    pub fn push(&mut self, data:T) -> Result<(), errors::Error> {
        self.reserve(1)?;
        unsafe{ptr::write(self.start.as_ptr().add(self.len), data)};
        self.len += 1;
        Ok(())
    }

    /// Appends every item of `items` in order. Reserves once from the
    /// iterator's lower size bound; an empty iterator is a no-op.
    pub fn add_range<I: IntoIterator<Item = T>>(&mut self, items:I) -> Result<(), errors::Error> {
        let items = items.into_iter();
        self.reserve(items.size_hint().0)?;
        for item in items {
            self.push(item)?;
        }
        Ok(())
    }

    /// Inserts `data` at `index`, shifting everything after it one slot right.
    /// `index == len` appends.
    pub fn insert(&mut self, index:usize, data:T) -> Result<(), errors::Error> {
        if index > self.len {
            return Err(errors::Error::OutOfRangeIndex{
                index,
                len: self.len,
            });
        }
        self.reserve(1)?;
        unsafe{
            let pivot = self.start.as_ptr().add(index);
            ptr::copy(pivot, pivot.add(1), self.len - index);
            ptr::write(pivot, data);
        }
        self.len += 1;
        Ok(())
    }

    /// Removes and returns the element at `index`, shifting everything after
    /// it one slot left. Capacity is untouched.
    pub fn remove(&mut self, index:usize) -> Result<T, errors::Error> {
        self.check_index(index)?;
        let removed = unsafe{
            let pivot = self.start.as_ptr().add(index);
            let removed = ptr::read(pivot);
            ptr::copy(pivot.add(1), pivot, self.len - index - 1);
            removed
        };
        self.len -= 1;
        Ok(removed)
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(unsafe{ptr::read(self.start.as_ptr().add(self.len))})
    }

    /// Swaps the elements at `first` and `second`. Both indices are checked
    /// before anything moves.
    pub fn exchange(&mut self, first:usize, second:usize) -> Result<(), errors::Error> {
        self.check_index(first)?;
        self.check_index(second)?;
        self.as_mut_slice().swap(first, second);
        Ok(())
    }

    /// Drops every element. Capacity and the mapping are kept.
    pub fn clear(&mut self) {
        let live = self.as_mut_slice() as *mut [T];
        self.len = 0;
        unsafe{ptr::drop_in_place(live)};
    }

    pub fn try_get(&self, index:usize) -> Result<&T, errors::Error> {
        self.check_index(index)?;
        Ok(unsafe{&*self.start.as_ptr().add(index)})
    }

    pub fn try_get_mut(&mut self, index:usize) -> Result<&mut T, errors::Error> {
        self.check_index(index)?;
        Ok(unsafe{&mut *self.start.as_ptr().add(index)})
    }

    /// Replaces the element at `index`, returning the previous one.
    pub fn set(&mut self, index:usize, data:T) -> Result<T, errors::Error> {
        let slot = self.try_get_mut(index)?;
        Ok(mem::replace(slot, data))
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe{slice::from_raw_parts(self.start.as_ptr(), self.len)}
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe{slice::from_raw_parts_mut(self.start.as_ptr(), self.len)}
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    pub fn iter_mut(&mut self) -> slice::IterMut<'_, T> {
        self.as_mut_slice().iter_mut()
    }

    /// Copies the collection into a fresh mapping with the same capacity.
    pub fn try_clone(&self) -> Result<Self, errors::Error>
    where
        T: Clone,
    {
        let mut holder = Self::new_unchecked(self.capacity, self.page_size)?;
        holder.add_range(self.iter().cloned())?;
        Ok(holder)
    }
}

impl<T> Drop for Collection<T> {
    fn drop(&mut self) {
        self.clear();
        if self.byte_capacity == 0 {
            return;
        }
        let unmapped = unsafe{munmap(self.start.as_ptr() as *mut c_void, self.byte_capacity)};
        match unmapped {
            Ok(()) => trace!("unmapped {} bytes at {:p}", self.byte_capacity, self.start),
            Err(err) => warn!("call to munmap failed: {err}"),
        }
    }
}

impl<T> Index<usize> for Collection<T> {
    type Output = T;

    fn index(&self, index:usize) -> &Self::Output {
        match self.try_get(index) {
            Ok(elem) => elem,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<T> IndexMut<usize> for Collection<T> {

    fn index_mut(&mut self, index:usize) -> &mut Self::Output {
        match self.try_get_mut(index) {
            Ok(elem) => elem,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<'a, T> IntoIterator for &'a Collection<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut Collection<T> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<T: PartialEq> PartialEq for Collection<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Eq> Eq for Collection<T> {}

impl<T: PartialEq> PartialEq<[T]> for Collection<T> {
    fn eq(&self, other: &[T]) -> bool {
        self.as_slice() == other
    }
}

impl<T: PartialEq, const N: usize> PartialEq<[T; N]> for Collection<T> {
    fn eq(&self, other: &[T; N]) -> bool {
        self.as_slice() == other.as_slice()
    }
}

/// Renders as `[a, b, c]`, each element through its own `Display`.
impl<T: Display> Display for Collection<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("[")?;
        for (position, elem) in self.iter().enumerate() {
            if position > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{elem}")?;
        }
        f.write_str("]")
    }
}

impl<T:Debug> Debug for Collection<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Collection")
           .field("len", &self.len)
           .field("capacity", &self.capacity)
           .field("byte_capacity", &format!("0x{:X}", self.byte_capacity))
           .field("content", &self.as_slice())
           .finish()
    }
}
