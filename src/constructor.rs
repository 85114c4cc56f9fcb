use nix::unistd::{
    sysconf,
    SysconfVar,
};

use crate::{
    errors,
    Collection,
    DEFAULT_CAPACITY,
};

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Configures how a [`Collection`] maps its storage.
///
/// ```
/// use collection::CollectionConstructor;
///
/// let holder = CollectionConstructor::new()
///     .initial_capacity(64)
///     .build::<u32>()
///     .unwrap();
/// assert_eq!(holder.capacity(), 64);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct CollectionConstructor{
    initial_capacity: usize,
    page_size: Option<usize>,
}

impl Default for CollectionConstructor {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionConstructor {

    pub fn new() -> Self {
        Self{
            initial_capacity: DEFAULT_CAPACITY,
            page_size: None,
        }
    }

    /// Element slots available before the first growth. Clamped to at least 1.
    pub fn initial_capacity(mut self, capacity:usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Granularity of the backing mapping. Defaults to the host page size.
    pub fn page_size(mut self, page_size:usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn build<T>(&self) -> Result<Collection<T>, errors::Error> {
        let page_size = self.page_size.unwrap_or_else(host_page_size);
        if !page_size.is_power_of_two() {
            return Err(errors::Error::InvalidPageSize(page_size));
        }
        Collection::new_unchecked(self.initial_capacity, page_size)
    }
}

/// Page size reported by the host, or 4 KiB if it cannot be queried.
pub fn host_page_size() -> usize {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        _ => FALLBACK_PAGE_SIZE,
    }
}
