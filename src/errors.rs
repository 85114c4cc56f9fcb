use thiserror::Error;


#[derive(Error, Debug)]
pub enum Error{
    #[error("index {index} out of range for collection of length {len}")]
    OutOfRangeIndex{
        index: usize,
        len: usize,
    },
    #[error("call to mmap failed: {0}")]
    MmapFail(nix::Error),
    #[error("call to mremap failed: {0}")]
    MremapFail(nix::Error),
    #[error("capacity overflow")]
    CapacityOverflow,
    #[error("page size {0} is not a power of two")]
    InvalidPageSize(usize),
    #[error("alignment {align} exceeds page size {page_size}")]
    UnsupportedAlignment{
        align: usize,
        page_size: usize,
    },
}
