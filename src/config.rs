//! Open/create-time configuration for a `StorageEngine`.

/// Configuration passed to `StorageEngine::create`/`StorageEngine::open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageConfig {
    /// Page size in bytes; must be a power of two in `[4 KiB, 64 KiB]`.
    pub page_size: u32,
    /// Number of pages to pre-allocate for a freshly created file (including page 0).
    pub initial_size: u32,
    /// Opens the underlying file read-only; mutating operations return an error.
    pub read_only: bool,
}

impl StorageConfig {
    pub const MIN_PAGE_SIZE: u32 = 4 * 1024;
    pub const MAX_PAGE_SIZE: u32 = 64 * 1024;
    pub const DEFAULT_PAGE_SIZE: u32 = 16 * 1024;

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.page_size >= Self::MIN_PAGE_SIZE
            && self.page_size <= Self::MAX_PAGE_SIZE
            && self.page_size.is_power_of_two()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { page_size: Self::DEFAULT_PAGE_SIZE, initial_size: 16, read_only: false }
    }
}
