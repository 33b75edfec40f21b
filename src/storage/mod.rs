//! Page-file storage: fixed-size pages, a write-ahead log, an in-memory
//! buffer manager, and the transactional façade (`StorageEngine`) composing
//! them, plus the on-page slotted layout data pages use.

pub mod buffer_manager;
pub mod engine;
pub mod header;
pub mod page_file;
pub mod slotted_page;
pub mod wal;

pub use buffer_manager::BufferManager;
pub use engine::{StorageEngine, Transaction, TransactionState};
pub use page_file::PageFile;
pub use slotted_page::SlottedPage;
pub use wal::WriteAheadLog;
