//! Disk layer: fixed-size page I/O against the single database file, and
//! the slotted table-page byte layout.
//!
//! The data file is an array of `PAGE_SIZE`-byte pages with no separate
//! header; page 0 is reserved for the catalog. The write-ahead log lives
//! beside the data file with a `.wal` suffix.

mod disk;
mod table_page;

pub use disk::DiskManager;
pub use table_page::{TablePage, TablePageView, SLOT_BYTES, TABLE_PAGE_HEADER};

#[cfg(test)]
mod tests;
