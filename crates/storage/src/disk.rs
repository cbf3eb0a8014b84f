use common::{DbError, DbResult, PageId, PAGE_SIZE};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Owns the database file and hands out the WAL file handle.
///
/// Pages live at byte offset `page_id * PAGE_SIZE`; allocation extends the
/// file by one zeroed page. All access is serialized behind a mutex; the
/// buffer pool above provides the caching that makes this cheap.
pub struct DiskManager {
    inner: Mutex<Inner>,
    db_path: PathBuf,
}

struct Inner {
    file: File,
    num_pages: u32,
}

impl DiskManager {
    /// Opens (creating if absent) the data file and its sibling WAL file.
    pub fn open(db_path: impl AsRef<Path>) -> DbResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;
        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            return Err(DbError::Corruption(format!(
                "data file length {len} is not a multiple of the page size"
            )));
        }
        // The WAL file is created eagerly so a crash before the first
        // append still leaves a well-formed (empty) log.
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(Self::wal_path_for(&db_path))?;
        Ok(Self {
            inner: Mutex::new(Inner {
                file,
                num_pages: (len / PAGE_SIZE as u64) as u32,
            }),
            db_path,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        Self::wal_path_for(&self.db_path)
    }

    fn wal_path_for(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(".wal");
        PathBuf::from(name)
    }

    /// Append-mode handle to the WAL file for the log manager.
    pub fn wal_file(&self) -> DbResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(self.wal_path())?)
    }

    /// Reads one page; `NotFound` if the page was never allocated.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> DbResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let mut inner = self.inner.lock();
        if page_id.0 >= inner.num_pages {
            return Err(DbError::NotFound(format!("page {page_id} past end of file")));
        }
        inner
            .file
            .seek(SeekFrom::Start(page_id.0 as u64 * PAGE_SIZE as u64))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    /// Overwrites one page in place.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> DbResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let mut inner = self.inner.lock();
        if page_id.0 >= inner.num_pages {
            return Err(DbError::NotFound(format!(
                "write to unallocated page {page_id}"
            )));
        }
        inner
            .file
            .seek(SeekFrom::Start(page_id.0 as u64 * PAGE_SIZE as u64))?;
        inner.file.write_all(buf)?;
        Ok(())
    }

    /// Extends the file by one zeroed page and returns its id.
    pub fn allocate_page(&self) -> DbResult<PageId> {
        let mut inner = self.inner.lock();
        if inner.num_pages == u32::MAX {
            return Err(DbError::OutOfResources("page id space exhausted".into()));
        }
        let page_id = PageId(inner.num_pages);
        inner
            .file
            .seek(SeekFrom::Start(page_id.0 as u64 * PAGE_SIZE as u64))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;
        inner.num_pages += 1;
        tracing::trace!(page = page_id.0, "allocated page");
        Ok(page_id)
    }

    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Fsync the data file.
    pub fn flush(&self) -> DbResult<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}
