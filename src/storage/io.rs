// File I/O interface: positional read/write, flush/fsync, open/create/close,
// kept behind a trait plus one concrete backend (`std::fs::File`). Positional
// access avoids a shared seek cursor, which matters once the cache's per-row
// locks allow concurrent lookups across rows while a writer elsewhere in the
// file is active.

use crate::storage::error::HiveError;
use crate::storage::layout::PAGE_SIZE;
use std::fs::{File, OpenOptions};
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Black-box backing store for one open database file. Platform-specific
/// positional I/O lives behind this trait so `cache`/`commit` never touch
/// `std::fs` directly.
pub trait PageFile: Send + Sync {
    /// Read exactly `buf.len()` bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), HiveError>;
    /// Write exactly `buf.len()` bytes starting at `offset`.
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), HiveError>;
    /// Flush and fsync so prior writes are durable.
    fn flush(&self) -> Result<(), HiveError>;
    /// Current length of the backing file in bytes.
    fn len(&self) -> Result<u64, HiveError>;
    /// Grow (or shrink) the backing file to exactly `len` bytes.
    fn set_len(&self, len: u64) -> Result<(), HiveError>;
}

/// `std::fs::File`-backed implementation. On Unix this uses `pread`/`pwrite`
/// via `FileExt`; on Windows it calls `ReadFile`/`WriteFile` directly through
/// `windows-sys` with an `OVERLAPPED` structure carrying the byte offset —
/// the handle is never opened with `FILE_FLAG_OVERLAPPED`, so the calls still
/// block, but the offset in `OVERLAPPED` gives true positional I/O without a
/// shared seek cursor, same as `pread`/`pwrite`. Any other platform falls
/// back to a mutex serializing seek+read and seek+write pairs.
pub struct FilePageFile {
    file: File,
    #[cfg(not(any(unix, windows)))]
    seek_lock: parking_lot::Mutex<()>,
}

impl FilePageFile {
    pub fn open(path: &Path, create: bool, read_only: bool) -> Result<Self, HiveError> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(create)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file,
            #[cfg(not(any(unix, windows)))]
            seek_lock: parking_lot::Mutex::new(()),
        })
    }
}

#[cfg(unix)]
impl PageFile for FilePageFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), HiveError> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), HiveError> {
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), HiveError> {
        self.file.sync_data()?;
        Ok(())
    }

    fn len(&self) -> Result<u64, HiveError> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<(), HiveError> {
        self.file.set_len(len)?;
        Ok(())
    }
}

#[cfg(windows)]
impl PageFile for FilePageFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), HiveError> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Storage::FileSystem::ReadFile;
        use windows_sys::Win32::System::IO::OVERLAPPED;

        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        overlapped.Anonymous.Anonymous.Offset = (offset & 0xFFFF_FFFF) as u32;
        overlapped.Anonymous.Anonymous.OffsetHigh = (offset >> 32) as u32;

        let mut transferred = 0u32;
        let ok = unsafe {
            ReadFile(
                self.file.as_raw_handle() as isize,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut transferred,
                &mut overlapped,
            )
        };
        if ok == 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        if transferred as usize != buf.len() {
            return Err(HiveError::Io(format!(
                "short read at offset {offset}: wanted {} got {transferred}",
                buf.len()
            )));
        }
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), HiveError> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Storage::FileSystem::WriteFile;
        use windows_sys::Win32::System::IO::OVERLAPPED;

        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        overlapped.Anonymous.Anonymous.Offset = (offset & 0xFFFF_FFFF) as u32;
        overlapped.Anonymous.Anonymous.OffsetHigh = (offset >> 32) as u32;

        let mut transferred = 0u32;
        let ok = unsafe {
            WriteFile(
                self.file.as_raw_handle() as isize,
                buf.as_ptr(),
                buf.len() as u32,
                &mut transferred,
                &mut overlapped,
            )
        };
        if ok == 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        if transferred as usize != buf.len() {
            return Err(HiveError::Io(format!(
                "short write at offset {offset}: wanted {} wrote {transferred}",
                buf.len()
            )));
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), HiveError> {
        self.file.sync_data()?;
        Ok(())
    }

    fn len(&self) -> Result<u64, HiveError> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<(), HiveError> {
        self.file.set_len(len)?;
        Ok(())
    }
}

#[cfg(not(any(unix, windows)))]
impl PageFile for FilePageFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), HiveError> {
        use std::io::{Read, Seek, SeekFrom};
        let _guard = self.seek_lock.lock();
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), HiveError> {
        use std::io::{Seek, SeekFrom, Write};
        let _guard = self.seek_lock.lock();
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), HiveError> {
        self.file.sync_data()?;
        Ok(())
    }

    fn len(&self) -> Result<u64, HiveError> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<(), HiveError> {
        self.file.set_len(len)?;
        Ok(())
    }
}

/// Read one page-sized buffer at a page-aligned file offset.
pub fn read_page(file: &dyn PageFile, offset: u64) -> Result<Vec<u8>, HiveError> {
    let mut buf = vec![0u8; PAGE_SIZE];
    file.read_at(offset, &mut buf)?;
    Ok(buf)
}

/// Write one page-sized buffer at a page-aligned file offset.
pub fn write_page(file: &dyn PageFile, offset: u64, buf: &[u8]) -> Result<(), HiveError> {
    debug_assert_eq!(buf.len(), PAGE_SIZE);
    file.write_at(offset, buf)
}
