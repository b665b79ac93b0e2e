//! Win32 capture source: short names via `FindFirstFileW`, stream
//! enumeration via `FindFirstStreamW`, security descriptors via
//! `GetFileSecurityW`, reparse data via `FSCTL_GET_REPARSE_POINT`.

#![allow(unsafe_code)]

use std::ffi::OsStr;
use std::io::Read;
use std::os::windows::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_ACCESS_DENIED, ERROR_HANDLE_EOF, ERROR_NO_MORE_FILES,
    ERROR_PRIVILEGE_NOT_HELD, FILETIME, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Security::{
    GetFileSecurityW, DACL_SECURITY_INFORMATION, GROUP_SECURITY_INFORMATION,
    OWNER_SECURITY_INFORMATION, SACL_SECURITY_INFORMATION,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FindClose, FindFirstFileW, FindFirstStreamW, FindNextFileW, FindNextStreamW,
    FindStreamInfoStandard, GetFileInformationByHandle, BY_HANDLE_FILE_INFORMATION,
    FILE_ATTRIBUTE_DIRECTORY, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OPEN_REPARSE_POINT,
    FILE_GENERIC_READ, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
    WIN32_FIND_DATAW, WIN32_FIND_STREAM_DATA,
};
use windows_sys::Win32::System::Ioctl::FSCTL_GET_REPARSE_POINT;
use windows_sys::Win32::System::IO::DeviceIoControl;

use crate::capture::source::{CaptureSource, ReparseData, SourceKind, SourceMeta, StreamInfo};
use crate::error::Error;
use crate::lookup::ResourceLocation;
use crate::ondisk::{FileAttributes, FileTime, ReparseTag};
use crate::Result;

const MAXIMUM_REPARSE_DATA_BUFFER_SIZE: usize = 16384;

/// Capture source over the Win32 API.
#[derive(Debug, Default)]
pub struct Win32Source;

struct HandleGuard(HANDLE);

impl Drop for HandleGuard {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

struct FindGuard(HANDLE);

impl Drop for FindGuard {
    fn drop(&mut self) {
        unsafe {
            FindClose(self.0);
        }
    }
}

fn to_wide(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(Some(0)).collect()
}

fn filetime_ticks(ft: &FILETIME) -> FileTime {
    FileTime::from(((ft.dwHighDateTime as u64) << 32) | ft.dwLowDateTime as u64)
}

fn wide_cstr_to_string(buf: &[u16]) -> Result<String> {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16(&buf[..len])
        .map_err(|_| Error::InvalidUtf8(String::from_utf16_lossy(&buf[..len]).into()))
}

fn find_first(path: &Path) -> Result<WIN32_FIND_DATAW> {
    let wide = to_wide(path);
    let mut data: WIN32_FIND_DATAW = unsafe { std::mem::zeroed() };
    let handle = unsafe { FindFirstFileW(wide.as_ptr(), &mut data) };
    if handle == INVALID_HANDLE_VALUE {
        return Err(Error::Stat {
            path: path.to_path_buf(),
            source: std::io::Error::last_os_error(),
        });
    }
    let _guard = FindGuard(handle);
    Ok(data)
}

fn open_for_metadata(path: &Path, open_reparse: bool) -> Result<HandleGuard> {
    let wide = to_wide(path);
    let mut flags = FILE_FLAG_BACKUP_SEMANTICS;
    if open_reparse {
        flags |= FILE_FLAG_OPEN_REPARSE_POINT;
    }
    let handle = unsafe {
        CreateFileW(
            wide.as_ptr(),
            FILE_GENERIC_READ,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            std::ptr::null(),
            OPEN_EXISTING,
            flags,
            std::ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(Error::Open {
            path: path.to_path_buf(),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(HandleGuard(handle))
}

impl CaptureSource for Win32Source {
    fn stat(&mut self, path: &Path) -> Result<SourceMeta> {
        let data = find_first(path)?;
        let attributes = FileAttributes::from_u32(data.dwFileAttributes);
        let kind = if data.dwFileAttributes & FILE_ATTRIBUTE_DIRECTORY != 0 {
            SourceKind::Directory
        } else {
            SourceKind::Regular
        };

        // File index and link count come from an open handle; both are
        // best-effort.
        let mut ino = 0u64;
        let mut nlink = 1u64;
        if let Ok(handle) = open_for_metadata(path, true) {
            let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };
            if unsafe { GetFileInformationByHandle(handle.0, &mut info) } != 0 {
                ino = ((info.nFileIndexHigh as u64) << 32) | info.nFileIndexLow as u64;
                nlink = info.nNumberOfLinks as u64;
            }
        }

        Ok(SourceMeta {
            kind,
            attributes,
            creation_time: filetime_ticks(&data.ftCreationTime),
            last_write_time: filetime_ticks(&data.ftLastWriteTime),
            last_access_time: filetime_ticks(&data.ftLastAccessTime),
            ino,
            nlink,
            size: ((data.nFileSizeHigh as u64) << 32) | data.nFileSizeLow as u64,
            unix_data: None,
        })
    }

    fn read_dir(&mut self, path: &Path) -> Result<Vec<String>> {
        let pattern = path.join("*");
        let wide = to_wide(&pattern);
        let mut data: WIN32_FIND_DATAW = unsafe { std::mem::zeroed() };
        let handle = unsafe { FindFirstFileW(wide.as_ptr(), &mut data) };
        if handle == INVALID_HANDLE_VALUE {
            return Err(Error::Open {
                path: path.to_path_buf(),
                source: std::io::Error::last_os_error(),
            });
        }
        let _guard = FindGuard(handle);

        let mut names = Vec::new();
        loop {
            let name = wide_cstr_to_string(&data.cFileName)?;
            if name != "." && name != ".." {
                names.push(name);
            }
            if unsafe { FindNextFileW(handle, &mut data) } == 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(ERROR_NO_MORE_FILES as i32) {
                    break;
                }
                return Err(Error::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        }
        Ok(names)
    }

    fn read_reparse(&mut self, path: &Path) -> Result<ReparseData> {
        let handle = open_for_metadata(path, true)?;
        let mut buf = vec![0u8; MAXIMUM_REPARSE_DATA_BUFFER_SIZE];
        let mut returned = 0u32;
        let ok = unsafe {
            DeviceIoControl(
                handle.0,
                FSCTL_GET_REPARSE_POINT,
                std::ptr::null(),
                0,
                buf.as_mut_ptr().cast(),
                buf.len() as u32,
                &mut returned,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 || (returned as usize) < 8 {
            return Err(Error::Read {
                path: path.to_path_buf(),
                source: std::io::Error::last_os_error(),
            });
        }
        let tag = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let data = find_first(path)?;
        Ok(ReparseData {
            tag: ReparseTag(tag),
            body: buf[8..returned as usize].to_vec(),
            is_directory: data.dwFileAttributes & FILE_ATTRIBUTE_DIRECTORY != 0,
        })
    }

    fn enumerate_streams(&mut self, path: &Path, _meta: &SourceMeta) -> Result<Vec<StreamInfo>> {
        let wide = to_wide(path);
        let mut data: WIN32_FIND_STREAM_DATA = unsafe { std::mem::zeroed() };
        let handle = unsafe {
            FindFirstStreamW(wide.as_ptr(), FindStreamInfoStandard, (&mut data as *mut WIN32_FIND_STREAM_DATA).cast(), 0)
        };
        if handle == INVALID_HANDLE_VALUE {
            let err = std::io::Error::last_os_error();
            // Directories commonly have no streams at all.
            if err.raw_os_error() == Some(ERROR_HANDLE_EOF as i32) {
                return Ok(Vec::new());
            }
            return Err(Error::Open {
                path: path.to_path_buf(),
                source: err,
            });
        }
        let _guard = FindGuard(handle);

        let mut streams = Vec::new();
        loop {
            let decorated = wide_cstr_to_string(&data.cStreamName)?;
            // Stream names come decorated as `:name:$DATA`; only `$DATA`
            // streams carry file content.
            let mut parts = decorated.splitn(3, ':');
            let _ = parts.next();
            let name = parts.next().unwrap_or("");
            let kind = parts.next().unwrap_or("");
            if kind == "$DATA" {
                streams.push(StreamInfo {
                    name: if name.is_empty() {
                        None
                    } else {
                        Some(name.to_string())
                    },
                    size: data.StreamSize as u64,
                });
            }
            if unsafe { FindNextStreamW(handle, (&mut data as *mut WIN32_FIND_STREAM_DATA).cast()) } == 0 {
                break;
            }
        }
        // The unnamed stream, when present, goes first.
        streams.sort_by_key(|s| s.name.is_some());
        Ok(streams)
    }

    fn open_stream(&mut self, path: &Path, stream: &StreamInfo) -> Result<Box<dyn Read>> {
        let full = stream_path(path, stream);
        let file = std::fs::File::open(&full).map_err(|source| Error::Open {
            path: full,
            source,
        })?;
        Ok(Box::new(file))
    }

    fn stream_location(&self, path: &Path, stream: &StreamInfo) -> ResourceLocation {
        ResourceLocation::Win32Handle(to_wide(&stream_path(path, stream)))
    }

    fn read_security(&mut self, path: &Path) -> Result<Option<Vec<u8>>> {
        // The OWNER|GROUP|DACL|SACL union, i.e. BACKUP_SECURITY_INFORMATION
        // on SDKs that define it.
        let full = OWNER_SECURITY_INFORMATION
            | GROUP_SECURITY_INFORMATION
            | DACL_SECURITY_INFORMATION
            | SACL_SECURITY_INFORMATION;
        match get_file_security(path, full) {
            Ok(sd) => Ok(Some(sd)),
            Err(err)
                if err.raw_os_error() == Some(ERROR_ACCESS_DENIED as i32)
                    || err.raw_os_error() == Some(ERROR_PRIVILEGE_NOT_HELD as i32) =>
            {
                // Reading the SACL needs SeSecurityPrivilege; settle for the
                // rest when it is not held.
                match get_file_security(path, full & !SACL_SECURITY_INFORMATION) {
                    Ok(sd) => Ok(Some(sd)),
                    Err(err) => {
                        log::warn!(
                            "Failed to read security descriptor of {}: {err}",
                            path.display()
                        );
                        Ok(None)
                    }
                }
            }
            Err(err) => {
                log::warn!(
                    "Failed to read security descriptor of {}: {err}",
                    path.display()
                );
                Ok(None)
            }
        }
    }

    fn read_short_name(&mut self, path: &Path) -> Result<Option<Vec<u16>>> {
        let data = find_first(path)?;
        let len = data
            .cAlternateFileName
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(data.cAlternateFileName.len());
        if len == 0 {
            return Ok(None);
        }
        Ok(Some(data.cAlternateFileName[..len].to_vec()))
    }
}

fn stream_path(path: &Path, stream: &StreamInfo) -> PathBuf {
    match &stream.name {
        None => path.to_path_buf(),
        Some(name) => {
            let mut s = path.as_os_str().to_os_string();
            s.push(OsStr::new(&format!(":{name}")));
            PathBuf::from(s)
        }
    }
}

/// `GetFileSecurityW` with the double-probe calling convention: the first
/// call reports the needed length, the second fills the buffer.
fn get_file_security(path: &Path, selection: u32) -> std::io::Result<Vec<u8>> {
    let wide = to_wide(path);
    let mut needed = 0u32;
    unsafe {
        GetFileSecurityW(wide.as_ptr(), selection, std::ptr::null_mut(), 0, &mut needed);
    }
    if needed == 0 {
        return Err(std::io::Error::last_os_error());
    }
    let mut buf = vec![0u8; needed as usize];
    let ok = unsafe {
        GetFileSecurityW(
            wide.as_ptr(),
            selection,
            buf.as_mut_ptr().cast(),
            buf.len() as u32,
            &mut needed,
        )
    };
    if ok == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(buf)
}
