//! Small helpers shared by the Win32 integration modules.

use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;

/// Encode `s` as a NUL-terminated UTF-16 string
pub fn to_wide(s: impl AsRef<OsStr>) -> Vec<u16> {
    s.as_ref().encode_wide().chain(std::iter::once(0)).collect()
}

/// Decode a UTF-16 buffer up to its first NUL (or its end)
pub fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

/// Turn a Win32 `BOOL` result into `io::Result`, capturing the last error
pub fn check(ok: i32) -> io::Result<()> {
    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Turn a Win32 status code into `io::Result`
pub fn check_status(status: u32) -> io::Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(status as i32))
    }
}
