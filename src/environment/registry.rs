//! Persisted environment variables from the Windows registry.

use std::io;
use std::ptr;

use windows_sys::Win32::Foundation::{ERROR_MORE_DATA, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS};
use windows_sys::Win32::System::Registry::{
    RegCloseKey, RegEnumValueW, RegOpenKeyExW, HKEY, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE,
    KEY_READ, REG_EXPAND_SZ, REG_SZ,
};

use super::EnvTable;
use crate::sys::{check_status, from_wide, to_wide};

const MACHINE_KEY: &str = r"SYSTEM\CurrentControlSet\Control\Session Manager\Environment";
const USER_KEY: &str = "Environment";

/// Variables every user on the machine gets
pub fn machine_variables() -> io::Result<EnvTable> {
    read_string_values(HKEY_LOCAL_MACHINE, MACHINE_KEY)
}

/// Variables persisted for the current user
pub fn user_variables() -> io::Result<EnvTable> {
    read_string_values(HKEY_CURRENT_USER, USER_KEY)
}

/// Closes the key on drop
struct Key(HKEY);

impl Drop for Key {
    fn drop(&mut self) {
        unsafe {
            RegCloseKey(self.0);
        }
    }
}

fn read_string_values(root: HKEY, path: &str) -> io::Result<EnvTable> {
    let subkey = to_wide(path);
    let mut raw: HKEY = ptr::null_mut();
    check_status(unsafe { RegOpenKeyExW(root, subkey.as_ptr(), 0, KEY_READ, &mut raw) })?;
    let key = Key(raw);

    let mut table = EnvTable::new();
    let mut name = vec![0u16; 16_384];
    let mut data = vec![0u8; 8_192];
    let mut index = 0;
    loop {
        let mut name_len = name.len() as u32;
        let mut data_len = data.len() as u32;
        let mut kind = 0u32;
        let status = unsafe {
            RegEnumValueW(
                key.0,
                index,
                name.as_mut_ptr(),
                &mut name_len,
                ptr::null(),
                &mut kind,
                data.as_mut_ptr(),
                &mut data_len,
            )
        };
        match status {
            ERROR_SUCCESS => {}
            ERROR_NO_MORE_ITEMS => break,
            ERROR_MORE_DATA => {
                // data_len now holds the required size; retry this index
                data.resize(data_len as usize + 2, 0);
                continue;
            }
            other => return Err(io::Error::from_raw_os_error(other as i32)),
        }
        index += 1;

        if kind != REG_SZ && kind != REG_EXPAND_SZ {
            continue;
        }
        let wide: Vec<u16> = data[..data_len as usize]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        table.set(
            String::from_utf16_lossy(&name[..name_len as usize]),
            from_wide(&wide),
        );
    }
    Ok(table)
}
