//! Windows system proxy via the per-user Internet Settings registry key
//!
//! Writes `ProxyEnable` / `ProxyServer` under
//! `HKCU\Software\Microsoft\Windows\CurrentVersion\Internet Settings`, then
//! tells WinINet to reload so running applications pick the change up.

use std::ffi::OsStr;
use std::iter::once;
use std::os::windows::ffi::OsStrExt;
use std::ptr;

use tracing::{debug, info};
use winapi::shared::minwindef::{DWORD, HKEY};
use winapi::shared::winerror::ERROR_SUCCESS;
use winapi::um::wininet::{
    InternetSetOptionW, INTERNET_OPTION_REFRESH, INTERNET_OPTION_SETTINGS_CHANGED,
};
use winapi::um::winnt::{KEY_WRITE, REG_DWORD, REG_SZ};
use winapi::um::winreg::{RegCloseKey, RegOpenKeyExW, RegSetValueExW, HKEY_CURRENT_USER};

use crate::error::{PlatformError, Result};
use crate::system_proxy::{proxy_server_value, validate_address};

const INTERNET_SETTINGS: &str = r"Software\Microsoft\Windows\CurrentVersion\Internet Settings";

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(once(0)).collect()
}

/// Open registry key, closed on drop
struct RegKey(HKEY);

impl RegKey {
    fn open_current_user(path: &str) -> Result<Self> {
        let path_w = wide(path);
        let mut key: HKEY = ptr::null_mut();
        // SAFETY: path_w is NUL-terminated and outlives the call; key is a valid out pointer
        let status = unsafe { RegOpenKeyExW(HKEY_CURRENT_USER, path_w.as_ptr(), 0, KEY_WRITE, &mut key) };
        if status as DWORD != ERROR_SUCCESS {
            return Err(PlatformError::Registry {
                key: path.to_string(),
                code: status as u32,
            });
        }
        Ok(Self(key))
    }

    fn set_raw(&self, name: &str, kind: DWORD, data: &[u8]) -> Result<()> {
        let name_w = wide(name);
        // SAFETY: the key is open, name_w is NUL-terminated and data is valid for data.len() bytes
        let status = unsafe {
            RegSetValueExW(
                self.0,
                name_w.as_ptr(),
                0,
                kind,
                data.as_ptr(),
                data.len() as DWORD,
            )
        };
        if status as DWORD != ERROR_SUCCESS {
            return Err(PlatformError::Registry {
                key: name.to_string(),
                code: status as u32,
            });
        }
        Ok(())
    }

    fn set_dword(&self, name: &str, value: u32) -> Result<()> {
        self.set_raw(name, REG_DWORD, &value.to_ne_bytes())
    }

    fn set_string(&self, name: &str, value: &str) -> Result<()> {
        let bytes: Vec<u8> = wide(value).iter().flat_map(|c| c.to_ne_bytes()).collect();
        self.set_raw(name, REG_SZ, &bytes)
    }
}

impl Drop for RegKey {
    fn drop(&mut self) {
        // SAFETY: the handle came from RegOpenKeyExW and is closed exactly once
        unsafe {
            RegCloseKey(self.0);
        }
    }
}

fn refresh_wininet(option: DWORD) -> Result<()> {
    // SAFETY: both options take no buffer
    let ok = unsafe { InternetSetOptionW(ptr::null_mut(), option, ptr::null_mut(), 0) };
    if ok == 0 {
        return Err(PlatformError::WinInet { option });
    }
    Ok(())
}

/// Set or clear the current user's WinINet proxy
pub fn set_proxy(enable: bool, address: &str) -> Result<()> {
    if enable {
        validate_address(address)?;
    }

    let key = RegKey::open_current_user(INTERNET_SETTINGS)?;
    key.set_dword("ProxyEnable", u32::from(enable))?;
    key.set_string("ProxyServer", &proxy_server_value(enable, address))?;
    drop(key);
    debug!(enable, address, "Internet Settings updated");

    refresh_wininet(INTERNET_OPTION_SETTINGS_CHANGED)?;
    refresh_wininet(INTERNET_OPTION_REFRESH)?;

    if enable {
        info!(address, "Windows proxy enabled");
    } else {
        info!("Windows proxy disabled");
    }
    Ok(())
}
