//! Win32 message window and message pump
//!
//! `RegisterHotKey` delivers `WM_HOTKEY` to the queue of the thread that owns
//! the target window. A hidden message-only window gives the agent such a
//! queue without ever showing anything on screen.

use std::io;
use std::marker::PhantomData;
use std::mem;
use std::ptr;

use tracing::{debug, error};
use windows_sys::Win32::Foundation::{ERROR_CLASS_ALREADY_EXISTS, HWND, LPARAM, LRESULT, WPARAM};
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::UI::Input::KeyboardAndMouse::{RegisterHotKey, UnregisterHotKey};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW, PostMessageW,
    PostQuitMessage, RegisterClassExW, TranslateMessage, HWND_MESSAGE, MSG, WM_APP, WM_HOTKEY,
    WNDCLASSEXW,
};

use super::dispatch::{HotkeyBackend, Signal};
use super::registry::Hotkey;
use crate::sys::{check, to_wide};

/// Posted by the config watcher
const WM_APP_RELOAD: u32 = WM_APP + 1;
/// Posted by the shutdown handler
const WM_APP_QUIT: u32 = WM_APP + 2;

const CLASS_NAME: &str = "HotkeyWindow";

unsafe extern "system" fn window_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    DefWindowProcW(hwnd, msg, wparam, lparam)
}

/// Hidden message-only window owned by the current thread.
///
/// Not `Send`: the window, its hotkeys and its message queue all belong to
/// the creating thread.
pub struct MessageWindow {
    hwnd: HWND,
    _thread_bound: PhantomData<*const ()>,
}

impl MessageWindow {
    /// Register the window class (once per process) and create the window
    pub fn create() -> io::Result<Self> {
        let class_name = to_wide(CLASS_NAME);
        let instance = unsafe { GetModuleHandleW(ptr::null()) };
        if instance.is_null() {
            return Err(io::Error::last_os_error());
        }

        let mut class: WNDCLASSEXW = unsafe { mem::zeroed() };
        class.cbSize = mem::size_of::<WNDCLASSEXW>() as u32;
        class.lpfnWndProc = Some(window_proc);
        class.hInstance = instance;
        class.lpszClassName = class_name.as_ptr();
        if unsafe { RegisterClassExW(&class) } == 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(ERROR_CLASS_ALREADY_EXISTS as i32) {
                return Err(err);
            }
        }

        let hwnd = unsafe {
            CreateWindowExW(
                0,
                class_name.as_ptr(),
                ptr::null(),
                0,
                0,
                0,
                0,
                0,
                HWND_MESSAGE,
                ptr::null_mut(),
                instance,
                ptr::null(),
            )
        };
        if hwnd.is_null() {
            return Err(io::Error::last_os_error());
        }
        debug!("message window created");
        Ok(Self {
            hwnd,
            _thread_bound: PhantomData,
        })
    }

    /// Backend registering hotkeys against this window
    pub fn hotkeys(&self) -> WindowHotkeys<'_> {
        WindowHotkeys { window: self }
    }

    /// Handle other threads can use to signal this window's loop
    pub fn poster(&self) -> SignalPoster {
        SignalPoster {
            hwnd: self.hwnd as usize,
        }
    }

    /// Iterator over signals arriving in this thread's queue
    pub fn pump(&self) -> MessagePump<'_> {
        MessagePump { _window: self }
    }
}

impl Drop for MessageWindow {
    fn drop(&mut self) {
        if let Err(e) = check(unsafe { DestroyWindow(self.hwnd) }) {
            debug!(?e, "DestroyWindow failed");
        }
    }
}

/// [`HotkeyBackend`] backed by `RegisterHotKey` on a [`MessageWindow`]
pub struct WindowHotkeys<'a> {
    window: &'a MessageWindow,
}

impl HotkeyBackend for WindowHotkeys<'_> {
    fn register(&mut self, hotkey: &Hotkey) -> io::Result<()> {
        check(unsafe {
            RegisterHotKey(
                self.window.hwnd,
                hotkey.id as i32,
                hotkey.modifiers.bits(),
                u32::from(hotkey.key_code),
            )
        })
    }

    fn unregister(&mut self, id: u32) {
        // failure only means it was never registered
        unsafe {
            UnregisterHotKey(self.window.hwnd, id as i32);
        }
    }
}

/// Thread-safe sender of signals into a window's message queue
#[derive(Debug, Clone, Copy)]
pub struct SignalPoster {
    hwnd: usize,
}

impl SignalPoster {
    /// Post `signal`; returns false if the window is gone
    pub fn post(&self, signal: Signal) -> bool {
        let (msg, wparam) = match signal {
            Signal::Hotkey(id) => (WM_HOTKEY, id as WPARAM),
            Signal::Reload => (WM_APP_RELOAD, 0),
            Signal::Quit => (WM_APP_QUIT, 0),
        };
        let ok = unsafe { PostMessageW(self.hwnd as HWND, msg, wparam, 0) };
        if ok == 0 {
            error!(e = %io::Error::last_os_error(), ?signal, "PostMessage failed");
        }
        ok != 0
    }
}

/// Blocks in `GetMessageW`, yielding hotkey, reload and quit signals and
/// dispatching everything else normally. Ends on `WM_QUIT`.
pub struct MessagePump<'a> {
    _window: &'a MessageWindow,
}

impl Iterator for MessagePump<'_> {
    type Item = Signal;

    fn next(&mut self) -> Option<Signal> {
        loop {
            let mut msg: MSG = unsafe { mem::zeroed() };
            let r = unsafe { GetMessageW(&mut msg, ptr::null_mut(), 0, 0) };
            match r {
                0 => return None,
                -1 => {
                    error!(e = %io::Error::last_os_error(), "GetMessage failed");
                    continue;
                }
                _ => {}
            }

            match msg.message {
                WM_HOTKEY => return Some(Signal::Hotkey(msg.wParam as u32)),
                WM_APP_RELOAD => return Some(Signal::Reload),
                WM_APP_QUIT => {
                    unsafe { PostQuitMessage(0) };
                    return Some(Signal::Quit);
                }
                _ => unsafe {
                    TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                },
            }
        }
    }
}
