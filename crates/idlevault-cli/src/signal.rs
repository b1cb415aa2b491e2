use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Set on the first SIGINT/SIGTERM (Ctrl-C or console close on Windows).
pub static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Install handlers that raise [`SHUTDOWN`].
///
/// The first signal also restores the default handler, so a second one
/// terminates the process immediately.
pub fn install_signal_handlers() {
    #[cfg(unix)]
    {
        // Safety: the handler only stores an atomic and resets the disposition.
        unsafe {
            libc::signal(
                libc::SIGTERM,
                unix_signal_handler as *const () as libc::sighandler_t,
            );
            libc::signal(
                libc::SIGINT,
                unix_signal_handler as *const () as libc::sighandler_t,
            );
        }
    }

    #[cfg(windows)]
    {
        unsafe {
            windows_sys::Win32::System::Console::SetConsoleCtrlHandler(
                Some(windows_console_handler),
                1,
            );
        }
    }
}

/// Block until a shutdown signal arrives.
pub fn wait_for_shutdown(poll: Duration) {
    while !SHUTDOWN.load(Ordering::SeqCst) {
        std::thread::sleep(poll);
    }
}

#[cfg(unix)]
extern "C" fn unix_signal_handler(sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
    }
}

#[cfg(windows)]
unsafe extern "system" fn windows_console_handler(ctrl_type: u32) -> i32 {
    // CTRL_C_EVENT (0), CTRL_BREAK_EVENT (1), CTRL_CLOSE_EVENT (2)
    if ctrl_type <= 2 {
        SHUTDOWN.store(true, Ordering::SeqCst);
        windows_sys::Win32::System::Console::SetConsoleCtrlHandler(
            Some(windows_console_handler),
            0,
        );
        return 1;
    }
    0
}
