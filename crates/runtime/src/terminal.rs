//! Terminal control shims (`TermSetOptions` / `TermUnsetOptions`).
//!
//! Toggles echo and canonical (line-buffered) mode on the controlling
//! terminal through termios. Everything answers false when stdin is not a
//! terminal.

/// Terminal option flags.
pub const TERM_OPT_ECHO: i32 = 1 << 0;
pub const TERM_OPT_BUFFERING: i32 = 1 << 1;

#[cfg(unix)]
pub fn has_terminal() -> bool {
    unsafe { libc::isatty(0) == 1 }
}

#[cfg(not(unix))]
pub fn has_terminal() -> bool {
    false
}

#[cfg(unix)]
fn update_term_opts(opts: i32, enable: bool) -> bool {
    if !has_terminal() {
        return false;
    }
    unsafe {
        let mut term: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(0, &mut term) != 0 {
            return false;
        }

        let mut mask: libc::tcflag_t = 0;
        if opts & TERM_OPT_ECHO != 0 {
            mask |= libc::ECHO;
        }
        if opts & TERM_OPT_BUFFERING != 0 {
            mask |= libc::ICANON;
        }

        if enable {
            term.c_lflag |= mask;
        } else {
            term.c_lflag &= !mask;
        }
        libc::tcsetattr(0, libc::TCSANOW, &term) == 0
    }
}

#[cfg(not(unix))]
fn update_term_opts(_opts: i32, _enable: bool) -> bool {
    false
}

pub fn set_term_opts(opts: i32) -> bool {
    update_term_opts(opts, true)
}

pub fn unset_term_opts(opts: i32) -> bool {
    update_term_opts(opts, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_fail_without_a_terminal() {
        // Test runners detach stdin from the terminal; both paths must
        // answer false instead of touching the termios state.
        if !has_terminal() {
            assert!(!set_term_opts(TERM_OPT_ECHO));
            assert!(!unset_term_opts(TERM_OPT_BUFFERING));
        }
    }
}
