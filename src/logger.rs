//! Colored `[module]` log lines on stderr.
//!
//! - `log!` always prints
//! - `debug!` prints only in verbose mode
//! - `debug_do!` runs a block only in verbose mode
//!
//! kiln is embedded in a host orchestrator that owns stdout, so nothing here
//! writes to it.
//!
//! ```ignore
//! log!("build"; "{} modules loaded", count);
//! debug!("evict"; "{}", filename.display());
//! ```

use std::fmt;
use std::io::{Write, stderr};
use std::sync::atomic::{AtomicBool, Ordering};

use owo_colors::OwoColorize;

static VERBOSE: AtomicBool = AtomicBool::new(false);

pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// `log!("module"; "format {}", args)`
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, format_args!($($arg)*))
    }};
}

/// Like `log!`, silent unless verbose.
#[macro_export]
macro_rules! debug {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::is_verbose() {
            $crate::logger::log($module, format_args!($($arg)*))
        }
    }};
}

/// Run the block only when verbose, for diagnostics that cost something to build.
///
/// ```ignore
/// debug_do! {
///     let held = mutex.held_keys();
///     debug!("lock"; "held: {:?}", held);
/// }
/// ```
#[macro_export]
macro_rules! debug_do {
    ($($body:tt)*) => {{
        if $crate::logger::is_verbose() {
            $($body)*
        }
    }};
}

pub fn log(module: &str, message: fmt::Arguments<'_>) {
    let prefix = prefix(module);
    let mut stderr = stderr().lock();
    writeln!(stderr, "{prefix} {message}").ok();
}

/// Failures red, evictions yellow, lock traffic magenta, the rest blue.
fn prefix(module: &str) -> String {
    let tag = format!("[{module}]");
    if module.eq_ignore_ascii_case("error") {
        tag.bright_red().bold().to_string()
    } else if module.eq_ignore_ascii_case("evict") {
        tag.bright_yellow().bold().to_string()
    } else if module.eq_ignore_ascii_case("lock") {
        tag.bright_magenta().bold().to_string()
    } else {
        tag.bright_blue().bold().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_toggle() {
        set_verbose(true);
        assert!(is_verbose());
        set_verbose(false);
        assert!(!is_verbose());
    }

    #[test]
    fn test_prefix_keeps_module_name() {
        assert!(prefix("cache").contains("[cache]"));
        assert!(prefix("Evict").contains("[Evict]"));
        assert_ne!(prefix("evict"), prefix("cache"));
    }
}
