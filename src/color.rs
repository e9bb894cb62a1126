//! ANSI escape sequences used when rendering diagnostics on a terminal.

pub const RED: &str = "\x1b[31m";
pub const YELLOW: &str = "\x1b[33m";
pub const BLUE: &str = "\x1b[34m";
pub const BOLD: &str = "\x1b[1m";
pub const END: &str = "\x1b[0m";
