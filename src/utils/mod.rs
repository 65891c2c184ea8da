use std::io;
use std::path::PathBuf;

use which::which;

/// Finds an executable in the system PATH.
pub fn find_executable(name: &str) -> io::Result<PathBuf> {
    which(name).map_err(|e| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} executable not found in PATH: {}", name, e),
        )
    })
}

/// Formats a byte count as mebibytes with two decimals.
pub fn format_mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}
