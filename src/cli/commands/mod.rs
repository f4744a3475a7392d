//! CLI command implementations

pub mod cache;
pub mod completions;
pub mod config;
pub mod convert;
pub mod fetch;
pub mod run;
pub mod status;

pub use cache::execute as cache;
pub use completions::execute as completions;
pub use config::execute as config;
pub use convert::execute as convert;
pub use fetch::execute as fetch;
pub use run::execute as run;
pub use status::execute as status;

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
