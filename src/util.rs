//! Miscellaneous functions that don't fit in any other (rust code) module.

use crate::{ctx::InitContext, early_logging::KConsole};
use std::{fs::File, path::Path};

/// Hostname used when neither the hostname file nor the configuration
/// provides one.
pub const DEFAULT_HOSTNAME: &str = "noname";

/// Create `path` as an empty file. An existing file is truncated, which is
/// equivalent for the marker files this is used on.
pub fn touch(path: &Path, kcon: &mut KConsole) {
    if let Err(io) = File::create(path) {
        kdebug!(kcon, "failed touching {}: {}", path.display(), io);
    }
}

/// Remove `path`, treating absence as success.
pub fn erase(path: &Path, kcon: &mut KConsole) {
    if let Err(io) = std::fs::remove_file(path) {
        if io.kind() != std::io::ErrorKind::NotFound {
            kdebug!(kcon, "failed erasing {}: {}", path.display(), io);
        }
    }
}

/// Resolve the effective hostname: the hostname file wins over the `host`
/// directive, and [DEFAULT_HOSTNAME] backstops both. The resolved name is
/// stored back into the context.
pub fn resolve_hostname(context: &mut InitContext) -> String {
    let mut hostname = context.hostname.clone();
    if let Ok(contents) = std::fs::read_to_string(&context.paths.hostname_file) {
        let contents = contents.trim();
        if !contents.is_empty() {
            hostname = Some(contents.to_string());
        }
    }

    let hostname = hostname.unwrap_or_else(|| DEFAULT_HOSTNAME.to_string());
    context.hostname = Some(hostname.clone());
    hostname
}
