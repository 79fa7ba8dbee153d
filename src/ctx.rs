//! Process-wide supervisor state, bundled into one owned context.
//!
//! Everything the parser and the state machine agree on lives here: the
//! runlevel trio, the owned strings collected from the root configuration,
//! the global resource-limit baseline, and the on-disk paths the supervisor
//! reads and touches. The context is created once in `main` and threaded
//! explicitly through every component; no global variables exist.

use crate::{conf::rlimit::RlimitSet, sys::HaltKind};
use std::path::PathBuf;

/// Runlevel entered after bootstrap when the configuration does not pick one.
pub const RUNLEVEL_DEFAULT: u8 = 2;

/// Root configuration file.
pub const EMBERD_CONF: &str = "/etc/emberd.conf";

/// Drop-in directory holding per-service `*.conf` files.
pub const EMBERD_RCSD: &str = "/etc/emberd.d";

/// On-disk paths read and managed by the supervisor.
///
/// Carried in the context rather than hardcoded so the parser, monitor and
/// state machine can be pointed at scratch directories.
#[derive(Debug, Clone)]
pub struct ConfPaths {
    /// Root configuration file, normally [EMBERD_CONF].
    pub conf: PathBuf,

    /// Drop-in directory, normally [EMBERD_RCSD].
    pub rcsd: PathBuf,

    /// Login lockout file managed during runlevel changes.
    pub nologin: PathBuf,

    /// System hostname file, overriding any `host` directive.
    pub hostname_file: PathBuf,
}
impl Default for ConfPaths {
    fn default() -> Self {
        ConfPaths {
            conf: EMBERD_CONF.into(),
            rcsd: EMBERD_RCSD.into(),
            nologin: "/etc/nologin".into(),
            hostname_file: "/etc/hostname".into(),
        }
    }
}

/// The supervisor's process-wide mutable state.
#[derive(Debug)]
pub struct InitContext {
    /// Active runlevel, 0..9. 0 = halt, 6 = reboot, others user-defined.
    /// Only the state machine writes this once bootstrap has begun.
    pub runlevel: u8,

    /// Runlevel active before the most recent change.
    pub prevlevel: u8,

    /// Runlevel to enter once bootstrap completes. Set by the `runlevel`
    /// directive in the root configuration; never 6.
    pub cfglevel: u8,

    /// Hostname from the `host` directive, later resolved against the
    /// hostname file.
    pub hostname: Option<String>,

    /// Command bringing up networking, from the `network` directive.
    pub network: Option<String>,

    /// Directory of scripts to run-parts after bootstrap, from `runparts`.
    pub runparts: Option<String>,

    /// Command run at shutdown, from the `shutdown` directive.
    pub sdown: Option<String>,

    /// Global resource-limit baseline: applied to the supervisor itself and
    /// seeding the per-file scratch vector of every drop-in.
    pub rlimits: RlimitSet,

    /// How a pending runlevel-0 request wants the machine turned off.
    pub halt: HaltKind,

    /// Paths the supervisor operates on.
    pub paths: ConfPaths,
}
impl InitContext {
    /// Fresh context in bootstrap state.
    pub fn new(paths: ConfPaths) -> Self {
        InitContext {
            runlevel: 0,
            prevlevel: 0,
            cfglevel: RUNLEVEL_DEFAULT,
            hostname: None,
            network: None,
            runparts: None,
            sdown: None,
            rlimits: RlimitSet::unlimited(),
            halt: HaltKind::default(),
            paths,
        }
    }

    /// Bootstrap is runlevel 0: the root configuration has not yet handed
    /// control to a real runlevel.
    pub fn in_bootstrap(&self) -> bool {
        self.runlevel == 0
    }
}
