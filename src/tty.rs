//! TTY registry seam: getty/terminal declarations and their bookkeeping.
//!
//! TTYs share the mark-and-sweep reload discipline of services but start on
//! their own schedule: never during bootstrap, only once the first real
//! runlevel change completes.

use crate::{conf, conf::rlimit::RlimitSet, early_logging::KConsole};
use std::path::{Path, PathBuf};

/// One registered terminal.
#[derive(Debug, Clone)]
pub struct Tty {
    /// Terminal device, e.g. `/dev/ttyAMA0`.
    pub dev: String,

    /// Remaining declaration words (baud rate, term type, getty options).
    pub args: Vec<String>,

    /// Runlevel bitmask this terminal is allowed to run a getty in.
    pub runlevels: u16,

    /// Resource limits inherited by the getty process.
    pub rlimits: RlimitSet,

    /// File this declaration came from, `None` for the root configuration.
    pub origin: Option<PathBuf>,

    started: bool,
    marked: bool,
}
impl Tty {
    /// Whether a getty is currently wanted on this terminal.
    pub fn is_started(&self) -> bool {
        self.started
    }

    fn allowed_in(&self, runlevel: u8) -> bool {
        self.runlevels & (1u16 << runlevel) != 0
    }
}

/// Registry of terminal declarations.
pub trait TtyRegistry {
    /// Register a `tty` declaration, replacing any earlier declaration for
    /// the same device and clearing its sweep mark.
    fn register(
        &mut self,
        decl: &str,
        rlimits: &RlimitSet,
        origin: Option<&Path>,
        kcon: &mut KConsole,
    );

    /// Flag every terminal as a removal candidate ahead of a reload.
    fn mark(&mut self);

    /// Drop terminals whose declarations went away in the last reload.
    fn reload(&mut self, kcon: &mut KConsole);

    /// Start gettys allowed in `runlevel` and retire the rest.
    fn start_runlevel(&mut self, runlevel: u8, kcon: &mut KConsole);
}

/// Bookkeeping [TtyRegistry]. Tracks desired getty state; actual spawning
/// belongs to the process supervisor plugged in behind this seam.
#[derive(Debug, Default)]
pub struct TtyTable {
    ttys: Vec<Tty>,
}
impl TtyTable {
    /// Empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Number of registered terminals.
    pub fn len(&self) -> usize {
        self.ttys.len()
    }

    /// Look up a terminal by device path.
    pub fn get(&self, dev: &str) -> Option<&Tty> {
        self.ttys.iter().find(|t| t.dev == dev)
    }
}
impl TtyRegistry for TtyTable {
    fn register(
        &mut self,
        decl: &str,
        rlimits: &RlimitSet,
        origin: Option<&Path>,
        kcon: &mut KConsole,
    ) {
        let mut rest = decl.trim();

        let mut runlevels_arg = None;
        if rest.starts_with('[') {
            match rest.find(']') {
                Some(i) => {
                    runlevels_arg = Some(&rest[..=i]);
                    rest = rest[i + 1..].trim_start();
                }
                None => {
                    runlevels_arg = Some(rest);
                    rest = "";
                }
            }
        }
        let runlevels = conf::parse_runlevels(runlevels_arg);

        let mut words = rest.split_whitespace();
        let dev = match words.next() {
            Some(dev) => dev.to_string(),
            None => {
                kwarn!(kcon, "skipping incomplete tty declaration: {}", decl.trim());
                return;
            }
        };
        let args: Vec<String> = words.map(str::to_string).collect();

        let tty = Tty {
            dev,
            args,
            runlevels,
            rlimits: rlimits.clone(),
            origin: origin.map(Path::to_path_buf),
            started: false,
            marked: false,
        };

        if let Some(existing) = self.ttys.iter_mut().find(|t| t.dev == tty.dev) {
            let started = existing.started;
            *existing = Tty { started, ..tty };
            kdebug!(kcon, "re-registered tty {}", existing.dev);
        } else {
            kdebug!(kcon, "registered tty {}", tty.dev);
            self.ttys.push(tty);
        }
    }

    fn mark(&mut self) {
        for tty in &mut self.ttys {
            tty.marked = true;
        }
    }

    fn reload(&mut self, kcon: &mut KConsole) {
        self.ttys.retain(|tty| {
            if tty.marked {
                kdebug!(kcon, "unregistering stale tty {}", tty.dev);
                false
            } else {
                true
            }
        });
    }

    fn start_runlevel(&mut self, runlevel: u8, kcon: &mut KConsole) {
        for tty in &mut self.ttys {
            if tty.allowed_in(runlevel) {
                if !tty.started {
                    kinfo!(kcon, "starting getty on {}", tty.dev);
                    tty.started = true;
                }
            } else if tty.started {
                kinfo!(kcon, "stopping getty on {}", tty.dev);
                tty.started = false;
            }
        }
    }
}
