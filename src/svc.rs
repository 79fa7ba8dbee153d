//! Service registry seam: kinds, records, and the in-core bookkeeping table.
//!
//! The parser registers declarations here; the state machine drives the
//! registry through [ServiceRegistry] without knowing anything about how
//! processes are actually supervised. The shipped [SvcTable] keeps the
//! registry's bookkeeping contract (mark/sweep, once-latching, teardown
//! discipline) while leaving fork/exec to whatever supervisor sits behind
//! the seam.

use crate::{
    conf::{self, rlimit::RlimitSet},
    early_logging::KConsole,
    sys::Platform,
    tty::TtyRegistry,
};
use bitflags::bitflags;
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Longest condition list accepted in a declaration; anything beyond is
/// truncated with a warning.
pub const COND_SIZE: usize = 64;

/// What flavor of unit a declaration registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvcKind {
    /// Monitored daemon, respawned on exit.
    Service,

    /// One-shot task, not respawned.
    Task,

    /// Like a task but holds back completion of the runlevel transition.
    Run,

    /// Classic inetd-style on-demand service.
    Inetd,
}
impl SvcKind {
    /// The kind as a [SvcKinds] mask bit.
    pub fn mask(self) -> SvcKinds {
        match self {
            SvcKind::Service => SvcKinds::SERVICE,
            SvcKind::Task => SvcKinds::TASK,
            SvcKind::Run => SvcKinds::RUN,
            SvcKind::Inetd => SvcKinds::INETD,
        }
    }
}
impl fmt::Display for SvcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SvcKind::Service => "service",
            SvcKind::Task => "task",
            SvcKind::Run => "run",
            SvcKind::Inetd => "inetd",
        })
    }
}

bitflags! {
    /// Set of unit kinds a `step_all` pass applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SvcKinds: u32 {
        /// Monitored daemons.
        const SERVICE = 0x01;

        /// One-shot tasks.
        const TASK = 0x02;

        /// Blocking run tasks.
        const RUN = 0x04;

        /// inetd-style services.
        const INETD = 0x08;
    }
}
impl SvcKinds {
    /// Every kind.
    pub const ANY: SvcKinds = SvcKinds::all();
}

/// Bookkeeping state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvcState {
    /// Not running.
    Halted,

    /// Running (or, for one-shots, already dispatched).
    Running,
}

/// One registered unit.
#[derive(Debug, Clone)]
pub struct Svc {
    /// Unit flavor.
    pub kind: SvcKind,

    /// Executable path, also the unit's identity within its kind.
    pub cmd: String,

    /// Arguments following the executable.
    pub args: Vec<String>,

    /// Free-text description after ` -- `, if any.
    pub desc: Option<String>,

    /// Runlevel bitmask the unit is allowed to run in.
    pub runlevels: u16,

    /// Declared condition list, empty when unconditional.
    pub cond: String,

    /// Whether the daemon tolerates SIGHUP-triggered reloads.
    pub sighup: bool,

    /// Resource limits the unit runs under.
    pub rlimits: RlimitSet,

    /// File this declaration came from, `None` for the root configuration.
    pub origin: Option<PathBuf>,

    state: SvcState,
    marked: bool,
    once: bool,
}
impl Svc {
    /// Daemons are the only kind expected to outlive their startup.
    pub fn is_daemon(&self) -> bool {
        matches!(self.kind, SvcKind::Service)
    }

    /// Current bookkeeping state.
    pub fn state(&self) -> SvcState {
        self.state
    }

    fn allowed_in(&self, runlevel: u8) -> bool {
        self.runlevels & (1u16 << runlevel) != 0
    }
}

/// Reference to a unit that is still winding down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvcRef {
    /// Executable path of the stopping unit.
    pub cmd: String,

    /// PID being collected.
    pub pid: i32,
}

/// The registry contract the supervisor core drives.
pub trait ServiceRegistry {
    /// Register a declaration, replacing any earlier one for the same
    /// (kind, command) pair and clearing its sweep mark.
    fn register(
        &mut self,
        kind: SvcKind,
        decl: &str,
        rlimits: &RlimitSet,
        origin: Option<&Path>,
        kcon: &mut KConsole,
    );

    /// Flag every unit as a removal candidate ahead of a reload.
    fn mark_dynamic(&mut self);

    /// Unregister every unit still flagged after the reload re-registered
    /// the survivors.
    fn clean_dynamic(&mut self, kcon: &mut KConsole);

    /// Reset the once-latch of run/task units so the next runlevel change
    /// dispatches them again.
    fn runtask_clean(&mut self);

    /// Advance every unit of the given kinds toward the target runlevel.
    /// With `in_teardown` set this pass only stops units; otherwise it only
    /// starts them.
    fn step_all(&mut self, kinds: SvcKinds, runlevel: u8, in_teardown: bool, kcon: &mut KConsole);

    /// A unit still stopping, if any. The state machine stays in its wait
    /// state until this drains.
    fn stop_completed(&mut self) -> Option<SvcRef>;
}

/// Mutable references to every collaborator the core drives in one step.
pub struct Backends<'a> {
    /// Service registry.
    pub svc: &'a mut dyn ServiceRegistry,

    /// TTY registry.
    pub tty: &'a mut dyn TtyRegistry,

    /// System glue.
    pub sys: &'a mut dyn Platform,
}

/// Bookkeeping [ServiceRegistry].
///
/// Stops complete synchronously here (there are no child processes to
/// collect), so [ServiceRegistry::stop_completed] never reports a pending
/// unit.
#[derive(Debug, Default)]
pub struct SvcTable {
    units: Vec<Svc>,
}
impl SvcTable {
    /// Empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether no units are registered.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Look up a unit by command path.
    pub fn get(&self, cmd: &str) -> Option<&Svc> {
        self.units.iter().find(|u| u.cmd == cmd)
    }

    /// All registered units, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Svc> {
        self.units.iter()
    }

    fn parse_decl(
        kind: SvcKind,
        decl: &str,
        rlimits: &RlimitSet,
        origin: Option<&Path>,
        kcon: &mut KConsole,
    ) -> Option<Svc> {
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

        let mut cond = None;
        if let Some(inner) = rest.strip_prefix('<') {
            match inner.find('>') {
                Some(i) => {
                    cond = Some(&inner[..=i]);
                    rest = inner[i + 1..].trim_start();
                }
                None => {
                    cond = Some(inner);
                    rest = "";
                }
            }
        }

        let (cmdline, desc) = match rest.split_once(" -- ") {
            Some((cmdline, desc)) => (cmdline.trim(), Some(desc.trim().to_string())),
            None => (rest, None),
        };

        let mut words = cmdline.split_whitespace();
        let cmd = match words.next() {
            Some(cmd) => cmd.to_string(),
            None => {
                kwarn!(kcon, "skipping incomplete {} declaration: {}", kind, decl.trim());
                return None;
            }
        };
        let args: Vec<String> = words.map(str::to_string).collect();

        let mut svc = Svc {
            kind,
            cmd,
            args,
            desc,
            runlevels,
            cond: String::new(),
            sighup: false,
            rlimits: rlimits.clone(),
            origin: origin.map(Path::to_path_buf),
            state: SvcState::Halted,
            marked: false,
            once: false,
        };
        conf::parse_cond(&mut svc, cond, kcon);

        Some(svc)
    }
}
impl ServiceRegistry for SvcTable {
    fn register(
        &mut self,
        kind: SvcKind,
        decl: &str,
        rlimits: &RlimitSet,
        origin: Option<&Path>,
        kcon: &mut KConsole,
    ) {
        let svc = match Self::parse_decl(kind, decl, rlimits, origin, kcon) {
            Some(svc) => svc,
            None => return,
        };

        if let Some(existing) = self
            .units
            .iter_mut()
            .find(|u| u.kind == kind && u.cmd == svc.cmd)
        {
            let state = existing.state;
            let once = existing.once;
            *existing = Svc { state, once, ..svc };
            kdebug!(kcon, "re-registered {} {}", kind, existing.cmd);
        } else {
            kdebug!(kcon, "registered {} {}", kind, svc.cmd);
            self.units.push(svc);
        }
    }

    fn mark_dynamic(&mut self) {
        for unit in &mut self.units {
            unit.marked = true;
        }
    }

    fn clean_dynamic(&mut self, kcon: &mut KConsole) {
        self.units.retain(|unit| {
            if unit.marked {
                kdebug!(kcon, "unregistering stale {} {}", unit.kind, unit.cmd);
                false
            } else {
                true
            }
        });
    }

    fn runtask_clean(&mut self) {
        for unit in &mut self.units {
            if matches!(unit.kind, SvcKind::Task | SvcKind::Run) {
                unit.once = false;
            }
        }
    }

    fn step_all(&mut self, kinds: SvcKinds, runlevel: u8, in_teardown: bool, kcon: &mut KConsole) {
        for unit in &mut self.units {
            if !kinds.intersects(unit.kind.mask()) {
                continue;
            }

            if in_teardown {
                if unit.state == SvcState::Running
                    && (!unit.allowed_in(runlevel) || unit.marked)
                {
                    kinfo!(kcon, "stopping {}", unit.cmd);
                    unit.state = SvcState::Halted;
                }
            } else if unit.state == SvcState::Halted
                && unit.allowed_in(runlevel)
                && !unit.marked
            {
                if matches!(unit.kind, SvcKind::Task | SvcKind::Run) {
                    if unit.once {
                        continue;
                    }
                    unit.once = true;
                }
                kinfo!(kcon, "starting {}", unit.cmd);
                unit.state = SvcState::Running;
            }
        }
    }

    fn stop_completed(&mut self) -> Option<SvcRef> {
        None
    }
}
