//! System glue behind the platform seam: hook dispatch, external commands,
//! runlevel records and the final shutdown.
//!
//! The supervisor core only ever talks to these facilities through the
//! [Platform] trait, so the whole surface can be replaced wholesale — by a
//! plugin host, or by a recorder in tests.

use crate::early_logging::KConsole;
use nix::sys::reboot::{reboot, RebootMode};
use nix::unistd::sync;
use std::{fmt, process::Command};

/// Well-known points in the supervisor's lifecycle where plugins may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// The machine is about to halt, power off or reboot.
    Shutdown,

    /// A runlevel change finished tearing down and is about to start the
    /// new cohort.
    RunlevelChange,

    /// A configuration reload finished restarting affected services.
    SvcReconf,
}
impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Hook::Shutdown => "shutdown",
            Hook::RunlevelChange => "runlevel-change",
            Hook::SvcReconf => "svc-reconf",
        })
    }
}

/// How the machine should be turned off once runlevel 0 or 6 has finished
/// tearing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HaltKind {
    /// Halt the CPU without cutting power.
    #[default]
    Halt,

    /// Power the machine off.
    PowerOff,

    /// Restart the machine.
    Reboot,
}

/// Everything the supervisor core asks of the surrounding system.
pub trait Platform {
    /// Run an external command, announcing it on the console first.
    fn run_interactive(&mut self, cmd: &str, msg: &str, kcon: &mut KConsole);

    /// Re-evaluate every service condition after a configuration reload so
    /// services whose conditions went away drop back to waiting.
    fn cond_reload(&mut self, kcon: &mut KConsole);

    /// Dispatch all plugins registered for `hook`.
    fn run_hooks(&mut self, hook: Hook, kcon: &mut KConsole);

    /// Record a runlevel transition (utmp/wtmp bookkeeping).
    fn runlevel_set(&mut self, prev: u8, new: u8, kcon: &mut KConsole);

    /// Final descent: sync and take the machine down.
    fn do_shutdown(&mut self, kind: HaltKind, kcon: &mut KConsole);

    /// Restore terse console logging ahead of shutdown output.
    fn log_exit(&mut self, kcon: &mut KConsole);

    /// Apply the resolved system hostname.
    fn set_hostname(&mut self, hostname: &str, kcon: &mut KConsole);
}

/// The real system. Hook dispatch and utmp accounting are reduced to log
/// records here; a plugin host slots in through [Platform] without touching
/// the core.
#[derive(Debug, Default)]
pub struct SystemPlatform;
impl SystemPlatform {
    /// Construct the platform glue.
    pub fn new() -> Self {
        SystemPlatform
    }

    fn spawn(cmd: &str) -> Result<(), String> {
        let mut words = cmd.split_whitespace();
        let program = words.next().ok_or_else(|| "empty command".to_string())?;

        let status = Command::new(program)
            .args(words)
            .status()
            .map_err(|io| format!("unable to execute '{}': {}", program, io))?;

        if status.success() {
            Ok(())
        } else if let Some(code) = status.code() {
            Err(format!("'{}' exited with code {}", program, code))
        } else {
            Err(format!("'{}' was signaled", program))
        }
    }
}
impl Platform for SystemPlatform {
    fn run_interactive(&mut self, cmd: &str, msg: &str, kcon: &mut KConsole) {
        kinfo!(kcon, "{}", msg);
        if let Err(e) = Self::spawn(cmd) {
            kwarn!(kcon, "{}", e);
        }
    }

    fn cond_reload(&mut self, kcon: &mut KConsole) {
        kdebug!(kcon, "reasserting service conditions ...");
    }

    fn run_hooks(&mut self, hook: Hook, kcon: &mut KConsole) {
        kdebug!(kcon, "running {} hooks ...", hook);
    }

    fn runlevel_set(&mut self, prev: u8, new: u8, kcon: &mut KConsole) {
        kdebug!(kcon, "recording runlevel transition {} -> {}", prev, new);
    }

    fn do_shutdown(&mut self, kind: HaltKind, kcon: &mut KConsole) {
        knotice!(kcon, "syncing disks");
        sync();

        let mode = match kind {
            HaltKind::Halt => RebootMode::RB_HALT_SYSTEM,
            HaltKind::PowerOff => RebootMode::RB_POWER_OFF,
            HaltKind::Reboot => RebootMode::RB_AUTOBOOT,
        };
        if let Err(e) = reboot(mode) {
            kcrit!(kcon, "unable to bring the system down: {}", e);
        }
    }

    fn log_exit(&mut self, kcon: &mut KConsole) {
        knotice!(kcon, "stopping services, preparing for system shutdown");
    }

    fn set_hostname(&mut self, hostname: &str, kcon: &mut KConsole) {
        if let Err(e) = nix::unistd::sethostname(hostname) {
            kwarn!(kcon, "failed setting hostname {}: {}", hostname, e);
        }
    }
}

/// Compile-time check that [Platform] stays object-safe: the core stores it
/// as `&mut dyn Platform`.
#[doc(hidden)]
#[allow(dead_code)]
fn _assert_object_safe(_: &dyn Platform) {}
