//! Configuration-driven supervisor core for early-userspace init. **CURRENTLY IN DEVELOPMENT**
//!
//! # What?
//! emberd is the coordinating core of a small init system: it parses a
//! declarative service/runlevel configuration, drives a deterministic state
//! machine through bootstrap, runlevel transitions and live reconfiguration,
//! and watches the configuration on disk so edits are picked up without a
//! reboot.
//!
//! The configuration is strictly declarative with a small verb set. One root
//! file (`/etc/emberd.conf`) carries both static directives (`host`,
//! `network`, `runparts`, `runlevel`, ...) and dynamic declarations
//! (`service`, `task`, `run`, `tty`, `rlimit`, ...); a drop-in directory
//! (`/etc/emberd.d/*.conf`) carries dynamic declarations only. Reloads use
//! mark-and-sweep semantics: anything no longer declared is stopped and
//! unregistered, anything new is registered and started, and nothing is ever
//! started in a runlevel that forbids it.
//!
//! # Where?
//! emberd only supports Linux systems, and there are no plans to expand
//! compatibility to other OSes.
//!
//! # How?
//! One single-threaded event loop owns all mutation. Filesystem
//! notifications, child exits and signal-driven runlevel requests all post
//! into the same loop and converge on the state machine's `step` operation,
//! which runs to a fixed point and never blocks. Process supervision itself
//! lives behind the registry seams in `svc`, `tty` and `sys`; this binary
//! ships bookkeeping implementations that a full supervisor can replace.
//!
//! Runlevel requests arrive as signals, following the classic telinit
//! convention: SIGUSR1 halts, SIGUSR2 powers off, SIGINT/SIGTERM reboot, and
//! SIGHUP reloads the configuration.
#![crate_name = "emberd"]
#![deny(unstable_features)]
#![deny(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]

#[macro_use]
mod early_logging;

mod conf;
mod ctx;
mod sm;
mod svc;
mod sys;
mod tty;
mod util;

use crate::{
    conf::monitor::ConfMonitor,
    ctx::{ConfPaths, InitContext},
    early_logging::KConsole,
    sm::Sm,
    svc::{Backends, SvcTable},
    sys::{HaltKind, SystemPlatform},
    tty::TtyTable,
};
use mio::{unix::SourceFd, Events, Interest, Poll, Token};
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use precisej_printable_errno::{
    printable_error, ExitError, ExitErrorResult, PrintableErrno, PrintableResult,
};
use std::{
    io::ErrorKind,
    os::fd::{AsFd, AsRawFd},
    process::id as getpid,
};

/// The program is called `emberd`. The str referring to the program name is saved in
/// this constant. Useful for PrintableResult.
const PROGRAM_NAME: &str = "emberd";

/// Signalfd token on the main event loop.
const SIGNAL_TOKEN: Token = Token(10);

/// Check to see if we are running as the system's `init`.
///
/// Everything here assumes the privileges and responsibilities of PID 1:
/// orphans reparent to us, and runlevel requests arrive as signals.
fn initial_sanity_check() -> Result<(), PrintableErrno<String>> {
    (getpid() == 1).then(|| ()).ok_or_else(|| {
        printable_error(PROGRAM_NAME, "not running as init (PID 1), exiting...").into()
    })
}

/// The entry point of the program. This function is in charge of exiting with an error
/// code when [init] returns an [ExitError].
fn main() {
    initial_sanity_check().bail(1).unwrap_or_eprint_exit();
    let mut kcon = KConsole::new().bail(2).unwrap_or_eprint_exit();

    if let Err(e) = init(&mut kcon) {
        kcrit!(kcon, "{}", &e);
        e.eprint_and_exit()
    }
}

/// Here is where it actually begins.
///
/// - Pick the logging verbosity from the kernel command line.
/// - Block the signals of interest and expose them as a signalfd.
/// - Arm the configuration watchers and load all configuration files.
/// - Dispatch the runlevel-S cohort, then head for the configured runlevel.
/// - Run the event loop forever: every signal batch or batch of filesystem
///   events is followed by one state-machine step.
fn init(kcon: &mut KConsole) -> Result<(), ExitError<String>> {
    conf::parse_cmdline(kcon);

    let mut context = InitContext::new(ConfPaths::default());
    let mut services = SvcTable::new();
    let mut ttys = TtyTable::new();
    let mut system = SystemPlatform::new();
    let mut machine = Sm::new();

    // requests and child exits arrive through the signalfd only
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGCHLD);
    mask.add(Signal::SIGHUP);
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    mask.add(Signal::SIGUSR1);
    mask.add(Signal::SIGUSR2);
    mask.thread_block()
        .map_err(|e| printable_error(PROGRAM_NAME, format!("error while blocking signals: {}", e)))
        .bail(3)?;
    let mut sfd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
        .map_err(|e| {
            printable_error(
                PROGRAM_NAME,
                format!("error while setting up signalfd: {}", e),
            )
        })
        .bail(3)?;

    let mut evloop = Poll::new()
        .map_err(|io| {
            printable_error(
                PROGRAM_NAME,
                format!("error while setting up main event loop: {}", io),
            )
        })
        .bail(4)?;
    let mut evs = Events::with_capacity(8);

    let sfd_raw = sfd.as_fd().as_raw_fd();
    evloop
        .registry()
        .register(&mut SourceFd(&sfd_raw), SIGNAL_TOKEN, Interest::READABLE)
        .map_err(|io| {
            printable_error(
                PROGRAM_NAME,
                format!("error while registering signalfd: {}", io),
            )
        })
        .bail(4)?;

    let mut monitor = ConfMonitor::new();
    let failed = monitor.watch(evloop.registry(), &context.paths, kcon);
    if failed > 0 {
        kwarn!(kcon, "{} configuration watcher(s) could not be set up", failed);
    }

    {
        let mut b = Backends {
            svc: &mut services,
            tty: &mut ttys,
            sys: &mut system,
        };
        conf::reload(&mut context, &mut monitor, &mut b, kcon);

        // fire off the runlevel-S cohort ...
        machine.step(&mut context, &mut monitor, &mut b, kcon);

        // ... then leave bootstrap for the configured runlevel
        machine.set_runlevel(context.cfglevel);
        machine.step(&mut context, &mut monitor, &mut b, kcon);
    }

    loop {
        match evloop.poll(&mut evs, None) {
            Ok(()) => {}
            Err(io) if io.kind() == ErrorKind::Interrupted => continue,
            Err(io) => Err(io)
                .map_err(|io| {
                    printable_error(
                        PROGRAM_NAME,
                        format!("error while running main event loop: {}", io),
                    )
                })
                .bail(5)?,
        }

        for ev in evs.iter() {
            match ev.token() {
                SIGNAL_TOKEN => drain_signals(&mut sfd, &mut machine, &mut context, kcon),
                token if monitor.owns(token) => monitor.handle(token, kcon),
                _ => {}
            }
        }

        let mut b = Backends {
            svc: &mut services,
            tty: &mut ttys,
            sys: &mut system,
        };
        machine.step(&mut context, &mut monitor, &mut b, kcon);
    }
}

/// Translate pending signals into state-machine requests.
fn drain_signals(sfd: &mut SignalFd, machine: &mut Sm, context: &mut InitContext, kcon: &mut KConsole) {
    while let Ok(Some(si)) = sfd.read_signal() {
        match Signal::try_from(si.ssi_signo as i32) {
            Ok(Signal::SIGCHLD) => reap_children(kcon),
            Ok(Signal::SIGHUP) => {
                kdebug!(kcon, "configuration reload requested");
                machine.set_reload();
            }
            Ok(Signal::SIGUSR1) => {
                context.halt = HaltKind::Halt;
                machine.set_runlevel(0);
            }
            Ok(Signal::SIGUSR2) => {
                context.halt = HaltKind::PowerOff;
                machine.set_runlevel(0);
            }
            Ok(Signal::SIGINT) | Ok(Signal::SIGTERM) => machine.set_runlevel(6),
            _ => {}
        }
    }
}

/// Collect every zombie that reparented to us or belongs to a supervised
/// service. The registry seam observes the exits; each drained batch is
/// followed by a state-machine step in the main loop.
fn reap_children(kcon: &mut KConsole) {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => kdebug!(kcon, "collected child: {:?}", status),
        }
    }
}
