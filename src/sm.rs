//! The supervisor state machine.
//!
//! A deterministic automaton over six states. External inputs — runlevel
//! requests, reload requests, child exits — only mutate request flags;
//! [Sm::step] advances the machine until it reaches a fixed point, so one
//! call always lands in the next waiting state. Wait states return early
//! while the service registry still reports stopping units and are stepped
//! again by the next child-exit event.

use crate::{
    conf::{self, monitor::ConfMonitor},
    ctx::InitContext,
    early_logging::KConsole,
    svc::{Backends, SvcKinds},
    sys::{HaltKind, Hook},
    util,
};
use std::fmt;

/// Discrete machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmState {
    /// First parse done, runlevel-S cohort not yet dispatched.
    Bootstrap,

    /// Steady state, waiting for requests.
    Running,

    /// Committing a runlevel change and tearing down the old cohort.
    RunlevelChange,

    /// Waiting for the old cohort to finish stopping.
    RunlevelWait,

    /// Re-parsing the configuration and tearing down affected services.
    ReloadChange,

    /// Waiting for reload-affected services to finish stopping.
    ReloadWait,
}
impl fmt::Display for SmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SmState::Bootstrap => "bootstrap",
            SmState::Running => "running",
            SmState::RunlevelChange => "runlevel/change",
            SmState::RunlevelWait => "runlevel/wait",
            SmState::ReloadChange => "reload/change",
            SmState::ReloadWait => "reload/wait",
        })
    }
}

/// The state machine record: current state plus request flags.
#[derive(Debug)]
pub struct Sm {
    state: SmState,
    newlevel: Option<u8>,
    reload: bool,
    in_teardown: bool,
}
impl Sm {
    /// Fresh machine in bootstrap.
    pub fn new() -> Self {
        Sm {
            state: SmState::Bootstrap,
            newlevel: None,
            reload: false,
            in_teardown: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> SmState {
        self.state
    }

    /// Request a runlevel change. Observed from `running` only; a request
    /// made while a transition is in flight is coalesced, last writer wins.
    pub fn set_runlevel(&mut self, newlevel: u8) {
        self.newlevel = Some(newlevel);
    }

    /// Request a configuration reload.
    pub fn set_reload(&mut self) {
        self.reload = true;
    }

    /// Whether the machine is currently stopping services. Registries use
    /// this to decide between the stop pass and the start pass.
    pub fn is_in_teardown(&self) -> bool {
        self.in_teardown
    }

    /// Advance until no handler changes the state. Never blocks: a wait
    /// state that cannot progress returns and relies on the next external
    /// event to step again.
    pub fn step(
        &mut self,
        context: &mut InitContext,
        mon: &mut ConfMonitor,
        b: &mut Backends,
        kcon: &mut KConsole,
    ) {
        loop {
            let old_state = self.state;

            kdebug!(
                kcon,
                "state: {}, runlevel: {}, newlevel: {:?}, teardown: {}, reload: {}",
                self.state,
                context.runlevel,
                self.newlevel,
                self.in_teardown,
                self.reload
            );

            match self.state {
                SmState::Bootstrap => {
                    kdebug!(
                        kcon,
                        "bootstrapping all services in runlevel S from {}",
                        context.paths.conf.display()
                    );
                    b.svc.step_all(
                        SvcKinds::RUN | SvcKinds::TASK | SvcKinds::SERVICE,
                        context.runlevel,
                        self.in_teardown,
                        kcon,
                    );
                    self.state = SmState::Running;
                }

                SmState::Running => {
                    // runlevel changed?
                    if let Some(newlevel) = self.newlevel.filter(|newlevel| *newlevel <= 9) {
                        if context.runlevel == newlevel {
                            self.newlevel = None;
                        } else {
                            self.state = SmState::RunlevelChange;
                        }
                    } else if self.reload {
                        // reload?
                        self.reload = false;
                        self.state = SmState::ReloadChange;
                    }
                }

                SmState::RunlevelChange => {
                    let newlevel = self.newlevel.take().unwrap_or(context.runlevel);
                    context.prevlevel = context.runlevel;
                    context.runlevel = newlevel;

                    // restore terse logging and run hooks before shutdown
                    if context.runlevel == 0 || context.runlevel == 6 {
                        b.sys.log_exit(kcon);
                        b.sys.run_hooks(Hook::Shutdown, kcon);
                    }

                    kdebug!(
                        kcon,
                        "setting new runlevel --> {} <-- previous {}",
                        context.runlevel,
                        context.prevlevel
                    );
                    knotice!(kcon, "entering runlevel {}", context.runlevel);
                    b.sys.runlevel_set(context.prevlevel, context.runlevel, kcon);

                    // no logins in single-user mode or on the way down
                    nologin(context, kcon);

                    // make sure to (re)load all *.conf drop-ins
                    if mon.any_change() {
                        conf::reload(context, mon, b, kcon);
                    }

                    // reset the once-latch of runtasks
                    b.svc.runtask_clean();

                    kdebug!(kcon, "stopping services not allowed in new runlevel ...");
                    self.in_teardown = true;
                    b.svc.step_all(SvcKinds::ANY, context.runlevel, true, kcon);

                    self.state = SmState::RunlevelWait;
                }

                SmState::RunlevelWait => {
                    // anything still stopping? exit early and finish the
                    // second stage when the next child exit steps us
                    if let Some(svc) = b.svc.stop_completed() {
                        kdebug!(kcon, "waiting to collect {}({}) ...", svc.cmd, svc.pid);
                    } else {
                        kdebug!(
                            kcon,
                            "all services have been stopped, calling runlevel change hooks ..."
                        );
                        b.sys.run_hooks(Hook::RunlevelChange, kcon);

                        kdebug!(kcon, "starting services new to this runlevel ...");
                        self.in_teardown = false;
                        b.svc.step_all(SvcKinds::ANY, context.runlevel, false, kcon);

                        // cleanup stale services
                        b.svc.clean_dynamic(kcon);

                        if context.runlevel == 0 || context.runlevel == 6 {
                            let kind = if context.runlevel == 6 {
                                HaltKind::Reboot
                            } else {
                                context.halt
                            };
                            b.sys.do_shutdown(kind, kcon);
                        } else if context.prevlevel > 0 {
                            // no TTYs run at bootstrap, they have a delayed start
                            b.tty.start_runlevel(context.runlevel, kcon);
                        }

                        self.state = SmState::Running;
                    }
                }

                SmState::ReloadChange => {
                    conf::reload(context, mon, b, kcon);

                    // mark affected conditions in-flux and let affected
                    // services drop to waiting
                    kdebug!(kcon, "stopping services not allowed after reconf ...");
                    self.in_teardown = true;
                    b.sys.cond_reload(kcon);
                    b.svc.step_all(
                        SvcKinds::SERVICE | SvcKinds::INETD,
                        context.runlevel,
                        true,
                        kcon,
                    );
                    b.tty.reload(kcon);

                    self.state = SmState::ReloadWait;
                }

                SmState::ReloadWait => {
                    if let Some(svc) = b.svc.stop_completed() {
                        kdebug!(kcon, "waiting to collect {}({}) ...", svc.cmd, svc.pid);
                    } else {
                        self.in_teardown = false;

                        // cleanup stale services
                        b.svc.clean_dynamic(kcon);

                        kdebug!(kcon, "starting services after reconf ...");
                        b.svc.step_all(
                            SvcKinds::SERVICE | SvcKinds::INETD,
                            context.runlevel,
                            false,
                            kcon,
                        );

                        kdebug!(kcon, "calling reconf hooks ...");
                        b.sys.run_hooks(Hook::SvcReconf, kcon);

                        b.svc.step_all(
                            SvcKinds::SERVICE | SvcKinds::INETD,
                            context.runlevel,
                            false,
                            kcon,
                        );
                        kdebug!(kcon, "reconfiguration done");

                        self.state = SmState::Running;
                    }
                }
            }

            if self.state == old_state {
                break;
            }
        }
    }
}

/// Disable logins in single user mode and on the way down; re-enable only
/// when leaving those runlevels. Everywhere else the file stays
/// user-managed.
fn nologin(context: &InitContext, kcon: &mut KConsole) {
    if context.runlevel == 1 || context.runlevel == 0 || context.runlevel == 6 {
        util::touch(&context.paths.nologin, kcon);
    }

    if context.prevlevel == 1 || context.prevlevel == 0 || context.prevlevel == 6 {
        util::erase(&context.paths.nologin, kcon);
    }
}
