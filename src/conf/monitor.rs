//! Configuration change monitor.
//!
//! Watches the drop-in directory, its `available` subdirectory and the root
//! configuration file for changes, coalescing filesystem events into a set
//! of changed basenames. The state machine consults the set to decide
//! whether a runlevel change also needs a configuration reload, and drains
//! it once a reload completes.

use crate::{ctx::ConfPaths, early_logging::KConsole};
use mio::{unix::SourceFd, Interest, Registry, Token};
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use std::{
    collections::BTreeSet,
    os::fd::{AsFd, AsRawFd},
    path::Path,
};

/// Watcher over the drop-in directory.
pub const RCSD_WATCH_TOKEN: Token = Token(30);

/// Watcher over the `available` subdirectory of the drop-in directory.
pub const AVAILABLE_WATCH_TOKEN: Token = Token(31);

/// Watcher over the root configuration file.
pub const CONF_WATCH_TOKEN: Token = Token(32);

/// `IN_DONT_FOLLOW` is not re-exported as a flag constant; build it from the
/// raw bit.
fn dont_follow() -> AddWatchFlags {
    AddWatchFlags::from_bits_truncate(nix::libc::IN_DONT_FOLLOW)
}

fn event_mask() -> AddWatchFlags {
    AddWatchFlags::IN_CREATE
        | AddWatchFlags::IN_DELETE
        | AddWatchFlags::IN_MODIFY
        | AddWatchFlags::IN_ATTRIB
        | AddWatchFlags::IN_MOVE
}

#[derive(Debug)]
struct Watcher {
    token: Token,
    ino: Inotify,

    // file watches deliver events without a name; remember the basename
    pinned: Option<String>,
}

/// Coalesced record of configuration changes since the last drain.
#[derive(Debug, Default)]
pub struct ConfMonitor {
    watchers: Vec<Watcher>,
    changes: BTreeSet<String>,
}
impl ConfMonitor {
    /// Monitor with no watches armed yet.
    pub fn new() -> Self {
        Default::default()
    }

    /// Arm all three watch targets, registering each descriptor with the
    /// event loop. Missing targets are skipped: a user may have only one of
    /// the root file or the drop-in directory in use, and may also have or
    /// not have symlinks in place. Returns the number of watches that
    /// failed to arm.
    pub fn watch(&mut self, registry: &Registry, paths: &ConfPaths, kcon: &mut KConsole) -> usize {
        let available = paths.rcsd.join("available");

        let mut rc = 0;
        rc += self.add_watcher(registry, RCSD_WATCH_TOKEN, &paths.rcsd, AddWatchFlags::empty(), kcon);
        rc += self.add_watcher(registry, AVAILABLE_WATCH_TOKEN, &available, dont_follow(), kcon);
        rc += self.add_watcher(registry, CONF_WATCH_TOKEN, &paths.conf, AddWatchFlags::empty(), kcon);
        rc
    }

    fn add_watcher(
        &mut self,
        registry: &Registry,
        token: Token,
        path: &Path,
        opt: AddWatchFlags,
        kcon: &mut KConsole,
    ) -> usize {
        // re-arming a target closes the old descriptor first
        if let Some(pos) = self.watchers.iter().position(|w| w.token == token) {
            let old = self.watchers.remove(pos);
            let fd = old.ino.as_fd().as_raw_fd();
            registry.deregister(&mut SourceFd(&fd)).ok();
        }

        let md = match std::fs::metadata(path) {
            Ok(md) => md,
            Err(_) => {
                kdebug!(kcon, "no such file or directory, skipping {}", path.display());
                return 0;
            }
        };
        let pinned = if md.is_dir() {
            None
        } else {
            path.file_name().map(|n| n.to_string_lossy().into_owned())
        };

        let ino = match Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC) {
            Ok(ino) => ino,
            Err(e) => {
                kerr!(kcon, "failed creating inotify descriptor: {}", e);
                return 1;
            }
        };

        // only forward the error: the target may be unwatchable and that's OK
        if ino.add_watch(path, event_mask() | opt).is_err() {
            return 1;
        }

        let fd = ino.as_fd().as_raw_fd();
        if let Err(io) = registry.register(&mut SourceFd(&fd), token, Interest::READABLE) {
            kerr!(
                kcon,
                "failed setting up I/O callback for {} watcher: {}",
                path.display(),
                io
            );
            return 1;
        }

        self.watchers.push(Watcher { token, ino, pinned });
        0
    }

    /// Whether `token` belongs to one of the armed watchers.
    pub fn owns(&self, token: Token) -> bool {
        self.watchers.iter().any(|w| w.token == token)
    }

    /// Drain pending events from the watcher behind `token` into the change
    /// set.
    pub fn handle(&mut self, token: Token, kcon: &mut KConsole) {
        let watcher = match self.watchers.iter().find(|w| w.token == token) {
            Some(watcher) => watcher,
            None => return,
        };

        let events = match watcher.ino.read_events() {
            Ok(events) => events,
            Err(e) => {
                kerr!(kcon, "invalid inotify event: {}", e);
                return;
            }
        };
        let pinned = watcher.pinned.clone();

        for event in events {
            let name = match event.name {
                Some(name) => name.to_string_lossy().into_owned(),
                None => match &pinned {
                    Some(pinned) => pinned.clone(),
                    None => continue,
                },
            };
            self.do_change(&name, event.mask, kcon);
        }
    }

    fn do_change(&mut self, name: &str, mask: AddWatchFlags, kcon: &mut KConsole) {
        if mask.intersects(AddWatchFlags::IN_DELETE | AddWatchFlags::IN_MOVED_FROM) {
            self.changes.remove(name);
            return;
        }

        if !mask.intersects(
            AddWatchFlags::IN_CREATE
                | AddWatchFlags::IN_MODIFY
                | AddWatchFlags::IN_ATTRIB
                | AddWatchFlags::IN_MOVED_TO,
        ) {
            return;
        }

        if !self.changes.insert(name.to_string()) {
            kdebug!(kcon, "event already registered for {} ...", name);
        }
    }

    /// Whether the file behind `path` changed since the last drain. Only the
    /// trailing basename is consulted.
    pub fn changed(&self, path: &str) -> bool {
        let base = path.rsplit('/').next().unwrap_or(path);
        self.changes.contains(base)
    }

    /// Whether any change is pending.
    pub fn any_change(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Forget all recorded changes.
    pub fn drop_changes(&mut self) {
        self.changes.clear();
    }
}
