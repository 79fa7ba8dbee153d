//! Declarative service/runlevel configuration.
//!
//! One root configuration file plus a directory of per-service drop-ins.
//! Each line is a verb followed by its argument: *static* verbs mutate
//! process-wide settings and are honored in the root file only (most of
//! them solely during bootstrap), *dynamic* verbs register services, tasks
//! and terminals with the registries and are honored everywhere. A reload
//! re-parses everything with mark-and-sweep semantics so entities that
//! disappeared from the configuration get garbage-collected afterwards.

pub mod monitor;
pub mod rlimit;

use crate::{
    ctx::{InitContext, RUNLEVEL_DEFAULT},
    early_logging::{KConsole, VerbosityLevel},
    svc::{Backends, Svc, SvcKind, COND_SIZE},
    util,
};
use monitor::ConfMonitor;
use rlimit::RlimitSet;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

/// Longest accepted configuration line; the remainder is dropped silently.
pub const LINE_SIZE: usize = 1024;

/// Longest accepted external-command argument; truncated silently.
pub const CMD_SIZE: usize = 256;

/// Enable debug logging when the kernel command line asks for it with
/// `emberd_debug` or `--debug`.
pub fn parse_cmdline(kcon: &mut KConsole) {
    let line = match std::fs::read_to_string("/proc/cmdline") {
        Ok(line) => line,
        Err(_) => return,
    };
    let line = line.trim_end();

    if line.contains("emberd_debug") || line.contains("--debug") {
        kcon.change_verbosity(VerbosityLevel::Debug);
    }
    kdebug!(kcon, "{}", line);
}

/// Convert an optional `[!123456789S]` string into a runlevel bitmask.
///
/// Absent input means the default of runlevels 2, 3 and 4. A leading `!`
/// complements against runlevels 1..9: halt never sneaks into a negated
/// mask.
pub fn parse_runlevels(runlevels: Option<&str>) -> u16 {
    let runlevels = runlevels.unwrap_or("[234]");

    let mut not = false;
    let mut bitmask: u16 = 0;
    for lvl in runlevels.chars().skip(1) {
        if lvl == ']' {
            break;
        }
        if lvl == '!' {
            not = true;
            bitmask = 0x3FE;
            continue;
        }

        let lvl = if lvl == 's' || lvl == 'S' { '0' } else { lvl };
        let level = match lvl.to_digit(10) {
            Some(level) => level as u16,
            None => continue,
        };

        if not {
            bitmask &= !(1 << level);
        } else {
            bitmask |= 1 << level;
        }
    }

    bitmask
}

/// Digest the `<cond>` block of a service declaration.
///
/// Daemons are assumed to tolerate SIGHUP; a leading `!` withdraws that.
/// The rest of the string up to the first `>` is the service's condition
/// list, truncated with a warning past [COND_SIZE].
pub fn parse_cond(svc: &mut Svc, cond: Option<&str>, kcon: &mut KConsole) {
    if svc.is_daemon() {
        svc.sighup = true;
    }

    let mut cond = match cond {
        Some(cond) => cond,
        None => return,
    };

    if let Some(rest) = cond.strip_prefix('!') {
        svc.sighup = false;
        cond = rest;
    }

    let list = match cond.find('>') {
        Some(end) => &cond[..end],
        None => cond,
    };

    if list.len() >= COND_SIZE {
        kwarn!(
            kcon,
            "too long event list in declaration of {}: {}",
            svc.cmd,
            list
        );
        let mut end = COND_SIZE - 1;
        while !list.is_char_boundary(end) {
            end -= 1;
        }
        svc.cond = list[..end].to_string();
        return;
    }

    svc.cond = list.to_string();
}

// Byte-capped prefix, kept on a character boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// Case-insensitive verb match; the verb carries its trailing space. Returns
// the argument remainder.
fn match_verb<'a>(line: &'a str, verb: &str) -> Option<&'a str> {
    match line.get(..verb.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(verb) => Some(&line[verb.len()..]),
        _ => None,
    }
}

fn parse_static(line: &str, context: &mut InitContext, b: &mut Backends, kcon: &mut KConsole) {
    if context.in_bootstrap() {
        if let Some(x) = match_verb(line, "host ") {
            context.hostname = Some(x.trim().to_string());
            return;
        }

        if let Some(x) = match_verb(line, "mknod ") {
            let dev = truncate(x.trim(), CMD_SIZE);
            b.sys.run_interactive(
                &format!("mknod {}", dev),
                &format!("Creating device node {}", dev),
                kcon,
            );
            return;
        }

        if let Some(x) = match_verb(line, "network ") {
            context.network = Some(x.trim().to_string());
            return;
        }

        if let Some(x) = match_verb(line, "runparts ") {
            context.runparts = Some(x.trim().to_string());
            return;
        }

        // The desired runlevel to start when leaving bootstrap (S).
        // Runlevels 1-9 are supported, except 6 which is reserved for
        // reboot; 0 is halt/poweroff.
        if let Some(x) = match_verb(line, "runlevel ") {
            context.cfglevel = match x.trim().parse::<u8>() {
                Ok(n) if (1..=9).contains(&n) && n != 6 => n,
                _ => RUNLEVEL_DEFAULT,
            };
            return;
        }
    }

    if let Some(x) = match_verb(line, "include ") {
        let file = truncate(x.trim(), CMD_SIZE);
        if !Path::new(file).exists() {
            kerr!(kcon, "cannot find include file {}, absolute path required!", file);
            return;
        }

        parse_conf(Path::new(file), context, b, kcon);
        return;
    }

    if let Some(x) = match_verb(line, "shutdown ") {
        context.sdown = Some(x.trim().to_string());
    }
}

fn parse_dynamic(
    line: &str,
    runlevel: u8,
    rlimits: &mut RlimitSet,
    origin: Option<&Path>,
    b: &mut Backends,
    kcon: &mut KConsole,
) {
    // kernel module to load at bootstrap
    if let Some(x) = match_verb(line, "module ") {
        if runlevel != 0 {
            return;
        }

        let module = truncate(x.trim(), CMD_SIZE);
        b.sys.run_interactive(
            &format!("modprobe {}", module),
            &format!("Loading kernel module {}", module),
            kcon,
        );
        return;
    }

    // monitored daemon, will be respawned on exit
    if let Some(x) = match_verb(line, "service ") {
        b.svc.register(SvcKind::Service, x, rlimits, origin, kcon);
        return;
    }

    // one-shot task, will not be respawned
    if let Some(x) = match_verb(line, "task ") {
        b.svc.register(SvcKind::Task, x, rlimits, origin, kcon);
        return;
    }

    // like task but waits for completion, useful w/ [S]
    if let Some(x) = match_verb(line, "run ") {
        b.svc.register(SvcKind::Run, x, rlimits, origin, kcon);
        return;
    }

    if let Some(x) = match_verb(line, "inetd ") {
        #[cfg(feature = "inetd")]
        b.svc.register(SvcKind::Inetd, x, rlimits, origin, kcon);

        #[cfg(not(feature = "inetd"))]
        kerr!(kcon, "built without inetd support, cannot register inetd {}!", x);

        return;
    }

    if let Some(x) = match_verb(line, "rlimit ") {
        rlimits.parse_line(x, kcon);
        return;
    }

    // regular or serial TTYs to run getty
    if let Some(x) = match_verb(line, "tty ") {
        b.tty.register(x.trim(), rlimits, origin, kcon);
    }
}

// chomp is implicit in the line reader; tabs count as spaces and lines past
// LINE_SIZE lose their tail
fn preprocess(line: &str) -> String {
    truncate(line, LINE_SIZE).replace('\t', " ")
}

/// Root-mode parse: static and dynamic verbs, scratch limits shared with
/// the supervisor's own. Reads the limits currently in force first so the
/// configuration overrides a fresh baseline, and applies the result to the
/// supervisor when done.
fn parse_conf(file: &Path, context: &mut InitContext, b: &mut Backends, kcon: &mut KConsole) {
    context.rlimits.snapshot_os(kcon);

    let fp = match File::open(file) {
        Ok(fp) => fp,
        Err(_) => return,
    };

    kdebug!(kcon, "parsing {}", file.display());
    for line in BufReader::new(fp).lines() {
        let line = match line {
            Ok(line) => preprocess(&line),
            Err(_) => continue,
        };
        kdebug!(kcon, "{}", line);

        if line.starts_with('#') {
            continue;
        }

        parse_static(&line, context, b, kcon);

        let runlevel = context.runlevel;
        parse_dynamic(&line, runlevel, &mut context.rlimits, None, b, kcon);
    }

    context.rlimits.apply(kcon);
}

/// Drop-in-mode parse: dynamic verbs only, against a scratch limit vector
/// seeded from the global baseline.
fn parse_conf_dynamic(file: &Path, context: &InitContext, b: &mut Backends, kcon: &mut KConsole) {
    let fp = match File::open(file) {
        Ok(fp) => fp,
        Err(io) => {
            kerr!(kcon, "failed opening {}: {}", file.display(), io);
            return;
        }
    };

    // default limits for each service in this file
    let mut rlimits = context.rlimits.clone();

    kdebug!(kcon, "parsing {} <<<<<<", file.display());
    for line in BufReader::new(fp).lines() {
        let line = match line {
            Ok(line) => preprocess(&line),
            Err(_) => continue,
        };
        kdebug!(kcon, "{}", line);

        if line.starts_with('#') {
            continue;
        }

        parse_dynamic(&line, context.runlevel, &mut rlimits, Some(file), b, kcon);
    }
}

/// Reload the root configuration and every `*.conf` drop-in.
///
/// Entities not re-registered by this pass keep their sweep mark and are
/// garbage-collected by the following state-machine stage.
pub fn reload(
    context: &mut InitContext,
    mon: &mut ConfMonitor,
    b: &mut Backends,
    kcon: &mut KConsole,
) {
    // mark and sweep
    b.svc.mark_dynamic();
    b.tty.mark();

    let conf = context.paths.conf.clone();
    parse_conf(&conf, context, b, kcon);

    let rcsd = context.paths.rcsd.clone();
    match std::fs::read_dir(&rcsd) {
        Ok(dir) => {
            let mut entries: Vec<PathBuf> =
                dir.filter_map(|e| e.ok()).map(|e| e.path()).collect();
            entries.sort_by(|lhs, rhs| lhs.file_name().cmp(&rhs.file_name()));

            for path in entries {
                // look at the entry itself, beyond any symlink
                let md = match std::fs::symlink_metadata(&path) {
                    Ok(md) => md,
                    Err(io) => {
                        kdebug!(kcon, "skipping {}, cannot access: {}", path.display(), io);
                        continue;
                    }
                };

                if md.is_dir() {
                    kdebug!(kcon, "skipping directory {}", path.display());
                    continue;
                }

                if md.file_type().is_symlink() {
                    if let Err(io) = std::fs::canonicalize(&path) {
                        kwarn!(kcon, "skipping {}, dangling symlink: {}", path.display(), io);
                        continue;
                    }
                }

                let name = match path.file_name() {
                    Some(name) => name.to_string_lossy().into_owned(),
                    None => continue,
                };
                if !name.ends_with(".conf") {
                    kdebug!(kcon, "skipping {}, not a valid .conf ...", path.display());
                    continue;
                }

                parse_conf_dynamic(&path, context, b, kcon);
            }
        }
        Err(_) => kdebug!(kcon, "skipping {}, no files found ...", rcsd.display()),
    }

    // drop record of all .conf changes
    mon.drop_changes();

    // the hostname file wins over any `host` directive; "noname" backstops
    let hostname = util::resolve_hostname(context);
    b.sys.set_hostname(&hostname, kcon);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::ConfPaths;
    use crate::svc::{ServiceRegistry, SvcTable};
    use crate::sys::{HaltKind, Hook, Platform};
    use crate::tty::{TtyRegistry, TtyTable};
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    /// Recording platform stand-in for parser tests.
    #[derive(Default)]
    struct RecordingPlatform {
        commands: Vec<String>,
        hostnames: Vec<String>,
    }
    impl Platform for RecordingPlatform {
        fn run_interactive(&mut self, cmd: &str, _msg: &str, _kcon: &mut KConsole) {
            self.commands.push(cmd.to_string());
        }

        fn cond_reload(&mut self, _kcon: &mut KConsole) {}

        fn run_hooks(&mut self, _hook: Hook, _kcon: &mut KConsole) {}

        fn runlevel_set(&mut self, _prev: u8, _new: u8, _kcon: &mut KConsole) {}

        fn do_shutdown(&mut self, _kind: HaltKind, _kcon: &mut KConsole) {}

        fn log_exit(&mut self, _kcon: &mut KConsole) {}

        fn set_hostname(&mut self, hostname: &str, _kcon: &mut KConsole) {
            self.hostnames.push(hostname.to_string());
        }
    }

    fn scratch_context(dir: &TempDir) -> InitContext {
        InitContext::new(ConfPaths {
            conf: dir.path().join("emberd.conf"),
            rcsd: dir.path().join("emberd.d"),
            nologin: dir.path().join("nologin"),
            hostname_file: dir.path().join("hostname"),
        })
    }

    #[test]
    fn runlevel_masks() {
        assert_eq!(parse_runlevels(None), parse_runlevels(Some("[234]")));
        assert_eq!(parse_runlevels(Some("[234]")), 0b0001_1100);
        assert_eq!(parse_runlevels(Some("[S]")), 0b0000_0001);
        assert_eq!(parse_runlevels(Some("[s12]")), 0b0000_0111);
        assert_eq!(parse_runlevels(Some("[]")), 0);

        // complements never enable halt
        assert_eq!(parse_runlevels(Some("[!345]")), 0b11_1100_0110);
        assert_eq!(parse_runlevels(Some("[!]")), 0x3FE);

        // junk characters are skipped, everything stays within bits 0..9
        assert_eq!(parse_runlevels(Some("[2x4]")), 0b0001_0100);
        assert_eq!(parse_runlevels(Some("[0123456789]")) & !0x3FF, 0);
    }

    #[test]
    fn runlevel_directive_sets_cfglevel_with_fallback() {
        let mut kcon = KConsole::sink();
        let dir = TempDir::new().unwrap();

        for (line, expected) in [
            ("runlevel 3", 3),
            ("RUNLEVEL 5", 5),
            ("runlevel 6", RUNLEVEL_DEFAULT),
            ("runlevel 0", RUNLEVEL_DEFAULT),
            ("runlevel 10", RUNLEVEL_DEFAULT),
            ("runlevel x", RUNLEVEL_DEFAULT),
        ] {
            let mut context = scratch_context(&dir);
            fs::write(&context.paths.conf, format!("{}\n", line)).unwrap();

            let mut svc = SvcTable::new();
            let mut tty = TtyTable::new();
            let mut sys = RecordingPlatform::default();
            let mut b = Backends {
                svc: &mut svc,
                tty: &mut tty,
                sys: &mut sys,
            };
            parse_conf(&context.paths.conf.clone(), &mut context, &mut b, &mut kcon);

            assert_eq!(context.cfglevel, expected, "line {:?}", line);
        }
    }

    #[test]
    fn static_verbs_gate_on_bootstrap() {
        let mut kcon = KConsole::sink();
        let dir = TempDir::new().unwrap();
        let mut context = scratch_context(&dir);
        fs::write(
            &context.paths.conf,
            "host ember1\nnetwork /sbin/ifup -a\nrunparts /etc/rc.d\nshutdown /sbin/save-state\n",
        )
        .unwrap();

        let mut svc = SvcTable::new();
        let mut tty = TtyTable::new();
        let mut sys = RecordingPlatform::default();
        let mut b = Backends {
            svc: &mut svc,
            tty: &mut tty,
            sys: &mut sys,
        };

        let conf = context.paths.conf.clone();
        parse_conf(&conf, &mut context, &mut b, &mut kcon);
        assert_eq!(context.hostname.as_deref(), Some("ember1"));
        assert_eq!(context.network.as_deref(), Some("/sbin/ifup -a"));
        assert_eq!(context.runparts.as_deref(), Some("/etc/rc.d"));
        assert_eq!(context.sdown.as_deref(), Some("/sbin/save-state"));

        // once out of bootstrap only `shutdown` (and `include`) still apply
        let mut context = scratch_context(&dir);
        context.runlevel = 2;
        context.sdown = None;
        parse_conf(&conf, &mut context, &mut b, &mut kcon);
        assert_eq!(context.hostname, None);
        assert_eq!(context.network, None);
        assert_eq!(context.runparts, None);
        assert_eq!(context.sdown.as_deref(), Some("/sbin/save-state"));
    }

    #[test]
    fn lines_are_preprocessed() {
        let mut kcon = KConsole::sink();
        let dir = TempDir::new().unwrap();
        let mut context = scratch_context(&dir);
        fs::write(
            &context.paths.conf,
            "# a comment\n\nHOST\tember2\nbogus line\n",
        )
        .unwrap();

        let mut svc = SvcTable::new();
        let mut tty = TtyTable::new();
        let mut sys = RecordingPlatform::default();
        let mut b = Backends {
            svc: &mut svc,
            tty: &mut tty,
            sys: &mut sys,
        };

        let conf = context.paths.conf.clone();
        parse_conf(&conf, &mut context, &mut b, &mut kcon);

        // the tab collapsed into the mandatory verb separator
        assert_eq!(context.hostname.as_deref(), Some("ember2"));
        assert!(svc.is_empty());
    }

    #[test]
    fn include_recurses_and_missing_include_is_ignored() {
        let mut kcon = KConsole::sink();
        let dir = TempDir::new().unwrap();
        let mut context = scratch_context(&dir);

        let extra = dir.path().join("extra.conf");
        fs::write(&extra, "service [2345] /sbin/extra\n").unwrap();
        fs::write(
            &context.paths.conf,
            format!(
                "include {}\ninclude {}\nservice [2345] /sbin/root\n",
                extra.display(),
                dir.path().join("nonexistent.conf").display()
            ),
        )
        .unwrap();

        let mut svc = SvcTable::new();
        let mut tty = TtyTable::new();
        let mut sys = RecordingPlatform::default();
        let mut b = Backends {
            svc: &mut svc,
            tty: &mut tty,
            sys: &mut sys,
        };

        let conf = context.paths.conf.clone();
        parse_conf(&conf, &mut context, &mut b, &mut kcon);

        assert!(svc.get("/sbin/extra").is_some());
        assert!(svc.get("/sbin/root").is_some());
    }

    #[test]
    fn module_and_mknod_run_during_bootstrap_only() {
        let mut kcon = KConsole::sink();
        let dir = TempDir::new().unwrap();
        let mut context = scratch_context(&dir);
        fs::write(
            &context.paths.conf,
            "module dm-crypt\nmknod /dev/null c 1 3\n",
        )
        .unwrap();

        let mut svc = SvcTable::new();
        let mut tty = TtyTable::new();
        let mut sys = RecordingPlatform::default();
        let mut b = Backends {
            svc: &mut svc,
            tty: &mut tty,
            sys: &mut sys,
        };

        let conf = context.paths.conf.clone();
        parse_conf(&conf, &mut context, &mut b, &mut kcon);
        assert_eq!(
            sys.commands,
            vec![
                "modprobe dm-crypt".to_string(),
                "mknod /dev/null c 1 3".to_string()
            ]
        );

        sys.commands.clear();
        context.runlevel = 2;
        let mut b = Backends {
            svc: &mut svc,
            tty: &mut tty,
            sys: &mut sys,
        };
        parse_conf(&conf, &mut context, &mut b, &mut kcon);
        assert!(sys.commands.is_empty());
    }

    #[test]
    fn condition_block_clears_sighup_tolerance() {
        let mut kcon = KConsole::sink();
        let mut svc = SvcTable::new();

        svc.register(
            SvcKind::Service,
            "[2345] <!net/route/default> /sbin/routed",
            &RlimitSet::unlimited(),
            None,
            &mut kcon,
        );
        let routed = svc.get("/sbin/routed").unwrap();
        assert_eq!(routed.cond, "net/route/default");
        assert!(!routed.sighup);

        svc.register(
            SvcKind::Service,
            "[2345] <net/up> /sbin/dhcpd",
            &RlimitSet::unlimited(),
            None,
            &mut kcon,
        );
        let dhcpd = svc.get("/sbin/dhcpd").unwrap();
        assert_eq!(dhcpd.cond, "net/up");
        assert!(dhcpd.sighup);
    }

    #[test]
    fn oversize_condition_lists_are_truncated() {
        let mut kcon = KConsole::sink();
        let mut svc = SvcTable::new();

        let long = "x".repeat(COND_SIZE + 16);
        svc.register(
            SvcKind::Service,
            &format!("[2] <{}> /sbin/noisy", long),
            &RlimitSet::unlimited(),
            None,
            &mut kcon,
        );

        let noisy = svc.get("/sbin/noisy").unwrap();
        assert_eq!(noisy.cond.len(), COND_SIZE - 1);
        assert!(long.starts_with(&noisy.cond));
    }

    #[test]
    fn reload_sweeps_stale_drop_ins_in_sorted_order() {
        let mut kcon = KConsole::sink();
        let dir = TempDir::new().unwrap();
        let mut context = scratch_context(&dir);
        fs::create_dir(&context.paths.rcsd).unwrap();

        fs::write(&context.paths.conf, "runlevel 3\n").unwrap();
        fs::write(
            context.paths.rcsd.join("b.conf"),
            "service [2345] /sbin/bbb\n",
        )
        .unwrap();
        fs::write(
            context.paths.rcsd.join("a.conf"),
            "service [2345] /sbin/aaa\n",
        )
        .unwrap();
        fs::write(context.paths.rcsd.join("skipme.txt"), "service /sbin/no\n").unwrap();
        fs::create_dir(context.paths.rcsd.join("subdir.conf")).unwrap();
        symlink(
            dir.path().join("gone.conf"),
            context.paths.rcsd.join("dangling.conf"),
        )
        .unwrap();

        // a file named just ".conf" still counts
        fs::write(
            context.paths.rcsd.join(".conf"),
            "service [2345] /sbin/bare\n",
        )
        .unwrap();

        let mut svc = SvcTable::new();
        let mut tty = TtyTable::new();
        let mut sys = RecordingPlatform::default();
        let mut mon = ConfMonitor::new();

        let mut b = Backends {
            svc: &mut svc,
            tty: &mut tty,
            sys: &mut sys,
        };
        reload(&mut context, &mut mon, &mut b, &mut kcon);

        assert_eq!(context.cfglevel, 3);
        let registered: Vec<&str> = svc.iter().map(|u| u.cmd.as_str()).collect();
        assert_eq!(registered, vec!["/sbin/bare", "/sbin/aaa", "/sbin/bbb"]);
        assert_eq!(sys.hostnames, vec![util::DEFAULT_HOSTNAME.to_string()]);

        // drop one file; its service is swept on the next reload
        fs::remove_file(context.paths.rcsd.join("a.conf")).unwrap();
        let mut b = Backends {
            svc: &mut svc,
            tty: &mut tty,
            sys: &mut sys,
        };
        reload(&mut context, &mut mon, &mut b, &mut kcon);
        svc.clean_dynamic(&mut kcon);

        assert!(svc.get("/sbin/aaa").is_none());
        assert!(svc.get("/sbin/bbb").is_some());
    }

    #[test]
    fn reload_is_idempotent_without_filesystem_changes() {
        let mut kcon = KConsole::sink();
        let dir = TempDir::new().unwrap();
        let mut context = scratch_context(&dir);
        fs::create_dir(&context.paths.rcsd).unwrap();

        fs::write(&context.paths.conf, "service [2345] /sbin/rootsvc\n").unwrap();
        fs::write(
            context.paths.rcsd.join("svc.conf"),
            "service [2345] <sys/ok> /sbin/dropsvc -x\ntty [2345] /dev/tty1 115200\n",
        )
        .unwrap();

        let mut svc = SvcTable::new();
        let mut tty = TtyTable::new();
        let mut sys = RecordingPlatform::default();
        let mut mon = ConfMonitor::new();

        let snapshot = |svc: &SvcTable| -> Vec<(SvcKind, String, u16, String)> {
            svc.iter()
                .map(|u| (u.kind, u.cmd.clone(), u.runlevels, u.cond.clone()))
                .collect()
        };

        let mut b = Backends {
            svc: &mut svc,
            tty: &mut tty,
            sys: &mut sys,
        };
        reload(&mut context, &mut mon, &mut b, &mut kcon);
        let first = snapshot(&svc);

        let mut b = Backends {
            svc: &mut svc,
            tty: &mut tty,
            sys: &mut sys,
        };
        reload(&mut context, &mut mon, &mut b, &mut kcon);
        svc.clean_dynamic(&mut kcon);
        let second = snapshot(&svc);

        assert_eq!(first, second);
        assert_eq!(tty.len(), 1);
        assert!(tty.get("/dev/tty1").is_some());
    }

    #[test]
    fn reload_drains_the_change_set() {
        let mut kcon = KConsole::sink();
        let dir = TempDir::new().unwrap();
        let mut context = scratch_context(&dir);
        fs::create_dir(&context.paths.rcsd).unwrap();
        fs::write(&context.paths.conf, "runlevel 2\n").unwrap();

        let poll = mio::Poll::new().unwrap();
        let mut mon = ConfMonitor::new();
        assert_eq!(mon.watch(poll.registry(), &context.paths, &mut kcon), 0);

        fs::write(
            context.paths.rcsd.join("new.conf"),
            "service [2345] /sbin/fresh\n",
        )
        .unwrap();
        mon.handle(monitor::RCSD_WATCH_TOKEN, &mut kcon);
        assert!(mon.any_change());

        let mut svc = SvcTable::new();
        let mut tty = TtyTable::new();
        let mut sys = RecordingPlatform::default();
        let mut b = Backends {
            svc: &mut svc,
            tty: &mut tty,
            sys: &mut sys,
        };
        reload(&mut context, &mut mon, &mut b, &mut kcon);

        assert!(!mon.any_change());
        assert!(svc.get("/sbin/fresh").is_some());
    }

    #[test]
    fn hostname_file_wins_over_directive() {
        let mut kcon = KConsole::sink();
        let dir = TempDir::new().unwrap();
        let mut context = scratch_context(&dir);
        fs::write(&context.paths.conf, "host fromconf\n").unwrap();
        fs::write(&context.paths.hostname_file, "fromfile\n").unwrap();

        let mut svc = SvcTable::new();
        let mut tty = TtyTable::new();
        let mut sys = RecordingPlatform::default();
        let mut mon = ConfMonitor::new();
        let mut b = Backends {
            svc: &mut svc,
            tty: &mut tty,
            sys: &mut sys,
        };
        reload(&mut context, &mut mon, &mut b, &mut kcon);

        assert_eq!(sys.hostnames, vec!["fromfile".to_string()]);
        assert_eq!(context.hostname.as_deref(), Some("fromfile"));
    }

    #[test]
    fn drop_in_rlimits_seed_from_global_baseline() {
        let mut kcon = KConsole::sink();
        let dir = TempDir::new().unwrap();
        let mut context = scratch_context(&dir);
        fs::create_dir(&context.paths.rcsd).unwrap();

        // no rlimit lines in the root config: the baseline is the OS
        // snapshot, and the drop-in's scratch copy diverges privately
        fs::write(&context.paths.conf, "").unwrap();
        fs::write(
            context.paths.rcsd.join("svc.conf"),
            "rlimit hard core 0\nservice [2345] /sbin/quiet\n",
        )
        .unwrap();
        fs::write(
            context.paths.rcsd.join("tail.conf"),
            "service [2345] /sbin/plain\n",
        )
        .unwrap();

        let mut svc = SvcTable::new();
        let mut tty = TtyTable::new();
        let mut sys = RecordingPlatform::default();
        let mut mon = ConfMonitor::new();
        let mut b = Backends {
            svc: &mut svc,
            tty: &mut tty,
            sys: &mut sys,
        };
        reload(&mut context, &mut mon, &mut b, &mut kcon);

        let core = rlimit::str2rlim("core").unwrap();
        let quiet = svc.get("/sbin/quiet").unwrap();
        assert_eq!(quiet.rlimits.limit(core).unwrap().hard, 0);

        // the sibling file and the global baseline are unaffected
        let plain = svc.get("/sbin/plain").unwrap();
        assert_eq!(plain.rlimits, context.rlimits);
    }
}
