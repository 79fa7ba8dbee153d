//! Resource-limit vectors for the supervisor and its services.
//!
//! The root configuration may override the limits the supervisor itself runs
//! under; each drop-in file gets a scratch copy of that global baseline to
//! mutate for the services it declares.

use crate::early_logging::KConsole;
use nix::libc::{rlim_t, RLIM_INFINITY};
use nix::sys::resource::{getrlimit, setrlimit, Resource};

/// Number of resources understood by `rlimit` directives.
pub const RLIMIT_NLIMITS: usize = 16;

/// Directive names and the resources they map to, in name order.
static RLIMIT_NAMES: [(&str, Resource); RLIMIT_NLIMITS] = [
    ("as", Resource::RLIMIT_AS),
    ("core", Resource::RLIMIT_CORE),
    ("cpu", Resource::RLIMIT_CPU),
    ("data", Resource::RLIMIT_DATA),
    ("fsize", Resource::RLIMIT_FSIZE),
    ("locks", Resource::RLIMIT_LOCKS),
    ("memlock", Resource::RLIMIT_MEMLOCK),
    ("msgqueue", Resource::RLIMIT_MSGQUEUE),
    ("nice", Resource::RLIMIT_NICE),
    ("nofile", Resource::RLIMIT_NOFILE),
    ("nproc", Resource::RLIMIT_NPROC),
    ("rss", Resource::RLIMIT_RSS),
    ("rtprio", Resource::RLIMIT_RTPRIO),
    ("rttime", Resource::RLIMIT_RTTIME),
    ("sigpending", Resource::RLIMIT_SIGPENDING),
    ("stack", Resource::RLIMIT_STACK),
];

/// Index of `name` in the limit vector, if recognized.
pub fn str2rlim(name: &str) -> Option<usize> {
    RLIMIT_NAMES.iter().position(|(n, _)| *n == name)
}

/// Directive name of the limit at `index`.
pub fn rlim2str(index: usize) -> &'static str {
    RLIMIT_NAMES.get(index).map(|(n, _)| *n).unwrap_or("unknown")
}

/// Soft and hard limit of one resource. `RLIM_INFINITY` marks
/// `unlimited`/`infinity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rlimit {
    /// Soft limit, adjustable by the process itself.
    pub soft: rlim_t,

    /// Hard limit, the ceiling for the soft limit.
    pub hard: rlim_t,
}

/// Value-type vector of all recognized resource limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RlimitSet([Rlimit; RLIMIT_NLIMITS]);
impl RlimitSet {
    /// A vector with every limit set to infinity. Inert starting point
    /// before the first OS snapshot.
    pub fn unlimited() -> Self {
        RlimitSet(
            [Rlimit {
                soft: RLIM_INFINITY,
                hard: RLIM_INFINITY,
            }; RLIMIT_NLIMITS],
        )
    }

    /// Overwrite the vector with the limits currently in force for this
    /// process.
    pub fn snapshot_os(&mut self, kcon: &mut KConsole) {
        for (i, (_, resource)) in RLIMIT_NAMES.iter().enumerate() {
            match getrlimit(*resource) {
                Ok((soft, hard)) => self.0[i] = Rlimit { soft, hard },
                Err(e) => kdebug!(kcon, "rlimit: failed reading {}: {}", rlim2str(i), e),
            }
        }
    }

    /// Apply the vector to this process, one resource at a time. Individual
    /// failures are logged and skipped.
    pub fn apply(&self, kcon: &mut KConsole) {
        for (i, (_, resource)) in RLIMIT_NAMES.iter().enumerate() {
            if setrlimit(*resource, self.0[i].soft, self.0[i].hard).is_err() {
                kwarn!(kcon, "rlimit: failed setting {}", rlim2str(i));
            }
        }
    }

    /// The limit pair at `index`.
    pub fn limit(&self, index: usize) -> Option<Rlimit> {
        self.0.get(index).copied()
    }

    /// Mutate one limit from the argument of an `rlimit` directive:
    /// `<soft|hard> <name> <value>`. Malformed input warns and leaves the
    /// vector untouched.
    pub fn parse_line(&mut self, args: &str, kcon: &mut KConsole) {
        let mut tokens = args.split_whitespace();
        let (level, name, value) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(level), Some(name), Some(value)) => (level, name, value),
            _ => {
                kwarn!(kcon, "rlimit: parse error");
                return;
            }
        };

        let resource = match str2rlim(name) {
            Some(resource) => resource,
            None => {
                kwarn!(kcon, "rlimit: parse error");
                return;
            }
        };

        // `unlimited` is the official keyword, `infinity` the prlimit(1) one
        let cfg = if value == "unlimited" || value == "infinity" {
            RLIM_INFINITY
        } else {
            match value.parse::<rlim_t>() {
                Ok(v) if v <= (2 as rlim_t) << 31 => v,
                _ => {
                    kwarn!(
                        kcon,
                        "rlimit: invalid {} value: {}",
                        rlim2str(resource),
                        value
                    );
                    return;
                }
            }
        };

        match level {
            "soft" => self.0[resource].soft = cfg,
            "hard" => self.0[resource].hard = cfg,
            _ => kwarn!(kcon, "rlimit: parse error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for (name, _) in RLIMIT_NAMES.iter() {
            let index = str2rlim(name).expect("recognized name");
            assert_eq!(rlim2str(index), *name);
        }
        assert_eq!(str2rlim("bogus"), None);
        assert_eq!(rlim2str(RLIMIT_NLIMITS), "unknown");
    }

    #[test]
    fn parse_sets_hard_limit() {
        let mut kcon = KConsole::sink();
        let mut set = RlimitSet::unlimited();

        set.parse_line("hard nofile 4096", &mut kcon);

        let nofile = str2rlim("nofile").unwrap();
        assert_eq!(set.limit(nofile).unwrap().hard, 4096);
        assert_eq!(set.limit(nofile).unwrap().soft, RLIM_INFINITY);
    }

    #[test]
    fn parse_accepts_unlimited_keywords() {
        let mut kcon = KConsole::sink();
        let mut set = RlimitSet::unlimited();
        let cpu = str2rlim("cpu").unwrap();

        set.parse_line("soft cpu 10", &mut kcon);
        assert_eq!(set.limit(cpu).unwrap().soft, 10);

        set.parse_line("soft cpu unlimited", &mut kcon);
        assert_eq!(set.limit(cpu).unwrap().soft, RLIM_INFINITY);

        set.parse_line("soft cpu 10", &mut kcon);
        set.parse_line("soft cpu infinity", &mut kcon);
        assert_eq!(set.limit(cpu).unwrap().soft, RLIM_INFINITY);
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        let mut kcon = KConsole::sink();
        let mut set = RlimitSet::unlimited();
        let pristine = set.clone();

        set.parse_line("soft bogus 10", &mut kcon);
        set.parse_line("mushy nofile 10", &mut kcon);
        set.parse_line("soft nofile", &mut kcon);
        set.parse_line("soft nofile -1", &mut kcon);
        set.parse_line("soft nofile 8589934592", &mut kcon);

        assert_eq!(set, pristine);
    }

    #[test]
    fn snapshot_reflects_process_limits() {
        let mut kcon = KConsole::sink();
        let mut set = RlimitSet::unlimited();
        set.snapshot_os(&mut kcon);

        let nofile = str2rlim("nofile").unwrap();
        let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).expect("getrlimit");
        assert_eq!(set.limit(nofile).unwrap(), Rlimit { soft, hard });
    }
}
