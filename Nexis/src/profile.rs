// profile.rs
//
// Operating system personalities a simulated machine can boot as.
//
// A profile only decides names, environment and sizing; scheduling and
// memory behave the same under every profile.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::process::Process;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

pub trait OsProfile: Send + Sync {
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str;

    fn boot_banner(&self) -> String {
        format!("{} {} (nexis simulated kernel)", self.name(), self.version())
    }

    /// Program started for an interactive session
    fn shell_command(&self) -> &'static str;

    fn environment(&self) -> BTreeMap<String, String>;

    /// System services spawned at boot, after init
    fn services(&self) -> &'static [&'static str] {
        &[]
    }

    /// Backing store size for machines booted with this profile
    fn default_memory_size(&self) -> u64;

    /// Bytes handed to a newly created process
    fn process_memory(&self, process: &Process) -> u64;
}

fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxProfile;

impl OsProfile for LinuxProfile {
    fn name(&self) -> &'static str {
        "Linux"
    }

    fn version(&self) -> &'static str {
        "6.1"
    }

    fn shell_command(&self) -> &'static str {
        "/bin/bash"
    }

    fn environment(&self) -> BTreeMap<String, String> {
        env(&[
            ("HOME", "/root"),
            ("PATH", "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin"),
            ("SHELL", "/bin/bash"),
            ("TERM", "xterm-256color"),
            ("USER", "root"),
        ])
    }

    fn services(&self) -> &'static [&'static str] {
        &["systemd-journald", "sshd", "cron"]
    }

    fn default_memory_size(&self) -> u64 {
        32 * MIB
    }

    fn process_memory(&self, process: &Process) -> u64 {
        // kernel threads get a single page
        if process.owner == "root" && process.name.starts_with('k') {
            4 * KIB
        } else {
            128 * KIB
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsProfile;

impl OsProfile for WindowsProfile {
    fn name(&self) -> &'static str {
        "Windows"
    }

    fn version(&self) -> &'static str {
        "11"
    }

    fn shell_command(&self) -> &'static str {
        "cmd.exe"
    }

    fn environment(&self) -> BTreeMap<String, String> {
        env(&[
            ("ComSpec", "C:\\Windows\\System32\\cmd.exe"),
            ("OS", "Windows_NT"),
            ("PATH", "C:\\Windows\\System32;C:\\Windows"),
            ("SystemRoot", "C:\\Windows"),
            ("USERNAME", "Administrator"),
            ("USERPROFILE", "C:\\Users\\Administrator"),
        ])
    }

    fn services(&self) -> &'static [&'static str] {
        &["lsass.exe", "services.exe", "csrss.exe", "winlogon.exe", "svchost.exe"]
    }

    fn default_memory_size(&self) -> u64 {
        64 * MIB
    }

    fn process_memory(&self, _process: &Process) -> u64 {
        256 * KIB
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MacProfile;

impl OsProfile for MacProfile {
    fn name(&self) -> &'static str {
        "macOS"
    }

    fn version(&self) -> &'static str {
        "14"
    }

    fn shell_command(&self) -> &'static str {
        "/bin/zsh"
    }

    fn environment(&self) -> BTreeMap<String, String> {
        env(&[
            ("HOME", "/Users/admin"),
            ("PATH", "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin"),
            ("SHELL", "/bin/zsh"),
            ("TMPDIR", "/private/tmp"),
            ("USER", "admin"),
        ])
    }

    fn services(&self) -> &'static [&'static str] {
        &["launchd", "WindowServer"]
    }

    fn default_memory_size(&self) -> u64 {
        48 * MIB
    }

    fn process_memory(&self, _process: &Process) -> u64 {
        192 * KIB
    }
}

/// Profile selector for configuration and the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileKind {
    #[default]
    Linux,
    Windows,
    Mac,
}

impl ProfileKind {
    pub fn build(self) -> Box<dyn OsProfile> {
        match self {
            ProfileKind::Linux => Box::new(LinuxProfile),
            ProfileKind::Windows => Box::new(WindowsProfile),
            ProfileKind::Mac => Box::new(MacProfile),
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProfileKind::Linux => "linux",
            ProfileKind::Windows => "windows",
            ProfileKind::Mac => "mac",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ProfileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(ProfileKind::Linux),
            "windows" | "win" => Ok(ProfileKind::Windows),
            "mac" | "macos" | "darwin" => Ok(ProfileKind::Mac),
            _ => Err(format!("Unknown OS profile: {}", s)),
        }
    }
}
