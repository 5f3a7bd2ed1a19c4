//! Platform identification for locating the watch engine.
//!
//! Resolves the running process's OS, architecture and (on Linux) libc flavor
//! into the artifact name of the engine built for it.

use std::fmt;
use std::path::Path;

use crate::error::{FileEventsError, FileEventsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    MacOs,
    Windows,
    Other(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    I386,
    X86_64,
    Aarch64,
    Other(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Libc {
    Gnu,
    Musl,
}

/// The platform the process is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
    /// Only probed on Linux.
    pub libc: Option<Libc>,
}

impl Os {
    fn from_consts(os: &'static str) -> Self {
        match os {
            "linux" => Os::Linux,
            "macos" => Os::MacOs,
            "windows" => Os::Windows,
            other => Os::Other(other),
        }
    }

    fn id(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::MacOs => "osx",
            Os::Windows => "windows",
            Os::Other(name) => name,
        }
    }
}

impl Arch {
    fn from_consts(arch: &'static str) -> Self {
        match arch {
            "x86" => Arch::I386,
            "x86_64" => Arch::X86_64,
            "aarch64" => Arch::Aarch64,
            other => Arch::Other(other),
        }
    }

    fn id(&self) -> &'static str {
        match self {
            Arch::I386 => "i386",
            Arch::X86_64 => "amd64",
            Arch::Aarch64 => "aarch64",
            Arch::Other(name) => name,
        }
    }

    fn target_name(&self) -> Option<&'static str> {
        match self {
            Arch::I386 => Some("i386"),
            Arch::X86_64 => Some("x86_64"),
            Arch::Aarch64 => Some("aarch64"),
            Arch::Other(_) => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os.id(), self.arch.id())
    }
}

/// The engine artifact expected for a platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineArtifact {
    /// e.g. `x86_64-linux-gnu`
    pub platform_name: String,
    /// e.g. `libfile-events.so`
    pub library_name: &'static str,
}

impl fmt::Display for EngineArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform_name, self.library_name)
    }
}

impl Platform {
    /// Detect the platform of the running process.
    pub fn current() -> Self {
        let os = Os::from_consts(std::env::consts::OS);
        let arch = Arch::from_consts(std::env::consts::ARCH);
        let libc = match os {
            Os::Linux => Some(if is_linux_with_musl() {
                Libc::Musl
            } else {
                Libc::Gnu
            }),
            _ => None,
        };
        Self { os, arch, libc }
    }

    /// The platform name the engine is published under.
    pub fn platform_name(&self) -> FileEventsResult<String> {
        let arch = match (self.os, self.arch) {
            (Os::MacOs, Arch::I386) => None,
            (_, arch) => arch.target_name(),
        };
        let Some(arch) = arch else {
            return Err(self.unavailable());
        };

        match self.os {
            Os::Windows => Ok(format!("{arch}-windows-gnu")),
            Os::Linux => {
                let variant = match self.libc {
                    Some(Libc::Musl) => "musl",
                    _ => "gnu",
                };
                Ok(format!("{arch}-linux-{variant}"))
            }
            Os::MacOs => Ok(format!("{arch}-macos")),
            Os::Other(_) => Err(self.unavailable()),
        }
    }

    /// The engine library file name for this OS.
    pub fn library_name(&self) -> FileEventsResult<&'static str> {
        match self.os {
            Os::Linux => Ok("libfile-events.so"),
            Os::MacOs => Ok("libfile-events.dylib"),
            Os::Windows => Ok("file-events.dll"),
            Os::Other(_) => Err(self.unavailable()),
        }
    }

    /// Resolve the full artifact for this platform.
    pub fn artifact(&self) -> FileEventsResult<EngineArtifact> {
        Ok(EngineArtifact {
            platform_name: self.platform_name()?,
            library_name: self.library_name()?,
        })
    }

    fn unavailable(&self) -> FileEventsError {
        FileEventsError::unavailable(format!(
            "Native file events integration is not available for {self}."
        ))
    }
}

/// Musl maps `ld-musl-<arch>.so.1` into every process; look for it.
fn is_linux_with_musl() -> bool {
    match probe_musl(Path::new("/proc/self/map_files")) {
        Ok(found) => found,
        Err(e) => {
            crate::debug_event!("platform", "musl probe failed, assuming glibc", "{e}");
            false
        }
    }
}

fn probe_musl(map_files: &Path) -> std::io::Result<bool> {
    if !map_files.is_dir() {
        return Ok(false);
    }
    for entry in std::fs::read_dir(map_files)? {
        let target = std::fs::canonicalize(entry?.path())?;
        let is_musl = target
            .file_name()
            .is_some_and(|name| name.to_string_lossy().contains("-musl-"));
        if is_musl {
            return Ok(true);
        }
    }
    Ok(false)
}
