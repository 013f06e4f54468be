use std::fmt;

use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    FreeBsd,
    NetBsd,
    OpenBsd,
    Fuchsia,
    Windows,
    Darwin,
    Trusty,
    Test,
}

impl Os {
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::FreeBsd => "freebsd",
            Os::NetBsd => "netbsd",
            Os::OpenBsd => "openbsd",
            Os::Fuchsia => "fuchsia",
            Os::Windows => "windows",
            Os::Darwin => "darwin",
            Os::Trusty => "trusty",
            Os::Test => "test",
        }
    }

    pub fn is_linux_family(&self) -> bool {
        matches!(self, Os::Linux)
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Target {
    pub os: Os,
    pub arch: String,
}

impl Target {
    pub fn new(os: Os, arch: &str) -> Self {
        Target {
            os,
            arch: arch.to_string(),
        }
    }
}

/// A fuzzer-generated test program. The serialized form is owned by the
/// mutation engine and treated as opaque text here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub target: Target,
    pub serialized: Vec<u8>,
}

impl Program {
    pub fn new(target: Target, serialized: &[u8]) -> Self {
        Program {
            target,
            serialized: serialized.to_vec(),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(String::from_utf8_lossy(&self.serialized).trim_end())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sandbox {
    #[default]
    None,
    Setuid,
    Namespace,
    Android,
}

impl fmt::Display for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sandbox::None => "none",
            Sandbox::Setuid => "setuid",
            Sandbox::Namespace => "namespace",
            Sandbox::Android => "android",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultInjection {
    pub call: i32,
    pub nth: i32,
}

/// Options shared by the harness command line and the reproducer source
/// generator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    pub threaded: bool,
    pub collide: bool,
    pub repeat: bool,
    pub procs: u32,
    pub sandbox: Sandbox,
    pub sandbox_arg: i64,
    pub fault: Option<FaultInjection>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            threaded: false,
            collide: false,
            repeat: false,
            procs: 1,
            sandbox: Sandbox::None,
            sandbox_arg: 0,
            fault: None,
        }
    }
}

/// A fault extracted from console output by a [`Reporter`](crate::core::traits::reporter::Reporter).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub title: String,
    pub report: Vec<u8>,
    pub output: Vec<u8>,
    pub symbolized: bool,
}

impl Report {
    pub fn new(title: &str, report: &[u8], output: &[u8]) -> Self {
        Report {
            title: title.to_string(),
            report: report.to_vec(),
            output: output.to_vec(),
            symbolized: false,
        }
    }
}
