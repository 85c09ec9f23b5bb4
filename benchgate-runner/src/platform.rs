// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The platform instances run on.

use crate::errors::PlatformParseError;
use std::{fmt, str::FromStr};

/// The operating system inside an instance's environment.
///
/// The platform decides the default working directory, the shell commands run under, and the
/// shape of derived image names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Platform {
    /// A Linux environment, driven through `bash`.
    #[default]
    Linux,

    /// A Windows environment, driven through PowerShell.
    Windows,
}

impl Platform {
    /// All known platforms.
    pub const ALL: &'static [Self] = &[Self::Linux, Self::Windows];

    /// The string form of the platform, as accepted on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
        }
    }

    /// The directory the repository under test is checked out to.
    pub fn default_workdir(self) -> &'static str {
        match self {
            Self::Linux => "/testbed",
            Self::Windows => r"C:\testbed",
        }
    }

    /// The architecture tag used in derived image names.
    pub fn image_tag(self) -> &'static str {
        match self {
            Self::Linux => "x86_64",
            Self::Windows => "win",
        }
    }

    /// Derives an image name for an instance that doesn't specify one.
    ///
    /// `__` can't appear in image names, so it's replaced with `_1776_`.
    pub fn default_image(self, prefix: &str, instance_id: &str) -> String {
        format!(
            "{prefix}.{}.{}",
            self.image_tag(),
            instance_id.replace("__", "_1776_").to_lowercase()
        )
    }

    /// A command that, if the working directory isn't a repository root, changes into the first
    /// repository found up to two levels down.
    ///
    /// Some images check the repository out one level below the default working directory.
    pub fn repo_root_probe(self) -> &'static str {
        match self {
            Self::Linux => {
                r#"[ -d .git ] || { g=$(find . -maxdepth 2 -mindepth 2 -type d -name .git -print -quit); [ -n "$g" ] && cd "${g%/.git}"; }"#
            }
            Self::Windows => {
                "if (-not (Test-Path .git)) { $g = Get-ChildItem -Directory -Recurse -Depth 2 -Force -ErrorAction SilentlyContinue | Where-Object { $_.Name -eq '.git' } | Select-Object -First 1; if ($g) { Set-Location $g.Parent.FullName } }"
            }
        }
    }

    /// A command that prints the current directory, run after the probe.
    pub fn print_workdir(self) -> &'static str {
        match self {
            Self::Linux => "pwd",
            Self::Windows => "(Get-Location).Path",
        }
    }

    /// The script name and run command used when an instance has no print commands.
    ///
    /// The test commands are written to the script, which is run with its output redirected to
    /// [`LEGACY_LOG_FILE`](Self::LEGACY_LOG_FILE).
    pub fn legacy_script(self) -> &'static str {
        match self {
            Self::Linux => "run_test.sh",
            Self::Windows => "run_test.ps1",
        }
    }

    /// The log file the legacy script writes to.
    pub const LEGACY_LOG_FILE: &'static str = "testlog.out";

    /// Returns a command that writes `contents` to `file` in the working directory.
    pub fn write_file_command(self, file: &str, contents: &str) -> String {
        match self {
            Self::Linux => {
                format!("cat > {file} <<'BENCHGATE_EOF'\n{contents}\nBENCHGATE_EOF")
            }
            Self::Windows => {
                format!("Set-Content -Path {file} -Encoding UTF8 -Value @'\n{contents}\n'@")
            }
        }
    }

    /// Returns a command that runs `script` with all output redirected to `log_file`.
    pub fn run_script_command(self, script: &str, log_file: &str) -> String {
        match self {
            Self::Linux => format!("bash {script} > {log_file} 2>&1"),
            Self::Windows => format!("& .\\{script} *> {log_file}"),
        }
    }

    /// Returns a command that prints `file`.
    pub fn cat_command(self, file: &str) -> String {
        match self {
            Self::Linux => format!("cat {file}"),
            Self::Windows => format!("Get-Content {file}"),
        }
    }
}

impl FromStr for Platform {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(Self::Linux),
            "windows" => Ok(Self::Windows),
            _ => Err(PlatformParseError::new(s)),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
