//! Current system identification and definition filtering

use std::fmt;

use serde::{Deserialize, Serialize};
use wiz_version::{Requirement, Version};

use crate::error::{Result, WizError};

/// Description of the system a context is resolved for.
///
/// Definitions carrying a system filter are only indexed when they are
/// compatible with this descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct System {
    platform: String,
    arch: String,
    os_name: String,
    os_version: Version,
}

impl System {
    /// Create a descriptor from explicit values
    pub fn new(platform: &str, arch: &str, os_name: &str, os_version: Version) -> Self {
        System {
            platform: platform.to_string(),
            arch: arch.to_string(),
            os_name: os_name.to_string(),
            os_version,
        }
    }

    /// Query a descriptor for the machine the process runs on.
    ///
    /// The operating system version is read from `/etc/os-release` on Linux
    /// and left at zero on platforms where it cannot be identified without
    /// spawning a process.
    pub fn current() -> Result<Self> {
        let platform = match std::env::consts::OS {
            "linux" => "linux",
            "macos" => "mac",
            "windows" => "windows",
            other => return Err(WizError::CurrentSystem(other.to_string())),
        };

        let arch = match std::env::consts::ARCH {
            "x86" => "i386",
            other => other,
        };

        let (os_name, os_version) = match platform {
            "linux" => linux_distribution().unwrap_or_else(|| ("linux".to_string(), Version::zero())),
            other => (other.to_string(), Version::zero()),
        };

        Ok(System::new(platform, arch, &os_name, os_version))
    }

    /// Return the platform name ("linux", "mac" or "windows")
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Return the architecture ("x86_64", "aarch64" or "i386")
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Return the operating system name (e.g. "el", "centos", "mac")
    pub fn os_name(&self) -> &str {
        &self.os_name
    }

    /// Return the operating system version
    pub fn os_version(&self) -> &Version {
        &self.os_version
    }

    /// Check whether a definition system *filter* is compatible.
    ///
    /// Each element of the filter must match when set; the "os" element is a
    /// requirement-style string using PEP 440 specifiers (e.g. "el >=7, <8").
    pub fn is_compatible(&self, filter: &SystemFilter) -> Result<bool> {
        if let Some(platform) = &filter.platform {
            if platform != &self.platform {
                return Ok(false);
            }
        }

        if let Some(arch) = &filter.arch {
            if arch != &self.arch {
                return Ok(false);
            }
        }

        if let Some(os) = &filter.os {
            let requirement = Requirement::parse(os)?;
            if requirement.name() != self.os_name
                || !requirement.matches_version(&self.os_version)
            {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : {} : {}=={}",
            self.platform, self.arch, self.os_name, self.os_version
        )
    }
}

/// System constraint declared by a definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

// Extract (distribution, version) from /etc/os-release.
fn linux_distribution() -> Option<(String, Version)> {
    let content = std::fs::read_to_string("/etc/os-release").ok()?;

    let field = |name: &str| {
        content
            .lines()
            .find(|line| line.starts_with(&format!("{}=", name)))
            .map(|line| line[name.len() + 1..].trim_matches('"').to_string())
    };

    let name = field("ID")?;
    let version = Version::parse(&field("VERSION_ID")?).ok()?;
    Some((name, version))
}
