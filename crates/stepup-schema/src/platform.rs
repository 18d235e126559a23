/// Runtime identifier of a published build (OS plus processor architecture).
///
/// Releases are published per platform, under a directory named after the
/// identifier (`linux-x64/linux-x64_latest.json`).
///
/// # Example
///
/// ```
/// use stepup_schema::Platform;
///
/// let rid: Platform = "linux-x64".parse().unwrap();
/// assert_eq!(rid.as_str(), "linux-x64");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Platform {
    /// 32-bit Windows
    #[serde(rename = "win-x86")]
    WinX86,
    /// 64-bit Windows on Intel/AMD
    #[serde(rename = "win-x64")]
    WinX64,
    /// Windows on ARM64
    #[serde(rename = "win-arm64")]
    WinArm64,
    /// Linux on `x86_64`
    #[serde(rename = "linux-x64")]
    LinuxX64,
    /// Linux on 32-bit ARM
    #[serde(rename = "linux-arm")]
    LinuxArm,
    /// Linux on ARM64
    #[serde(rename = "linux-arm64")]
    LinuxArm64,
    /// Intel Macs
    #[serde(rename = "osx-x64")]
    OsxX64,
    /// Apple Silicon Macs
    #[serde(rename = "osx-arm64")]
    OsxArm64,
}

impl Platform {
    /// Map an OS/architecture pair (as in `std::env::consts`) to a platform.
    pub fn from_parts(os: &str, arch: &str) -> Option<Self> {
        match (os, arch) {
            ("windows", "x86") => Some(Self::WinX86),
            ("windows", "x86_64") => Some(Self::WinX64),
            ("windows", "aarch64") => Some(Self::WinArm64),
            ("linux", "x86_64") => Some(Self::LinuxX64),
            ("linux", "arm") => Some(Self::LinuxArm),
            ("linux", "aarch64") => Some(Self::LinuxArm64),
            ("macos", "x86_64") => Some(Self::OsxX64),
            ("macos", "aarch64") => Some(Self::OsxArm64),
            _ => None,
        }
    }

    /// Get the platform of the running process.
    ///
    /// # Errors
    ///
    /// Returns an error string naming the OS and architecture when the
    /// combination has no published builds.
    pub fn current() -> Result<Self, String> {
        let (os, arch) = (std::env::consts::OS, std::env::consts::ARCH);
        Self::from_parts(os, arch)
            .ok_or_else(|| format!("Unsupported platform: {os} on {arch}"))
    }

    /// Runtime identifier string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WinX86 => "win-x86",
            Self::WinX64 => "win-x64",
            Self::WinArm64 => "win-arm64",
            Self::LinuxX64 => "linux-x64",
            Self::LinuxArm => "linux-arm",
            Self::LinuxArm64 => "linux-arm64",
            Self::OsxX64 => "osx-x64",
            Self::OsxArm64 => "osx-arm64",
        }
    }

    /// All known platforms.
    pub const ALL: [Platform; 8] = [
        Self::WinX86,
        Self::WinX64,
        Self::WinArm64,
        Self::LinuxX64,
        Self::LinuxArm,
        Self::LinuxArm64,
        Self::OsxX64,
        Self::OsxArm64,
    ];
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| format!("Unknown runtime identifier: {s}"))
    }
}
