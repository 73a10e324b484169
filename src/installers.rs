//! Installer registry: the supported package managers and how to invoke them.
//!
//! Installers form a closed set ([`Installer`]). Each one has a static
//! [`InstallerSpec`] describing the binary to run, the argument template for
//! "install this package", an optional template for "is this package already
//! installed", and the platforms it applies to. Nothing here spawns processes.

use crate::error::AegisError;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Placeholder substituted with the package name in argument templates.
const PACKAGE: &str = "{package}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Shell used to run raw user input: `(program, flag)`.
    pub fn shell(self) -> (&'static str, &'static str) {
        match self {
            Platform::Windows => ("cmd", "/C"),
            Platform::MacOs | Platform::Linux => ("sh", "-c"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::MacOs => "macos",
            Platform::Linux => "linux",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether this process runs as root (Unix) or as an administrator (Windows).
#[cfg(unix)]
pub fn is_elevated() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(windows)]
pub fn is_elevated() -> bool {
    // SAFETY: IsUserAnAdmin takes no arguments and only queries the token.
    unsafe { windows_sys::Win32::UI::Shell::IsUserAnAdmin() != 0 }
}

#[cfg(not(any(unix, windows)))]
pub fn is_elevated() -> bool {
    false
}

/// Startup warning shown when system package managers may refuse to work.
pub fn privileges_notice(elevated: bool) -> Option<&'static str> {
    (!elevated).then_some("⚠️  Admin rights not detected. Some installs may fail.")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Installer {
    Pip,
    Npm,
    Apt,
    Brew,
    Winget,
    Choco,
    /// Download-and-extract procedure instead of a package manager.
    Manual,
}

impl Installer {
    pub const ALL: [Installer; 7] = [
        Installer::Pip,
        Installer::Npm,
        Installer::Apt,
        Installer::Brew,
        Installer::Winget,
        Installer::Choco,
        Installer::Manual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Installer::Pip => "pip",
            Installer::Npm => "npm",
            Installer::Apt => "apt",
            Installer::Brew => "brew",
            Installer::Winget => "winget",
            Installer::Choco => "choco",
            Installer::Manual => "manual",
        }
    }

    pub fn spec(self) -> &'static InstallerSpec {
        match self {
            Installer::Pip => &PIP,
            Installer::Npm => &NPM,
            Installer::Apt => &APT,
            Installer::Brew => &BREW,
            Installer::Winget => &WINGET,
            Installer::Choco => &CHOCO,
            Installer::Manual => &MANUAL,
        }
    }
}

impl fmt::Display for Installer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Installer {
    type Err = AegisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pip" | "pip3" => Ok(Installer::Pip),
            "npm" => Ok(Installer::Npm),
            "apt" | "apt-get" => Ok(Installer::Apt),
            "brew" | "homebrew" => Ok(Installer::Brew),
            "winget" => Ok(Installer::Winget),
            "choco" | "chocolatey" => Ok(Installer::Choco),
            "manual" => Ok(Installer::Manual),
            _ => Err(AegisError::UnsupportedInstaller(s.to_string())),
        }
    }
}

/// Static description of how to drive one installer.
#[derive(Debug)]
pub struct InstallerSpec {
    pub installer: Installer,
    pub binary: &'static str,
    pub install_args: &'static [&'static str],
    /// `(program, args)` that exits zero when the package is installed.
    pub query: Option<(&'static str, &'static [&'static str])>,
    pub platforms: &'static [Platform],
}

const EVERYWHERE: &[Platform] = &[Platform::Windows, Platform::MacOs, Platform::Linux];

static PIP: InstallerSpec = InstallerSpec {
    installer: Installer::Pip,
    binary: "pip",
    install_args: &["install", PACKAGE],
    query: Some(("pip", &["show", PACKAGE])),
    platforms: EVERYWHERE,
};

static NPM: InstallerSpec = InstallerSpec {
    installer: Installer::Npm,
    binary: "npm",
    install_args: &["install", "-g", PACKAGE],
    query: Some(("npm", &["ls", "-g", "--depth=0", PACKAGE])),
    platforms: EVERYWHERE,
};

static APT: InstallerSpec = InstallerSpec {
    installer: Installer::Apt,
    binary: "apt-get",
    install_args: &["install", "-y", PACKAGE],
    query: Some(("dpkg", &["-s", PACKAGE])),
    platforms: &[Platform::Linux],
};

static BREW: InstallerSpec = InstallerSpec {
    installer: Installer::Brew,
    binary: "brew",
    install_args: &["install", PACKAGE],
    query: Some(("brew", &["list", PACKAGE])),
    platforms: &[Platform::MacOs, Platform::Linux],
};

static WINGET: InstallerSpec = InstallerSpec {
    installer: Installer::Winget,
    binary: "winget",
    install_args: &[
        "install",
        "--accept-package-agreements",
        "--accept-source-agreements",
        PACKAGE,
    ],
    query: Some(("winget", &["list", "--exact", "--id", PACKAGE])),
    platforms: &[Platform::Windows],
};

static CHOCO: InstallerSpec = InstallerSpec {
    installer: Installer::Choco,
    binary: "choco",
    install_args: &["install", PACKAGE, "-y"],
    query: Some(("choco", &["list", "--local-only", "--exact", PACKAGE])),
    platforms: &[Platform::Windows],
};

static MANUAL: InstallerSpec = InstallerSpec {
    installer: Installer::Manual,
    binary: "",
    install_args: &[],
    query: None,
    platforms: EVERYWHERE,
};

fn fill(template: &[&str], package: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace(PACKAGE, package))
        .collect()
}

impl InstallerSpec {
    pub fn supports(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }

    /// Concrete `(program, args)` installing `package`.
    pub fn install_invocation(&self, package: &str) -> (String, Vec<String>) {
        (self.binary.to_string(), fill(self.install_args, package))
    }

    pub fn query_invocation(&self, package: &str) -> Option<(String, Vec<String>)> {
        self.query
            .map(|(program, args)| (program.to_string(), fill(args, package)))
    }
}

/// Platform substitutions: `(requested, host) -> replacement`.
static NORMALIZATION: &[(Installer, Platform, Installer)] = &[
    (Installer::Apt, Platform::Windows, Installer::Winget),
    (Installer::Brew, Platform::Windows, Installer::Winget),
    (Installer::Apt, Platform::MacOs, Installer::Brew),
    (Installer::Winget, Platform::MacOs, Installer::Brew),
    (Installer::Choco, Platform::MacOs, Installer::Brew),
    (Installer::Winget, Platform::Linux, Installer::Apt),
    (Installer::Choco, Platform::Linux, Installer::Apt),
];

/// Maps an installer to its equivalent on `platform`; unmapped pairs pass through.
pub fn normalize(installer: Installer, platform: Platform) -> Installer {
    let normalized = NORMALIZATION
        .iter()
        .find(|(requested, host, _)| *requested == installer && *host == platform)
        .map(|(_, _, replacement)| *replacement)
        .unwrap_or(installer);
    if normalized != installer {
        debug!("Normalized installer {} -> {} on {}", installer, normalized, platform);
    }
    normalized
}

/// An `(installer, package)` pair as written by users, mappings or the assistant.
///
/// The installer is kept as text because it may name something unsupported;
/// that is only detected when the dispatcher tries to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub installer: String,
    pub package: String,
}

impl InstallTarget {
    pub fn new(installer: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            installer: installer.into(),
            package: package.into(),
        }
    }
}

impl fmt::Display for InstallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} install {}", self.installer, self.package)
    }
}

/// Parses strings like `pip install requests`, `yarn add left-pad` or `apt python3`.
///
/// Option tokens (`-g`, `--user`) are skipped; the installer's own
/// argument template decides which flags are passed.
pub fn parse_install_command(command: &str) -> Result<InstallTarget, AegisError> {
    let parts: Vec<&str> = command
        .split_whitespace()
        .filter(|part| !part.starts_with('-'))
        .collect();
    let is_verb = |part: &str| matches!(part.to_lowercase().as_str(), "install" | "add");
    if parts.len() >= 3 && is_verb(parts[1]) {
        return Ok(InstallTarget::new(parts[0], parts[2]));
    }
    if parts.len() == 2 && !is_verb(parts[1]) {
        return Ok(InstallTarget::new(parts[0], parts[1]));
    }
    Err(AegisError::parse("install command", command))
}
