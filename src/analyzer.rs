//! Failure classification and fallback planning for installer runs.
//!
//! Everything here is a pure function of an [`InstallResult`] and static
//! tables: the captured output is scanned for known phrases, then the return
//! code is matched against installer-specific codes, and finally a
//! [`FallbackChain`] of alternative `(installer, package)` pairs is derived.

use crate::dispatcher::{InstallResult, MISSING_BINARY};
use crate::installers::{InstallTarget, Installer, Platform};
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    PermissionDenied,
    PackageNotFound,
    NetworkError,
    InsufficientDiskSpace,
    /// A return code with a documented meaning for this installer.
    InstallerSpecific { code: i32, meaning: &'static str },
    Unknown,
}

impl FailureKind {
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            FailureKind::PermissionDenied => {
                Some("retry with elevated privileges (sudo, or an administrator shell)")
            }
            FailureKind::PackageNotFound => Some("check the package name for this installer"),
            FailureKind::NetworkError => Some("check your connection or proxy settings"),
            FailureKind::InsufficientDiskSpace => Some("free up disk space and try again"),
            FailureKind::InstallerSpecific { .. } | FailureKind::Unknown => None,
        }
    }

    /// Whether trying another installer could help.
    pub fn suggests_alternatives(&self) -> bool {
        !matches!(self, FailureKind::InsufficientDiskSpace)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::PermissionDenied => f.write_str("permission denied"),
            FailureKind::PackageNotFound => f.write_str("package not found"),
            FailureKind::NetworkError => f.write_str("network error"),
            FailureKind::InsufficientDiskSpace => f.write_str("insufficient disk space"),
            FailureKind::InstallerSpecific { code, meaning } => {
                write!(f, "{} (exit code {})", meaning, code)
            }
            FailureKind::Unknown => f.write_str("unknown error"),
        }
    }
}

// Scanned in this order; the first kind with a matching phrase wins.
static TEXT_PATTERNS: &[(&[&str], FailureKind)] = &[
    (
        &[
            "permission denied",
            "access is denied",
            "access denied",
            "are you root",
            "eacces",
            "operation not permitted",
            "run as administrator",
        ],
        FailureKind::PermissionDenied,
    ),
    (
        &[
            "unable to locate package",
            "no matching distribution",
            "could not find a version",
            "no package found",
            "no available formula",
            "no formulae found",
            "404 not found",
            "e404",
            "package not found",
        ],
        FailureKind::PackageNotFound,
    ),
    (
        &[
            "could not resolve host",
            "temporary failure in name resolution",
            "connection refused",
            "connection timed out",
            "network is unreachable",
            "failed to establish a new connection",
            "etimedout",
            "econnreset",
            "enotfound",
        ],
        FailureKind::NetworkError,
    ),
    (
        &[
            "no space left on device",
            "not enough space",
            "insufficient disk space",
            "disk full",
        ],
        FailureKind::InsufficientDiskSpace,
    ),
];

const WINGET_ALREADY_INSTALLED: i32 = 0x8A15002Bu32 as i32;
const WINGET_NO_PACKAGE: i32 = 0x8A150014u32 as i32;

/// `(installer or any, return code, meaning)`
static CODE_MEANINGS: &[(Option<Installer>, i32, &str)] = &[
    (Some(Installer::Winget), WINGET_ALREADY_INSTALLED, "already installed"),
    (Some(Installer::Winget), WINGET_NO_PACKAGE, "no package matched the query"),
    (Some(Installer::Winget), 5, "access denied"),
    (Some(Installer::Choco), 5, "access denied"),
    (Some(Installer::Choco), 1641, "reboot initiated"),
    (Some(Installer::Choco), 3010, "reboot required"),
    (Some(Installer::Choco), 1618, "another install in progress"),
    (Some(Installer::Choco), 1603, "fatal error during installation"),
    (Some(Installer::Apt), 100, "apt could not complete the operation"),
    (None, MISSING_BINARY, "installer binary not found"),
];

/// Classifies a failed run: output phrases first, then known return codes.
pub fn classify(result: &InstallResult, installer: Installer) -> FailureKind {
    let output = result.output().join("\n").to_lowercase();
    for (phrases, kind) in TEXT_PATTERNS {
        if phrases.iter().any(|p| output.contains(p)) {
            return kind.clone();
        }
    }
    let code = result.return_code();
    CODE_MEANINGS
        .iter()
        .find(|(i, c, _)| *c == code && i.is_none_or(|i| i == installer))
        .map(|(_, code, meaning)| FailureKind::InstallerSpecific {
            code: *code,
            meaning: *meaning,
        })
        .unwrap_or(FailureKind::Unknown)
}

// =============================================================================
// Fallback rules
// =============================================================================

struct FallbackRule {
    installer: Installer,
    /// `None` matches any package.
    package: Option<&'static str>,
    /// `None` matches any platform.
    platform: Option<Platform>,
    /// Alternatives in preference order; `None` keeps the original package name.
    alternatives: &'static [(Installer, Option<&'static str>)],
}

impl FallbackRule {
    fn matches(&self, installer: Installer, package: &str, platform: Platform) -> bool {
        self.installer == installer
            && self.package.is_none_or(|p| p.eq_ignore_ascii_case(package))
            && self.platform.is_none_or(|p| p == platform)
    }
}

// Package-specific rules come first, then installer-wide ones.
static FALLBACK_RULES: &[FallbackRule] = &[
    FallbackRule {
        installer: Installer::Apt,
        package: Some("python3"),
        platform: None,
        alternatives: &[
            (Installer::Brew, Some("python")),
            (Installer::Winget, Some("Python.Python.3.12")),
            (Installer::Choco, Some("python")),
        ],
    },
    FallbackRule {
        installer: Installer::Brew,
        package: Some("python"),
        platform: None,
        alternatives: &[
            (Installer::Apt, Some("python3")),
            (Installer::Winget, Some("Python.Python.3.12")),
        ],
    },
    FallbackRule {
        installer: Installer::Apt,
        package: Some("nodejs"),
        platform: None,
        alternatives: &[
            (Installer::Brew, Some("node")),
            (Installer::Manual, Some("node")),
        ],
    },
    FallbackRule {
        installer: Installer::Brew,
        package: Some("node"),
        platform: None,
        alternatives: &[
            (Installer::Apt, Some("nodejs")),
            (Installer::Manual, Some("node")),
        ],
    },
    FallbackRule {
        installer: Installer::Winget,
        package: Some("OpenJS.NodeJS.LTS"),
        platform: Some(Platform::Windows),
        alternatives: &[
            (Installer::Choco, Some("nodejs-lts")),
            (Installer::Manual, Some("node")),
        ],
    },
    FallbackRule {
        installer: Installer::Apt,
        package: Some("golang-go"),
        platform: None,
        alternatives: &[(Installer::Brew, Some("go")), (Installer::Manual, Some("go"))],
    },
    FallbackRule {
        installer: Installer::Brew,
        package: Some("go"),
        platform: None,
        alternatives: &[
            (Installer::Apt, Some("golang-go")),
            (Installer::Manual, Some("go")),
        ],
    },
    FallbackRule {
        installer: Installer::Winget,
        package: None,
        platform: Some(Platform::Windows),
        alternatives: &[(Installer::Choco, None)],
    },
    FallbackRule {
        installer: Installer::Choco,
        package: None,
        platform: Some(Platform::Windows),
        alternatives: &[(Installer::Winget, None)],
    },
    FallbackRule {
        installer: Installer::Apt,
        package: None,
        platform: Some(Platform::Linux),
        alternatives: &[(Installer::Brew, None)],
    },
    FallbackRule {
        installer: Installer::Brew,
        package: None,
        platform: Some(Platform::Linux),
        alternatives: &[(Installer::Apt, None)],
    },
];

/// Ordered alternatives to try after a failure, consumed front to back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackChain {
    candidates: VecDeque<InstallTarget>,
}

impl FallbackChain {
    /// Builds the chain for a failed `(installer, package)` on `platform`.
    ///
    /// Alternatives not applicable on the platform, the failed pair itself
    /// and duplicates are dropped.
    pub fn build(installer: Installer, package: &str, platform: Platform) -> Self {
        let specific = FALLBACK_RULES.iter().filter(|r| r.package.is_some());
        let wide = FALLBACK_RULES.iter().filter(|r| r.package.is_none());

        let mut candidates: VecDeque<InstallTarget> = VecDeque::new();
        for rule in specific.chain(wide) {
            if !rule.matches(installer, package, platform) {
                continue;
            }
            for (alt, alt_package) in rule.alternatives {
                if !alt.spec().supports(platform) {
                    continue;
                }
                let alt_package = alt_package.unwrap_or(package);
                if *alt == installer && alt_package.eq_ignore_ascii_case(package) {
                    continue;
                }
                let target = InstallTarget::new(alt.as_str(), alt_package);
                if !candidates.contains(&target) {
                    candidates.push_back(target);
                }
            }
        }
        debug!(
            "Fallback chain for {} {} on {}: {:?}",
            installer, package, platform, candidates
        );
        Self { candidates }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl Iterator for FallbackChain {
    type Item = InstallTarget;

    fn next(&mut self) -> Option<Self::Item> {
        self.candidates.pop_front()
    }
}

/// Classification plus the alternatives worth offering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub kind: FailureKind,
    pub fallback: FallbackChain,
}

impl Analysis {
    /// One-line summary naming the package and the cause.
    pub fn summary(&self, package: &str) -> String {
        match self.kind.hint() {
            Some(hint) => format!("Installing {} failed: {} ({})", package, self.kind, hint),
            None => format!("Installing {} failed: {}", package, self.kind),
        }
    }
}

pub fn analyze(
    result: &InstallResult,
    package: &str,
    installer: Installer,
    platform: Platform,
) -> Analysis {
    let kind = classify(result, installer);
    let fallback = if kind.suggests_alternatives() {
        FallbackChain::build(installer, package, platform)
    } else {
        FallbackChain::default()
    };
    debug!("Analyzed failure of {} via {}: {}", package, installer, kind);
    Analysis { kind, fallback }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(code: i32, lines: &[&str]) -> InstallResult {
        InstallResult::new(code, lines.iter().map(|l| l.to_string()).collect())
    }

    #[test]
    fn test_classifies_permission_denied() {
        let result = failed(100, &["E: Could not open lock file - open (13: Permission denied)"]);
        assert_eq!(classify(&result, Installer::Apt), FailureKind::PermissionDenied);
    }

    #[test]
    fn test_classifies_package_not_found() {
        let result = failed(1, &["ERROR: No matching distribution found for zork-cli"]);
        assert_eq!(classify(&result, Installer::Pip), FailureKind::PackageNotFound);
    }

    #[test]
    fn test_classifies_network_error() {
        let result = failed(1, &["curl: (6) Could not resolve host: go.dev"]);
        assert_eq!(classify(&result, Installer::Manual), FailureKind::NetworkError);
    }

    #[test]
    fn test_classifies_disk_space_without_alternatives() {
        let result = failed(100, &["E: You don't have enough free space... No space left on device"]);
        let analysis = analyze(&result, "jq", Installer::Apt, Platform::Linux);

        assert_eq!(analysis.kind, FailureKind::InsufficientDiskSpace);
        assert!(analysis.fallback.is_empty());
    }

    #[test]
    fn test_text_match_wins_over_code() {
        let result = failed(5, &["Access is denied."]);
        assert_eq!(classify(&result, Installer::Choco), FailureKind::PermissionDenied);
    }

    #[test]
    fn test_installer_specific_codes() {
        let kind = classify(&failed(3010, &[]), Installer::Choco);
        assert_eq!(
            kind,
            FailureKind::InstallerSpecific {
                code: 3010,
                meaning: "reboot required"
            }
        );
        assert_eq!(kind.to_string(), "reboot required (exit code 3010)");

        let kind = classify(&failed(WINGET_ALREADY_INSTALLED, &[]), Installer::Winget);
        assert!(matches!(kind, FailureKind::InstallerSpecific { meaning: "already installed", .. }));

        // Code 1618 means nothing special to pip.
        assert_eq!(classify(&failed(1618, &[]), Installer::Pip), FailureKind::Unknown);
    }

    #[test]
    fn test_missing_binary_code_applies_to_any_installer() {
        let result = failed(MISSING_BINARY, &["brew is not available on PATH"]);
        assert!(matches!(
            classify(&result, Installer::Brew),
            FailureKind::InstallerSpecific { code: 127, .. }
        ));
    }

    #[test]
    fn test_package_rules_come_before_installer_rules() {
        let chain = FallbackChain::build(Installer::Apt, "python3", Platform::Linux);
        let targets: Vec<String> = chain.map(|t| t.to_string()).collect();

        // winget and choco do not apply on linux.
        assert_eq!(targets, vec!["brew install python", "brew install python3"]);
    }

    #[test]
    fn test_installer_wide_rule_keeps_package() {
        let chain = FallbackChain::build(Installer::Winget, "jq", Platform::Windows);
        let targets: Vec<InstallTarget> = chain.collect();
        assert_eq!(targets, vec![InstallTarget::new("choco", "jq")]);
    }

    #[test]
    fn test_chain_drops_failed_pair_and_duplicates() {
        let chain = FallbackChain::build(Installer::Brew, "node", Platform::Linux);
        let targets: Vec<String> = chain.map(|t| t.to_string()).collect();

        assert_eq!(
            targets,
            vec!["apt install nodejs", "manual install node", "apt install node"]
        );
        assert!(!targets.contains(&"brew install node".to_string()));
    }

    #[test]
    fn test_no_rule_means_empty_chain() {
        let chain = FallbackChain::build(Installer::Pip, "requests", Platform::Linux);
        assert!(chain.is_empty());
        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn test_platform_scoped_rules() {
        assert!(FallbackChain::build(Installer::Apt, "jq", Platform::MacOs).is_empty());
        assert_eq!(FallbackChain::build(Installer::Apt, "jq", Platform::Linux).len(), 1);
    }

    #[test]
    fn test_summary_includes_hint() {
        let analysis = analyze(
            &failed(1, &["Permission denied"]),
            "jq",
            Installer::Apt,
            Platform::Linux,
        );
        assert_eq!(
            analysis.summary("jq"),
            "Installing jq failed: permission denied (retry with elevated privileges (sudo, or an administrator shell))"
        );
    }
}
