//! Runs installers as monitored subprocesses.
//!
//! [`InstallerDispatcher::install`] normalises the requested installer for
//! the host platform, builds the concrete invocation from the registry and
//! streams the child's output through a [`ProgressAnimator`] while capturing
//! it for the analyzer. The `manual` installer is a download-and-extract
//! procedure driven by `curl` and `tar`.

use crate::error::AegisError;
use crate::executor::ProcessRunner;
use crate::installers::{InstallTarget, Installer, Platform, normalize};
use crate::progress::ProgressAnimator;
use crate::ui::OutputSink;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Return code used when the installer binary is not on PATH.
pub const MISSING_BINARY: i32 = 127;
/// Return code used when nothing could be run, or the child was killed.
pub const SPAWN_FAILED: i32 = -1;

/// Outcome of one installer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    succeeded: bool,
    return_code: i32,
    output: Vec<String>,
}

impl InstallResult {
    pub fn new(return_code: i32, output: Vec<String>) -> Self {
        Self {
            succeeded: return_code == 0,
            return_code,
            output,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn return_code(&self) -> i32 {
        self.return_code
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// The last `n` captured lines.
    pub fn tail(&self, n: usize) -> &[String] {
        &self.output[self.output.len().saturating_sub(n)..]
    }
}

// =============================================================================
// Manual download sources
// =============================================================================

struct ManualSource {
    package: &'static str,
    aliases: &'static [&'static str],
    version: &'static str,
    /// `(platform, archive url)`
    archives: &'static [(Platform, &'static str)],
    /// Directory inside the extracted archive holding the executables, when
    /// it does not depend on the archive name.
    bin_dir: Option<&'static str>,
}

static MANUAL_SOURCES: &[ManualSource] = &[
    ManualSource {
        package: "go",
        aliases: &["golang", "golang-go"],
        version: "1.22.5",
        archives: &[
            (Platform::Linux, "https://go.dev/dl/go1.22.5.linux-amd64.tar.gz"),
            (Platform::MacOs, "https://go.dev/dl/go1.22.5.darwin-arm64.tar.gz"),
            (Platform::Windows, "https://go.dev/dl/go1.22.5.windows-amd64.zip"),
        ],
        bin_dir: Some("go/bin"),
    },
    ManualSource {
        package: "node",
        aliases: &["nodejs"],
        version: "v20.15.0",
        archives: &[
            (
                Platform::Linux,
                "https://nodejs.org/dist/v20.15.0/node-v20.15.0-linux-x64.tar.xz",
            ),
            (
                Platform::MacOs,
                "https://nodejs.org/dist/v20.15.0/node-v20.15.0-darwin-arm64.tar.gz",
            ),
            (
                Platform::Windows,
                "https://nodejs.org/dist/v20.15.0/node-v20.15.0-win-x64.zip",
            ),
        ],
        bin_dir: None,
    },
];

impl ManualSource {
    fn find(package: &str) -> Option<&'static ManualSource> {
        let package = package.to_lowercase();
        MANUAL_SOURCES
            .iter()
            .find(|s| s.package == package || s.aliases.contains(&package.as_str()))
    }

    fn archive_for(&self, platform: Platform) -> Option<&'static str> {
        self.archives
            .iter()
            .find(|(p, _)| *p == platform)
            .map(|(_, url)| *url)
    }

    /// Executable directory after extraction. Archives without a fixed
    /// layout unpack into a folder named after themselves, with `bin/`
    /// inside on unix.
    fn bin_dir_for(&self, url: &str) -> String {
        if let Some(dir) = self.bin_dir {
            return dir.to_string();
        }
        let stem = archive_name(url)
            .trim_end_matches(".tar.xz")
            .trim_end_matches(".tar.gz")
            .trim_end_matches(".zip");
        if url.ends_with(".zip") {
            stem.to_string()
        } else {
            format!("{}/bin", stem)
        }
    }
}

fn archive_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

// =============================================================================
// Dispatcher
// =============================================================================

pub struct InstallerDispatcher {
    runner: Arc<dyn ProcessRunner>,
    sink: Arc<dyn OutputSink>,
    platform: Platform,
    tools_dir: PathBuf,
}

impl InstallerDispatcher {
    pub fn new(runner: Arc<dyn ProcessRunner>, sink: Arc<dyn OutputSink>, platform: Platform) -> Self {
        let tools_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("aegis")
            .join("tools");
        Self {
            runner,
            sink,
            platform,
            tools_dir,
        }
    }

    /// Overrides where manual installs are extracted.
    pub fn with_tools_dir(mut self, tools_dir: impl Into<PathBuf>) -> Self {
        self.tools_dir = tools_dir.into();
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Parses an installer name and maps it to the host platform's equivalent.
    pub fn resolve_installer(&self, name: &str) -> Result<Installer, AegisError> {
        let requested: Installer = name.parse()?;
        let installer = normalize(requested, self.platform);
        if installer != requested {
            self.sink.emit(&format!(
                "↪️  Using {} instead of {} on {}",
                installer, requested, self.platform
            ));
        }
        Ok(installer)
    }

    /// Installs `package` with the named installer.
    ///
    /// Unsupported installer names fail before anything is spawned.
    pub fn install(&self, package: &str, installer: &str) -> Result<InstallResult, AegisError> {
        let installer = self.resolve_installer(installer)?;
        Ok(self.install_with(installer, package))
    }

    pub fn install_with(&self, installer: Installer, package: &str) -> InstallResult {
        info!("Installing {} with {} on {}", package, installer, self.platform);
        if installer == Installer::Manual {
            return self.install_manual(package);
        }
        let (program, args) = installer.spec().install_invocation(package);
        let label = format!("{} install {}", installer, package);
        self.run_installer(&label, &program, &args)
    }

    /// Asks the installer whether `target` is already installed.
    ///
    /// Unknown installers and installers without a query report `false`.
    pub fn is_installed(&self, target: &InstallTarget) -> bool {
        let Ok(requested) = target.installer.parse::<Installer>() else {
            return false;
        };
        let installer = normalize(requested, self.platform);
        let Some((program, args)) = installer.spec().query_invocation(&target.package) else {
            return false;
        };
        if !self.runner.program_exists(&program) {
            debug!("Query program {} not on PATH", program);
            return false;
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match self.runner.run(&program, &args) {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!("Installed-check for {} failed: {}", target, e);
                false
            }
        }
    }

    fn run_installer(&self, label: &str, program: &str, args: &[String]) -> InstallResult {
        if !self.runner.program_exists(program) {
            warn!("Installer binary {} not found on PATH", program);
            self.sink
                .emit(&format!("❌ {} is not available on this system", program));
            return InstallResult::new(
                MISSING_BINARY,
                vec![format!("{} is not available on PATH", program)],
            );
        }

        self.sink
            .emit(&format!("📦 Running: {} {}", program, args.join(" ")));

        let mut animator = ProgressAnimator::new(label, Arc::clone(&self.sink));
        animator.start();

        let mut output = Vec::new();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let outcome = self.runner.run_streaming(program, &args, &mut |line| {
            animator.observe(line);
            output.push(line.to_string());
        });

        let return_code = match outcome {
            Ok(Some(code)) => code,
            Ok(None) => SPAWN_FAILED,
            Err(e) => {
                warn!("Failed to run {}: {}", program, e);
                output.push(format!("failed to run {}: {}", program, e));
                SPAWN_FAILED
            }
        };
        let result = InstallResult::new(return_code, output);
        animator.stop(result.succeeded());
        info!("{} exited with {}", label, return_code);
        result
    }

    fn install_manual(&self, package: &str) -> InstallResult {
        let source = ManualSource::find(package);
        let Some((source, url)) =
            source.and_then(|s| s.archive_for(self.platform).map(|url| (s, url)))
        else {
            let message = format!(
                "Manual download source not found for '{}' on {}",
                package, self.platform
            );
            self.sink.emit(&format!("❌ {}", message));
            return InstallResult::new(SPAWN_FAILED, vec![message]);
        };

        let dest = self.tools_dir.join(source.package);
        if let Err(e) = fs::create_dir_all(&dest) {
            let message = format!("could not create {}: {}", dest.display(), e);
            self.sink.emit(&format!("❌ {}", message));
            return InstallResult::new(SPAWN_FAILED, vec![message]);
        }

        self.sink.emit(&format!(
            "🧭 Manual install of {} {} into {}",
            source.package,
            source.version,
            dest.display()
        ));

        let archive = dest.join(archive_name(url));
        let archive_arg = archive.to_string_lossy().into_owned();
        let mut output = Vec::new();

        let download = self.run_installer(
            &format!("download {}", source.package),
            "curl",
            &[
                "-L".to_string(),
                "-#".to_string(),
                "--fail".to_string(),
                "-o".to_string(),
                archive_arg.clone(),
                url.to_string(),
            ],
        );
        output.extend_from_slice(download.output());
        if !download.succeeded() {
            return InstallResult::new(download.return_code(), output);
        }

        let extract = self.run_installer(
            &format!("extract {}", source.package),
            "tar",
            &[
                "-xf".to_string(),
                archive_arg,
                "-C".to_string(),
                dest.to_string_lossy().into_owned(),
            ],
        );
        output.extend_from_slice(extract.output());
        if !extract.succeeded() {
            return InstallResult::new(extract.return_code(), output);
        }

        let bin_dir = dest.join(source.bin_dir_for(url));
        for line in path_instructions(&bin_dir, self.platform) {
            self.sink.emit(&line);
            output.push(line);
        }
        InstallResult::new(0, output)
    }
}

fn path_instructions(bin_dir: &Path, platform: Platform) -> Vec<String> {
    let dir = bin_dir.display();
    let command = match platform {
        Platform::Windows => format!("  setx PATH \"%PATH%;{}\"", dir),
        Platform::MacOs | Platform::Linux => format!("  export PATH=\"{}:$PATH\"", dir),
    };
    vec![format!("👉 Add {} to your PATH:", dir), command]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingRunner;
    use crate::ui::MemorySink;
    use tempfile::TempDir;

    fn dispatcher(
        runner: &Arc<RecordingRunner>,
        sink: &Arc<MemorySink>,
        platform: Platform,
    ) -> InstallerDispatcher {
        InstallerDispatcher::new(runner.clone(), sink.clone(), platform)
    }

    #[test]
    fn test_install_runs_template_and_captures_output() {
        let runner = Arc::new(
            RecordingRunner::new()
                .with_programs(&["pip"])
                .respond("pip install requests", 0, &["Collecting requests", "Successfully installed requests"]),
        );
        let sink = Arc::new(MemorySink::new());

        let result = dispatcher(&runner, &sink, Platform::Linux)
            .install("requests", "pip")
            .unwrap();

        assert!(result.succeeded());
        assert_eq!(result.return_code(), 0);
        assert_eq!(result.output().len(), 2);
        assert_eq!(runner.calls(), vec!["pip install requests"]);
        assert!(sink.text().contains("📦 Running: pip install requests"));
        assert!(sink.text().contains("✅ pip install requests completed"));
    }

    #[test]
    fn test_install_normalises_for_platform() {
        let runner = Arc::new(RecordingRunner::new().with_programs(&["winget"]));
        let sink = Arc::new(MemorySink::new());

        let result = dispatcher(&runner, &sink, Platform::Windows)
            .install("jq", "apt")
            .unwrap();

        assert!(result.succeeded());
        assert_eq!(
            runner.calls(),
            vec!["winget install --accept-package-agreements --accept-source-agreements jq"]
        );
        assert!(sink.text().contains("Using winget instead of apt on windows"));
    }

    #[test]
    fn test_unsupported_installer_spawns_nothing() {
        let runner = Arc::new(RecordingRunner::new().with_programs(&["yarn"]));
        let sink = Arc::new(MemorySink::new());

        let err = dispatcher(&runner, &sink, Platform::Linux)
            .install("left-pad", "yarn")
            .unwrap_err();

        assert!(matches!(err, AegisError::UnsupportedInstaller(name) if name == "yarn"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_missing_binary_fails_without_spawning() {
        let runner = Arc::new(RecordingRunner::new());
        let sink = Arc::new(MemorySink::new());

        let result = dispatcher(&runner, &sink, Platform::Linux)
            .install("typescript", "npm")
            .unwrap();

        assert!(!result.succeeded());
        assert_eq!(result.return_code(), MISSING_BINARY);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_failed_install_reports_code_and_tail() {
        let runner = Arc::new(
            RecordingRunner::new()
                .with_programs(&["apt-get"])
                .respond("apt-get install -y zork", 100, &["Reading package lists...", "E: Unable to locate package zork"]),
        );
        let sink = Arc::new(MemorySink::new());

        let result = dispatcher(&runner, &sink, Platform::Linux)
            .install("zork", "apt")
            .unwrap();

        assert!(!result.succeeded());
        assert_eq!(result.return_code(), 100);
        assert_eq!(result.tail(1), ["E: Unable to locate package zork"]);
        assert_eq!(result.tail(10).len(), 2);
        assert!(sink.text().contains("❌ apt install zork failed"));
    }

    #[test]
    fn test_is_installed_uses_query_template() {
        let runner = Arc::new(
            RecordingRunner::new()
                .with_programs(&["pip"])
                .respond("pip show foo-cli", 0, &["Name: foo-cli"]),
        );
        let sink = Arc::new(MemorySink::new());
        let dispatcher = dispatcher(&runner, &sink, Platform::Linux);

        assert!(dispatcher.is_installed(&InstallTarget::new("pip", "foo-cli")));
        assert!(!dispatcher.is_installed(&InstallTarget::new("pip", "bar-cli")));
        assert!(!dispatcher.is_installed(&InstallTarget::new("manual", "go")));
        assert!(!dispatcher.is_installed(&InstallTarget::new("yarn", "x")));
    }

    #[test]
    fn test_manual_install_downloads_and_extracts() {
        let tools = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new().with_programs(&["curl", "tar"]));
        let sink = Arc::new(MemorySink::new());

        let result = dispatcher(&runner, &sink, Platform::Linux)
            .with_tools_dir(tools.path())
            .install("golang", "manual")
            .unwrap();

        assert!(result.succeeded());
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("curl -L -# --fail -o "));
        assert!(calls[0].ends_with("https://go.dev/dl/go1.22.5.linux-amd64.tar.gz"));
        assert!(calls[1].starts_with("tar -xf "));
        assert!(tools.path().join("go").is_dir());
        assert!(sink.text().contains("export PATH="));
        assert!(sink.text().contains("go/bin"));
    }

    #[test]
    fn test_manual_install_stops_after_failed_download() {
        let tools = TempDir::new().unwrap();
        let runner = Arc::new(
            RecordingRunner::new()
                .with_programs(&["curl", "tar"])
                .respond("curl", 22, &["curl: (22) The requested URL returned error: 404"]),
        );
        let sink = Arc::new(MemorySink::new());

        let result = dispatcher(&runner, &sink, Platform::Linux)
            .with_tools_dir(tools.path())
            .install("node", "manual")
            .unwrap();

        assert_eq!(result.return_code(), 22);
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_manual_install_unknown_package() {
        let runner = Arc::new(RecordingRunner::new().with_programs(&["curl", "tar"]));
        let sink = Arc::new(MemorySink::new());

        let result = dispatcher(&runner, &sink, Platform::Linux)
            .install("zork", "manual")
            .unwrap();

        assert!(!result.succeeded());
        assert!(runner.calls().is_empty());
        assert!(result.output()[0].contains("not found for 'zork'"));
    }

    #[test]
    fn test_node_bin_dir_follows_archive_name() {
        let node = ManualSource::find("nodejs").unwrap();
        let linux = node.archive_for(Platform::Linux).unwrap();
        let windows = node.archive_for(Platform::Windows).unwrap();

        assert_eq!(node.bin_dir_for(linux), "node-v20.15.0-linux-x64/bin");
        assert_eq!(node.bin_dir_for(windows), "node-v20.15.0-win-x64");
    }
}
