//! The command resolver: decides how a typed command gets satisfied.
//!
//! For each input the resolver tries, in order:
//!
//! 1. **Presence**: the first token is an executable on PATH.
//! 2. **Mappings**: the command has a known install strategy. Single
//!    strategies are confirmed and installed; multi-option strategies ask the
//!    user to pick one.
//! 3. **Direct execution**: the raw input runs successfully through the shell
//!    (builtins, aliases, scripts).
//! 4. **Assistant**: an external assistant explains the command and may
//!    suggest an install command, which is confirmed, installed and learned.
//!
//! Failed installs are classified by the [`analyzer`](crate::analyzer) and
//! its fallback chain is offered one candidate at a time.

use crate::analyzer::analyze;
use crate::assistant::{self, AssistantClient};
use crate::config::Config;
use crate::dispatcher::{InstallResult, InstallerDispatcher};
use crate::executor::{Executor, ProcessRunner, SystemProcessRunner};
use crate::installers::{InstallTarget, Platform, parse_install_command};
use crate::mapping_store::{MappingRecord, MappingStore, Strategy};
use crate::ui::{OutputSink, Prompt, choose, confirm};
use anyhow::Result;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lines of installer output echoed when an install fails.
const FAILURE_TAIL: usize = 3;

/// How one resolution attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Blank input.
    Noop,
    /// Already available. `exit_code` is set when the full command was run.
    AlreadyPresent { exit_code: Option<i32> },
    /// Not a known tool, but the input ran successfully as a shell command.
    Executed { exit_code: i32 },
    /// `target` was installed. `exit_code` is set when the command was re-run.
    Installed {
        target: InstallTarget,
        exit_code: Option<i32>,
    },
    Declined,
    InvalidSelection,
    Unresolved,
}

/// Result of installing one target and walking its fallback chain.
enum InstallAttempt {
    /// The target, or the alternative that replaced it, is installed.
    Installed(InstallTarget),
    Declined,
    Unsupported,
    Exhausted,
}

pub struct CommandResolver {
    store: MappingStore,
    config: Config,
    executor: Executor,
    dispatcher: InstallerDispatcher,
    assistant: Box<dyn AssistantClient>,
    sink: Arc<dyn OutputSink>,
}

impl CommandResolver {
    pub fn new(
        store: MappingStore,
        config: Config,
        runner: Arc<dyn ProcessRunner>,
        assistant: Box<dyn AssistantClient>,
        sink: Arc<dyn OutputSink>,
        platform: Platform,
    ) -> Self {
        let executor = Executor::new(Arc::clone(&runner), platform, config.verbose);
        let dispatcher = InstallerDispatcher::new(runner, Arc::clone(&sink), platform);
        Self {
            store,
            config,
            executor,
            dispatcher,
            assistant,
            sink,
        }
    }

    /// Resolver for the real system: located mapping file, configured
    /// assistant, real processes on the current platform.
    pub fn from_config(config: Config, sink: Arc<dyn OutputSink>) -> Result<Self> {
        let store = MappingStore::load(MappingStore::locate(&config)?);
        let assistant = assistant::from_config(&config);
        Ok(Self::new(
            store,
            config,
            Arc::new(SystemProcessRunner),
            assistant,
            sink,
            Platform::current(),
        ))
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    pub async fn resolve(&mut self, input: &str, prompt: &mut dyn Prompt) -> ResolutionOutcome {
        let input = input.trim();
        let Some(base) = input.split_whitespace().next() else {
            return ResolutionOutcome::Noop;
        };
        let base = base.to_string();
        info!("Resolving '{}'", input);

        if self.executor.is_present(&base) {
            info!("Command '{}' found in system PATH", base);
            self.sink
                .emit(&format!("✅ '{}' is already installed", base));
            let exit_code = has_arguments(input).then(|| self.run_full(input)).flatten();
            return ResolutionOutcome::AlreadyPresent { exit_code };
        }

        if let Some(record) = self.store.get(&base).cloned() {
            match record.strategy() {
                Ok(Strategy::MultiOption(options)) => {
                    return self.disambiguate(&base, input, &record, options, prompt);
                }
                Ok(Strategy::Single(target)) => {
                    if let Some(outcome) = self.resolve_single(&base, input, &target, prompt) {
                        return outcome;
                    }
                    self.sink.emit(&format!(
                        "❓ Every known install for '{}' failed.",
                        base
                    ));
                    return self.consult_assistant(input, prompt).await;
                }
                Err(e) => {
                    warn!("Unusable mapping for '{}': {}", base, e);
                    self.sink
                        .emit(&format!("⚠️  Mapping for '{}' is unusable: {}", base, e));
                }
            }
        }

        if let Some(exit_code) = self.executor.try_system_command(input, self.sink.as_ref()) {
            debug!("'{}' ran directly", input);
            return ResolutionOutcome::Executed { exit_code };
        }

        self.sink.emit(&format!(
            "❓ '{}' is not installed and has no known install.",
            base
        ));
        self.consult_assistant(input, prompt).await
    }

    /// Returns `None` when every install option failed.
    fn resolve_single(
        &mut self,
        base: &str,
        input: &str,
        target: &InstallTarget,
        prompt: &mut dyn Prompt,
    ) -> Option<ResolutionOutcome> {
        if self.dispatcher.is_installed(target) {
            self.sink.emit(&format!(
                "✅ '{}' is already installed via {} ({})",
                base, target.installer, target.package
            ));
            let exit_code = has_arguments(input).then(|| self.run_full(input)).flatten();
            return Some(ResolutionOutcome::AlreadyPresent { exit_code });
        }

        self.sink.emit(&format!(
            "📦 '{}' is not installed. Known install: {}",
            base, target
        ));
        if !confirm(prompt, &format!("Install it with '{}'? [y/N]: ", target)) {
            self.sink.emit(&format!("🚫 Skipped installing '{}'", base));
            return Some(ResolutionOutcome::Declined);
        }

        match self.install_with_fallback(target, prompt) {
            InstallAttempt::Installed(installed) => {
                self.sink.emit(&format!("✅ Installed {}", installed));
                let exit_code = self.rerun(input);
                Some(ResolutionOutcome::Installed {
                    target: installed,
                    exit_code,
                })
            }
            InstallAttempt::Declined => Some(ResolutionOutcome::Declined),
            InstallAttempt::Unsupported => Some(ResolutionOutcome::Unresolved),
            InstallAttempt::Exhausted => None,
        }
    }

    fn disambiguate(
        &mut self,
        base: &str,
        input: &str,
        record: &MappingRecord,
        options: IndexMap<String, String>,
        prompt: &mut dyn Prompt,
    ) -> ResolutionOutcome {
        self.sink
            .emit(&format!("🔀 '{}' can be installed in several ways:", base));
        for (i, (label, command)) in options.iter().enumerate() {
            let marker = if record.preferred.as_deref() == Some(label.as_str()) {
                " (last used)"
            } else {
                ""
            };
            self.sink
                .emit(&format!("  {}. {}: {}{}", i + 1, label, command, marker));
        }

        let question = format!("Choose an option [1-{}]: ", options.len());
        let Some((label, command)) =
            choose(prompt, &question, options.len()).and_then(|i| options.get_index(i))
        else {
            self.sink.emit("❌ Invalid selection");
            return ResolutionOutcome::InvalidSelection;
        };

        let target = match parse_install_command(command) {
            Ok(target) => target,
            Err(e) => {
                self.sink.emit(&format!("❌ Option '{}' is unusable: {}", label, e));
                return ResolutionOutcome::Unresolved;
            }
        };
        info!("Selected option '{}' for '{}': {}", label, base, target);

        match self.install_with_fallback(&target, prompt) {
            InstallAttempt::Installed(installed) => {
                if let Some(record) = self.store.get_mut(base) {
                    record.preferred = Some(label.clone());
                }
                self.persist();
                self.sink.emit(&format!("✅ Installed {}", installed));
                let exit_code = self.rerun(input);
                ResolutionOutcome::Installed {
                    target: installed,
                    exit_code,
                }
            }
            InstallAttempt::Declined => ResolutionOutcome::Declined,
            InstallAttempt::Unsupported | InstallAttempt::Exhausted => ResolutionOutcome::Unresolved,
        }
    }

    async fn consult_assistant(&mut self, input: &str, prompt: &mut dyn Prompt) -> ResolutionOutcome {
        let base = input.split_whitespace().next().unwrap_or(input);
        if self.config.confirm_assistant
            && !confirm(prompt, "Ask the assistant about it? [y/N]: ")
        {
            return ResolutionOutcome::Declined;
        }

        self.sink.emit(&format!("💭 Thinking about '{}'...", input));
        let reply = match self.assistant.explain(input).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Assistant failed for '{}': {}", input, e);
                self.sink.emit(&format!("❌ {}", e));
                return ResolutionOutcome::Unresolved;
            }
        };
        self.sink.emit(&format!("🤖 {}", reply.explanation));

        let Some(command) = reply.install_command else {
            self.sink
                .emit("ℹ️  The assistant did not suggest an install command");
            return ResolutionOutcome::Unresolved;
        };
        let target = match parse_install_command(&command) {
            Ok(target) => target,
            Err(e) => {
                self.sink.emit(&format!("❌ {}", e));
                return ResolutionOutcome::Unresolved;
            }
        };

        if !confirm(prompt, &format!("Run '{}'? [y/N]: ", target)) {
            self.sink.emit(&format!("🚫 Skipped installing '{}'", base));
            return ResolutionOutcome::Declined;
        }

        match self.install_with_fallback(&target, prompt) {
            InstallAttempt::Installed(installed) => {
                self.store.insert(base, MappingRecord::single(&installed));
                self.persist();
                self.sink.emit(&format!("✅ Installed {}", installed));
                self.sink.emit(&format!(
                    "📌 Learned '{}' → {}",
                    base, installed
                ));
                let exit_code = self.rerun(input);
                ResolutionOutcome::Installed {
                    target: installed,
                    exit_code,
                }
            }
            InstallAttempt::Declined => ResolutionOutcome::Declined,
            InstallAttempt::Unsupported | InstallAttempt::Exhausted => ResolutionOutcome::Unresolved,
        }
    }

    /// Installs `target`; on failure offers each fallback candidate in turn.
    ///
    /// The chain comes from the first failure only. Declining a candidate
    /// ends the attempt.
    fn install_with_fallback(
        &self,
        target: &InstallTarget,
        prompt: &mut dyn Prompt,
    ) -> InstallAttempt {
        let installer = match self.dispatcher.resolve_installer(&target.installer) {
            Ok(installer) => installer,
            Err(e) => {
                warn!("Cannot install {}: {}", target, e);
                self.sink.emit(&format!("❌ {}", e));
                return InstallAttempt::Unsupported;
            }
        };

        let result = self.dispatcher.install_with(installer, &target.package);
        if result.succeeded() {
            return InstallAttempt::Installed(target.clone());
        }

        let analysis = analyze(
            &result,
            &target.package,
            installer,
            self.dispatcher.platform(),
        );
        self.report_failure(&analysis.summary(&target.package), &result);
        if analysis.fallback.is_empty() {
            self.sink.emit("❌ No alternatives available");
            return InstallAttempt::Exhausted;
        }

        for candidate in analysis.fallback {
            if !confirm(prompt, &format!("Try '{}' instead? [y/N]: ", candidate)) {
                self.sink.emit("🚫 Stopped trying alternatives");
                return InstallAttempt::Declined;
            }
            let installer = match self.dispatcher.resolve_installer(&candidate.installer) {
                Ok(installer) => installer,
                Err(e) => {
                    self.sink.emit(&format!("❌ {}", e));
                    continue;
                }
            };
            let result = self.dispatcher.install_with(installer, &candidate.package);
            if result.succeeded() {
                return InstallAttempt::Installed(candidate);
            }
            let analysis = analyze(
                &result,
                &candidate.package,
                installer,
                self.dispatcher.platform(),
            );
            self.report_failure(&analysis.summary(&candidate.package), &result);
        }

        self.sink
            .emit(&format!("❌ No more alternatives for {}", target.package));
        InstallAttempt::Exhausted
    }

    fn report_failure(&self, summary: &str, result: &InstallResult) {
        self.sink.emit(&format!("❌ {}", summary));
        for line in result.tail(FAILURE_TAIL) {
            self.sink.emit(&format!("   │ {}", line));
        }
    }

    /// Saves the store; a failed save is reported but not fatal.
    fn persist(&self) {
        if let Err(e) = self.store.save() {
            warn!("Failed to save mappings: {}", e);
            self.sink.emit(&format!(
                "⚠️  Installed, but could not save mappings to {}: {}",
                self.store.path().display(),
                e
            ));
        }
    }

    /// Re-runs the full input after an install, when it had arguments.
    fn rerun(&self, input: &str) -> Option<i32> {
        if has_arguments(input) && self.config.rerun_after_install {
            self.run_full(input)
        } else {
            None
        }
    }

    fn run_full(&self, input: &str) -> Option<i32> {
        match self.executor.execute_system_command(input, self.sink.as_ref()) {
            Ok(code) => {
                if code != 0 {
                    self.sink
                        .emit(&format!("⚠️  '{}' exited with code {}", input, code));
                }
                Some(code)
            }
            Err(e) => {
                self.sink.emit(&format!("❌ Failed to run '{}': {}", input, e));
                None
            }
        }
    }
}

fn has_arguments(input: &str) -> bool {
    input.split_whitespace().nth(1).is_some()
}
