//! Process execution: PATH lookups, system commands and streamed installer runs.
//!
//! Everything that touches `std::process` goes through the [`ProcessRunner`]
//! trait so the resolver and dispatcher can be exercised without spawning
//! real processes.

use crate::installers::Platform;
use crate::ui::OutputSink;
use anyhow::{Result, anyhow};
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use tracing::{debug, info};

// =============================================================================
// Traits for Dependency Injection
// =============================================================================

/// Trait for running system processes.
///
/// This abstraction enables testing without spawning real processes.
pub trait ProcessRunner: Send + Sync {
    /// Executes a command to completion and returns its captured output.
    fn run(&self, program: &str, args: &[&str]) -> Result<Output>;

    /// Executes a command, handing each line of combined stdout/stderr to
    /// `on_line` as it arrives. Returns the exit code, or `None` when the
    /// process was terminated by a signal.
    fn run_streaming(
        &self,
        program: &str,
        args: &[&str],
        on_line: &mut dyn FnMut(&str),
    ) -> Result<Option<i32>>;

    /// Like [`ProcessRunner::run_streaming`], but the child shares the
    /// terminal's stdin so it can ask its own questions.
    fn run_interactive(
        &self,
        program: &str,
        args: &[&str],
        on_line: &mut dyn FnMut(&str),
    ) -> Result<Option<i32>> {
        self.run_streaming(program, args, on_line)
    }

    /// Checks if a program exists in PATH.
    fn program_exists(&self, program: &str) -> bool;
}

// =============================================================================
// Default Implementation
// =============================================================================

/// Default process runner using std::process::Command.
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        Ok(cmd.output()?)
    }

    fn run_streaming(
        &self,
        program: &str,
        args: &[&str],
        on_line: &mut dyn FnMut(&str),
    ) -> Result<Option<i32>> {
        stream_child(program, args, Stdio::null(), on_line)
    }

    fn run_interactive(
        &self,
        program: &str,
        args: &[&str],
        on_line: &mut dyn FnMut(&str),
    ) -> Result<Option<i32>> {
        stream_child(program, args, Stdio::inherit(), on_line)
    }

    fn program_exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Spawns `program`, handing each line of combined stdout/stderr to `on_line`.
fn stream_child(
    program: &str,
    args: &[&str],
    stdin: Stdio,
    on_line: &mut dyn FnMut(&str),
) -> Result<Option<i32>> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain both pipes on helper threads so neither can fill up and stall
    // the child; lines are funnelled back to this thread in arrival order.
    let (tx, rx) = mpsc::channel::<String>();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        readers.push(thread::spawn(move || forward_lines(stdout, &tx)));
    }
    if let Some(stderr) = child.stderr.take() {
        let tx = tx.clone();
        readers.push(thread::spawn(move || forward_lines(stderr, &tx)));
    }
    drop(tx);

    for line in rx {
        on_line(&line);
    }
    for reader in readers {
        if let Ok(Err(e)) = reader.join() {
            debug!("Error reading output of {}: {}", program, e);
        }
    }

    let status = child.wait()?;
    Ok(status.code())
}

/// Splits a byte stream into lines on `\n` *or* `\r`, so in-place progress
/// updates show up as separate lines.
fn forward_lines<R: Read>(pipe: R, tx: &mpsc::Sender<String>) -> std::io::Result<()> {
    let mut reader = BufReader::new(pipe);
    let mut current = Vec::new();
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            break;
        }
        let consumed = available.len();
        for &byte in available {
            if byte == b'\n' || byte == b'\r' {
                send_line(&mut current, tx);
            } else {
                current.push(byte);
            }
        }
        reader.consume(consumed);
    }
    send_line(&mut current, tx);
    Ok(())
}

fn send_line(current: &mut Vec<u8>, tx: &mpsc::Sender<String>) {
    if current.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(current).into_owned();
    current.clear();
    let _ = tx.send(line);
}

// =============================================================================
// Executor Implementation
// =============================================================================

/// Runs raw user input as a system command through the platform shell.
///
/// The engine does not interpret shell grammar itself; the input is handed to
/// `sh -c` (or `cmd /C` on Windows) verbatim and its output is written to the
/// output sink line by line.
pub struct Executor {
    runner: Arc<dyn ProcessRunner>,
    platform: Platform,
    verbose: bool,
}

impl Executor {
    /// Creates a new executor.
    ///
    /// # Arguments
    ///
    /// * `runner` - Process runner used for every spawn
    /// * `platform` - Host platform, which decides the shell
    /// * `verbose` - If true, announces each command before running it
    pub fn new(runner: Arc<dyn ProcessRunner>, platform: Platform, verbose: bool) -> Self {
        Self {
            runner,
            platform,
            verbose,
        }
    }

    /// Whether an executable named `program` can be found on PATH.
    pub fn is_present(&self, program: &str) -> bool {
        self.runner.program_exists(program)
    }

    /// Executes `command_line`, streaming its output to `sink` as it arrives.
    ///
    /// The command reads from the shell's own stdin. Returns the exit code
    /// (nonzero exits are not errors here, a signal death is `-1`). Fails
    /// only when the shell itself cannot be started.
    pub fn execute_system_command(&self, command_line: &str, sink: &dyn OutputSink) -> Result<i32> {
        if self.verbose {
            sink.emit(&format!("⚙️  Executing system command: {}", command_line));
        }
        let (shell, flag) = self.shell_invocation(command_line)?;
        let code = self
            .runner
            .run_interactive(shell, &[flag, command_line], &mut |line: &str| sink.emit(line))?;
        Ok(code.unwrap_or(-1))
    }

    /// Executes `command_line`, keeping its output only if it succeeded.
    ///
    /// Used to check whether input that is neither on PATH nor mapped is
    /// still runnable (shell builtins, aliases, relative scripts). A failed
    /// spawn or nonzero exit returns `None` and prints nothing.
    pub fn try_system_command(&self, command_line: &str, sink: &dyn OutputSink) -> Option<i32> {
        match self.run_shell(command_line) {
            Ok(output) if output.status.success() => {
                Self::handle_output(&output, sink);
                Some(0)
            }
            Ok(output) => {
                debug!(
                    "Direct execution of '{}' exited with {:?}",
                    command_line,
                    output.status.code()
                );
                None
            }
            Err(e) => {
                debug!("Direct execution of '{}' failed: {}", command_line, e);
                None
            }
        }
    }

    fn run_shell(&self, command_line: &str) -> Result<Output> {
        let (shell, flag) = self.shell_invocation(command_line)?;
        self.runner.run(shell, &[flag, command_line])
    }

    fn shell_invocation(&self, command_line: &str) -> Result<(&'static str, &'static str)> {
        if command_line.trim().is_empty() {
            return Err(anyhow!("No command provided"));
        }
        let (shell, flag) = self.platform.shell();
        info!("Executing system command: {} {} {:?}", shell, flag, command_line);
        Ok((shell, flag))
    }

    /// Writes stdout then stderr to the sink, one line per emit.
    fn handle_output(output: &Output, sink: &dyn OutputSink) {
        for stream in [&output.stdout, &output.stderr] {
            for line in String::from_utf8_lossy(stream).lines() {
                sink.emit(line);
            }
        }
    }
}
