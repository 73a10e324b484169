//! Front-end seams: where output goes and where answers come from.
//!
//! The resolver never writes to stdout or reads stdin directly. It emits
//! lines through an [`OutputSink`] and asks questions through a [`Prompt`].
//! The terminal implementations live here; a graphical front-end would
//! provide its own (a text widget for the sink, a modal dialog for the
//! prompt) without touching the engine.

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, BufRead, BufReader, IsTerminal, Stdin, Stdout, Write};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Destination for user-visible output.
pub trait OutputSink: Send + Sync {
    /// Emits one complete line.
    fn emit(&self, line: &str);

    /// Replaces the current transient status line (progress bars).
    ///
    /// Sinks that cannot update in place just emit the line.
    fn redraw(&self, line: &str) {
        self.emit(line);
    }

    /// Whether this sink is an interactive terminal that can draw in place.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// One answer read from a [`Prompt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Line(String),
    /// The user interrupted while this answer was being typed.
    Interrupted,
    /// No more input will ever arrive.
    Closed,
}

/// Synchronous question/answer capability.
pub trait Prompt {
    fn read(&mut self, question: &str) -> Reply;

    /// Like [`Prompt::read`], collapsing interrupts and end-of-input to `None`.
    fn ask(&mut self, question: &str) -> Option<String> {
        match self.read(question) {
            Reply::Line(line) => Some(line),
            Reply::Interrupted | Reply::Closed => None,
        }
    }
}

/// Asks a yes/no question. Anything but `y`/`yes` means no.
pub fn confirm(prompt: &mut dyn Prompt, question: &str) -> bool {
    let answer = prompt.ask(question).map(|a| a.trim().to_lowercase());
    let accepted = matches!(answer.as_deref(), Some("y") | Some("yes"));
    info!("Confirmation '{}' -> {}", question.trim(), accepted);
    accepted
}

/// Asks for a 1-based choice among `count` items, returning its 0-based index.
pub fn choose(prompt: &mut dyn Prompt, question: &str, count: usize) -> Option<usize> {
    let answer = prompt.ask(question)?;
    match answer.trim().parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Some(n - 1),
        _ => None,
    }
}

// =========================================================================
// Terminal implementations
// =========================================================================

/// Writes to stdout.
///
/// When stdout is a terminal the progress bar draws itself there; piped
/// output gets only the final status lines.
#[derive(Default)]
pub struct TerminalSink;

impl TerminalSink {
    pub fn new() -> Self {
        Self
    }
}

impl OutputSink for TerminalSink {
    fn emit(&self, line: &str) {
        let _ = writeln!(io::stdout().lock(), "{}", line);
    }

    fn redraw(&self, _line: &str) {}

    fn is_terminal(&self) -> bool {
        io::stdout().is_terminal()
    }
}

/// Interactive prompt with line editing and history.
pub struct EditorPrompt {
    editor: DefaultEditor,
}

impl EditorPrompt {
    pub fn new() -> Result<Self, ReadlineError> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl Prompt for EditorPrompt {
    fn read(&mut self, question: &str) -> Reply {
        let reply = reply_from(self.editor.readline(question));
        if let Reply::Line(line) = &reply {
            if !line.is_empty() {
                let _ = self.editor.add_history_entry(line.as_str());
            }
        }
        reply
    }
}

/// Maps a readline result onto a [`Reply`]. Ctrl-C abandons the line,
/// Ctrl-D closes the prompt.
fn reply_from(result: Result<String, ReadlineError>) -> Reply {
    match result {
        Ok(line) => Reply::Line(line.trim().to_string()),
        Err(ReadlineError::Interrupted) => Reply::Interrupted,
        Err(ReadlineError::Eof) => Reply::Closed,
        Err(e) => {
            warn!("Failed to read input: {}", e);
            Reply::Closed
        }
    }
}

/// Line-oriented prompt over any reader/writer pair.
pub struct LinePrompt<R, W> {
    input: R,
    output: W,
}

impl LinePrompt<BufReader<Stdin>, Stdout> {
    /// Prompt reading stdin and writing questions to stdout.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Prompt for LinePrompt<R, W> {
    fn read(&mut self, question: &str) -> Reply {
        if let Err(e) = write!(self.output, "{}", question).and_then(|_| self.output.flush()) {
            warn!("Failed to write prompt: {}", e);
        }

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => Reply::Closed,
            Ok(_) => Reply::Line(line.trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Reply::Interrupted,
            Err(e) => {
                warn!("Failed to read input: {}", e);
                Reply::Closed
            }
        }
    }
}

/// The prompt for this process's stdin: a line editor on a terminal, plain
/// line reads otherwise.
pub fn stdin_prompt() -> Box<dyn Prompt> {
    if io::stdin().is_terminal() {
        match EditorPrompt::new() {
            Ok(prompt) => return Box::new(prompt),
            Err(e) => warn!("Line editor unavailable, falling back to plain input: {}", e),
        }
    }
    Box::new(LinePrompt::stdio())
}

// =========================================================================
// In-memory sink
// =========================================================================

/// Sink that records everything it receives; useful for embedding and tests.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
    redraws: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn redraws(&self) -> Vec<String> {
        self.redraws.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// All emitted lines joined with newlines.
    pub fn text(&self) -> String {
        self.lines().join("\n")
    }
}

impl OutputSink for MemorySink {
    fn emit(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }

    fn redraw(&self, line: &str) {
        self.redraws
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}
