//! Live progress bar for running installers.
//!
//! The dispatcher blocks on subprocess output while a [`ProgressAnimator`]
//! thread keeps the bar moving. Installer output lines are fed in through
//! [`ProgressAnimator::observe`], which turns recognisable progress readings
//! (`NN%`, `current/total`) and keyword milestones into percent updates.
//!
//! [`ProgressState`] is the model; an `indicatif` bar renders it. Terminal
//! sinks get indicatif's own stdout target, every other sink receives the
//! rendered bar through [`OutputSink::redraw`].

use crate::ui::OutputSink;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle, TermLike};
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

const BAR_TEMPLATE: &str = "{msg} [{bar:40}] {pos:>3}%";
const DEFAULT_TICK: Duration = Duration::from_millis(80);
const DEFAULT_CREEP: f32 = 0.25;
/// The idle creep never pushes the bar past this point; only real signals
/// or a successful stop do.
const CREEP_CEILING: f32 = 90.0;
const KEYWORD_STEP: f32 = 5.0;

const KEYWORDS: &[&str] = &[
    "installing",
    "downloaded",
    "downloading",
    "extracting",
    "unpacking",
    "setting up",
    "collecting",
];

/// Progress of one install. Percent never decreases while running.
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    percent: f32,
    running: bool,
    history: Vec<f32>,
}

impl ProgressState {
    pub fn percent(&self) -> f32 {
        self.percent
    }

    pub fn running(&self) -> bool {
        self.running
    }

    /// Every percent value the state has taken, in order.
    pub fn history(&self) -> &[f32] {
        &self.history
    }

    /// Raises percent to `target` (clamped to 100). Lower and non-finite
    /// targets are ignored.
    fn raise(&mut self, target: f32) -> bool {
        if !target.is_finite() {
            return false;
        }
        let target = target.clamp(0.0, 100.0);
        if target <= self.percent {
            return false;
        }
        self.percent = target;
        self.history.push(target);
        true
    }
}

/// A heuristic reading extracted from one line of installer output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    /// The installer reported an absolute position.
    Absolute(f32),
    /// A milestone was reached; move forward by this much.
    Step(f32),
}

/// Extracts a progress signal from an installer output line.
///
/// Checked in order: a direct `NN%` reading, a `current/total` download
/// reading, then milestone keywords.
pub fn progress_signal(line: &str) -> Option<Signal> {
    if let Some(percent) = percent_reading(line) {
        return Some(Signal::Absolute(percent));
    }
    if let Some(percent) = ratio_reading(line) {
        return Some(Signal::Absolute(percent));
    }
    let lower = line.to_lowercase();
    KEYWORDS
        .iter()
        .any(|keyword| lower.contains(keyword))
        .then_some(Signal::Step(KEYWORD_STEP))
}

fn percent_reading(line: &str) -> Option<f32> {
    for (idx, _) in line.match_indices('%') {
        let head = &line[..idx];
        let Some(start) = head
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
            .last()
            .map(|(i, _)| i)
        else {
            continue;
        };
        if let Ok(value) = head[start..].parse::<f32>() {
            if value.is_finite() && (0.0..=100.0).contains(&value) {
                return Some(value);
            }
        }
    }
    None
}

fn ratio_reading(line: &str) -> Option<f32> {
    line.split_whitespace().find_map(|token| {
        let (current, total) = token.split_once('/')?;
        let current: f32 = current.parse().ok()?;
        let total: f32 = total.parse().ok()?;
        let usable = current.is_finite() && total.is_finite() && current >= 0.0;
        (usable && total > 0.0 && current <= total).then(|| current / total * 100.0)
    })
}

// =============================================================================
// Rendering
// =============================================================================

/// Lets indicatif draw into an [`OutputSink`] that is not a terminal.
///
/// Each completed draw becomes one `redraw` of the sink; cursor movement is
/// meaningless there and ignored.
struct SinkTerm {
    sink: Arc<dyn OutputSink>,
    pending: Mutex<String>,
}

impl SinkTerm {
    fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            sink,
            pending: Mutex::new(String::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, String> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SinkTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkTerm").finish_non_exhaustive()
    }
}

impl TermLike for SinkTerm {
    fn width(&self) -> u16 {
        120
    }

    fn move_cursor_up(&self, _n: usize) -> io::Result<()> {
        Ok(())
    }

    fn move_cursor_down(&self, _n: usize) -> io::Result<()> {
        Ok(())
    }

    fn move_cursor_right(&self, _n: usize) -> io::Result<()> {
        Ok(())
    }

    fn move_cursor_left(&self, _n: usize) -> io::Result<()> {
        Ok(())
    }

    fn write_line(&self, s: &str) -> io::Result<()> {
        self.pending().push_str(s);
        self.flush()
    }

    fn write_str(&self, s: &str) -> io::Result<()> {
        self.pending().push_str(s);
        Ok(())
    }

    fn clear_line(&self) -> io::Result<()> {
        self.pending().clear();
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        let line = std::mem::take(&mut *self.pending());
        // indicatif pads the last line to the terminal width.
        let line = line.trim_end();
        if !line.is_empty() {
            self.sink.redraw(line);
        }
        Ok(())
    }
}

fn draw_target(sink: &Arc<dyn OutputSink>) -> ProgressDrawTarget {
    if sink.is_terminal() {
        ProgressDrawTarget::stdout()
    } else {
        ProgressDrawTarget::term_like(Box::new(SinkTerm::new(Arc::clone(sink))))
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .map(|style| style.progress_chars("█░"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn lock(state: &Mutex<ProgressState>) -> MutexGuard<'_, ProgressState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn show(bar: &ProgressBar, percent: f32) {
    bar.set_position(percent.floor() as u64);
}

// =============================================================================
// Animator
// =============================================================================

pub struct ProgressAnimator {
    label: String,
    state: Arc<Mutex<ProgressState>>,
    bar: ProgressBar,
    sink: Arc<dyn OutputSink>,
    handle: Option<JoinHandle<()>>,
    tick: Duration,
    creep: f32,
}

impl ProgressAnimator {
    pub fn new(label: impl Into<String>, sink: Arc<dyn OutputSink>) -> Self {
        let label = label.into();
        let bar = ProgressBar::with_draw_target(Some(100), draw_target(&sink));
        bar.set_style(bar_style());
        bar.set_message(label.clone());
        Self {
            label,
            state: Arc::new(Mutex::new(ProgressState::default())),
            bar,
            sink,
            handle: None,
            tick: DEFAULT_TICK,
            creep: DEFAULT_CREEP,
        }
    }

    /// Disables the idle creep, so percent moves only on signals.
    pub fn without_creep(mut self) -> Self {
        self.creep = 0.0;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Starts the animator thread. Calling it twice has no effect.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        lock(&self.state).running = true;
        self.bar.reset();
        self.bar.tick();

        let state = Arc::clone(&self.state);
        let bar = self.bar.clone();
        let tick = self.tick;
        let creep = self.creep;

        self.handle = Some(thread::spawn(move || {
            loop {
                thread::sleep(tick);
                let percent = {
                    let mut state = lock(&state);
                    if !state.running {
                        break;
                    }
                    if creep > 0.0 && state.percent < CREEP_CEILING {
                        let target = (state.percent + creep).min(CREEP_CEILING);
                        state.raise(target);
                    }
                    state.percent
                };
                show(&bar, percent);
            }
        }));
        debug!("Progress animator started for {}", self.label);
    }

    /// Moves forward by `delta` percent.
    pub fn update(&self, delta: f32) {
        let raised = {
            let mut state = lock(&self.state);
            let target = state.percent + delta;
            (state.running && state.raise(target)).then_some(state.percent)
        };
        if let Some(percent) = raised {
            show(&self.bar, percent);
        }
    }

    /// Moves to an absolute reading; readings below the current percent are ignored.
    pub fn advance_to(&self, percent: f32) {
        let raised = {
            let mut state = lock(&self.state);
            (state.running && state.raise(percent)).then_some(state.percent)
        };
        if let Some(percent) = raised {
            show(&self.bar, percent);
        }
    }

    /// Applies whatever progress signal `line` carries.
    pub fn observe(&self, line: &str) {
        match progress_signal(line) {
            Some(Signal::Absolute(percent)) => self.advance_to(percent),
            Some(Signal::Step(delta)) => self.update(delta),
            None => {}
        }
    }

    pub fn snapshot(&self) -> ProgressState {
        lock(&self.state).clone()
    }

    /// Stops the thread and renders the final state.
    ///
    /// On success percent is forced to 100 before the last redraw.
    pub fn stop(&mut self, success: bool) -> ProgressState {
        let final_state = {
            let mut state = lock(&self.state);
            state.running = false;
            if success {
                state.raise(100.0);
            }
            state.clone()
        };
        self.join();

        show(&self.bar, final_state.percent);
        if success {
            self.bar.finish();
            self.sink.emit(&format!("✅ {} completed", self.label));
        } else {
            self.bar.abandon();
            self.sink.emit(&format!(
                "❌ {} failed at {}%",
                self.label,
                final_state.percent.floor() as u32
            ));
        }
        final_state
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("Progress animator thread for {} panicked", self.label);
            }
        }
    }
}

impl Drop for ProgressAnimator {
    fn drop(&mut self) {
        lock(&self.state).running = false;
        self.join();
    }
}
