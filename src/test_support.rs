//! Shared test doubles: a scripted process runner, prompt and assistant.

use crate::assistant::{AssistantClient, AssistantReply};
use crate::error::AegisError;
use crate::executor::ProcessRunner;
use crate::ui::{Prompt, Reply};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};

#[cfg(unix)]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(code << 8)
}

#[cfg(windows)]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatus::from_raw(code as u32)
}

/// Process runner that records every call and answers from a script.
///
/// Calls are recorded as `"program arg1 arg2"`. A response matches when its
/// prefix starts the call; the longest matching prefix wins. Unscripted
/// captured runs exit 1, unscripted streamed runs (installs) exit 0.
#[derive(Default)]
pub struct RecordingRunner {
    present: Mutex<HashSet<String>>,
    responses: Vec<(String, i32, Vec<String>)>,
    calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Programs reported as found on PATH.
    pub fn with_programs(self, programs: &[&str]) -> Self {
        for program in programs {
            self.add_program(program);
        }
        self
    }

    /// Makes `program` appear on PATH from now on.
    pub fn add_program(&self, program: &str) {
        self.present.lock().unwrap().insert(program.to_string());
    }

    pub fn respond(mut self, prefix: &str, code: i32, lines: &[&str]) -> Self {
        self.responses.push((
            prefix.to_string(),
            code,
            lines.iter().map(|l| l.to_string()).collect(),
        ));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, program: &str, args: &[&str]) -> String {
        let call = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(call.clone());
        call
    }

    fn lookup(&self, call: &str) -> Option<&(String, i32, Vec<String>)> {
        self.responses
            .iter()
            .filter(|(prefix, _, _)| call.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _, _)| prefix.len())
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        let call = self.record(program, args);
        let (code, lines) = match self.lookup(&call) {
            Some((_, code, lines)) => (*code, lines.clone()),
            None => (1, Vec::new()),
        };
        let mut stdout = lines.join("\n").into_bytes();
        if !stdout.is_empty() {
            stdout.push(b'\n');
        }
        Ok(Output {
            status: exit_status(code),
            stdout,
            stderr: Vec::new(),
        })
    }

    fn run_streaming(
        &self,
        program: &str,
        args: &[&str],
        on_line: &mut dyn FnMut(&str),
    ) -> Result<Option<i32>> {
        let call = self.record(program, args);
        match self.lookup(&call) {
            Some((_, code, lines)) => {
                for line in lines {
                    on_line(line);
                }
                Ok(Some(*code))
            }
            None => Ok(Some(0)),
        }
    }

    fn program_exists(&self, program: &str) -> bool {
        self.present.lock().unwrap().contains(program)
    }
}

/// Prompt answering from a fixed list; `Closed` once exhausted.
#[derive(Default)]
pub struct ScriptedPrompt {
    replies: VecDeque<Reply>,
    questions: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new(answers: &[&str]) -> Self {
        Self::with_replies(
            answers
                .iter()
                .map(|a| Reply::Line(a.to_string()))
                .collect(),
        )
    }

    pub fn with_replies(replies: Vec<Reply>) -> Self {
        Self {
            replies: replies.into(),
            questions: Vec::new(),
        }
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }
}

impl Prompt for ScriptedPrompt {
    fn read(&mut self, question: &str) -> Reply {
        self.questions.push(question.to_string());
        self.replies.pop_front().unwrap_or(Reply::Closed)
    }
}

/// Assistant with one fixed answer, or always unavailable.
pub struct FixedAssistant {
    explanation: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl FixedAssistant {
    pub fn answering(explanation: &str) -> Arc<Self> {
        Arc::new(Self {
            explanation: Some(explanation.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            explanation: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssistantClient for Arc<FixedAssistant> {
    async fn explain(&self, command: &str) -> Result<AssistantReply, AegisError> {
        self.calls.lock().unwrap().push(command.to_string());
        match &self.explanation {
            Some(text) => Ok(AssistantReply::from_explanation(text.clone())),
            None => Err(AegisError::AssistantUnavailable("offline".to_string())),
        }
    }
}
