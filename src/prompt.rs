// src/prompt.rs
// Operator interaction: a terminal prompt for the command line tool and a
// scripted one for unattended runs.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core_traits::OperatorPrompt;

pub const MSG_RECOVER_PRINT: &str = "Printer was disconnected. Recover print?";
pub const MSG_CRASH_DETECTED: &str = "Crash detected. Resume print?";

/// Asks on stdin/stdout.
#[derive(Debug, Default)]
pub struct ConsolePrompt {
    /// Answer every question with yes without asking.
    pub assume_yes: bool,
}

impl OperatorPrompt for ConsolePrompt {
    fn confirm(&mut self, message: &str) -> bool {
        if self.assume_yes {
            log::info!("{} -> yes", message);
            return true;
        }
        print!("{} [y/N] ", message);
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }

    fn show_fatal(&mut self, message: &str) {
        eprintln!("!! {}", message);
    }
}

/// Everything a scripted prompt was asked or shown.
#[derive(Debug, Default, Clone)]
pub struct PromptLog {
    pub questions: Vec<String>,
    pub fatal: Vec<String>,
}

/// Replays canned answers; runs out into `default_answer`.
#[derive(Debug)]
pub struct ScriptedPrompt {
    answers: VecDeque<bool>,
    default_answer: bool,
    log: Arc<Mutex<PromptLog>>,
}

impl ScriptedPrompt {
    pub fn new(answers: &[bool], default_answer: bool) -> Self {
        ScriptedPrompt {
            answers: answers.iter().copied().collect(),
            default_answer,
            log: Arc::new(Mutex::new(PromptLog::default())),
        }
    }

    /// Handle to the transcript, still readable after the prompt is moved
    /// into a printer.
    pub fn log(&self) -> Arc<Mutex<PromptLog>> {
        Arc::clone(&self.log)
    }
}

impl OperatorPrompt for ScriptedPrompt {
    fn confirm(&mut self, message: &str) -> bool {
        self.log.lock().questions.push(message.to_string());
        let answer = self.answers.pop_front().unwrap_or(self.default_answer);
        log::info!("{} -> {}", message, if answer { "yes" } else { "no" });
        answer
    }

    fn show_fatal(&mut self, message: &str) {
        log::error!("{}", message);
        self.log.lock().fatal.push(message.to_string());
    }
}
