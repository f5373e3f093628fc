//! CLI - reedline-based REPL interface
//!
//! Interactive front end for the COM monitor: a prompt that tracks monitor
//! state, history support, and line dispatch through the command layer.

use anyhow::Result;
use reedline::{Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal};
use std::borrow::Cow;

use crate::app::commands::{run_line, CommandOutcome};
use crate::app::session::Session;
use crate::debug::EngineTarget;

/// Prompt showing the monitor's lifecycle state.
struct MonitorPrompt {
    state: &'static str,
}

impl MonitorPrompt {
    fn new() -> Self {
        Self { state: "---" }
    }

    fn update(&mut self, session: &Session) {
        self.state = match session.monitor() {
            Some(monitor) if monitor.is_paused() => "psd",
            Some(_) => "mon",
            None => "---",
        };
    }
}

impl Prompt for MonitorPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Owned(format!("[{}]", self.state))
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "(failed) ",
        };
        Cow::Owned(format!("(search: {}{}) ", prefix, history_search.term))
    }
}

/// Run the REPL until the operator quits.
pub fn run_cli(session: &mut Session, target: EngineTarget) -> Result<()> {
    let mut line_editor = Reedline::create();
    let mut prompt = MonitorPrompt::new();

    println!("COM monitor - type 'help' for commands, 'quit' to exit");

    loop {
        prompt.update(session);
        let sig = line_editor.read_line(&prompt)?;
        match sig {
            Signal::Success(buffer) => {
                let input = buffer.trim();
                if input.is_empty() {
                    continue;
                }
                if run_line(session, target, input) == CommandOutcome::Quit {
                    break;
                }
            }
            Signal::CtrlD | Signal::CtrlC => {
                println!("\n[*] Interrupted");
                break;
            }
        }
    }

    // Drop any live breakpoints before the process goes away.
    session.detach();
    Ok(())
}
