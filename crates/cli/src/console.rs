//! Interactive console driving of a run: prints lifecycle events and
//! answers input requests from stdin.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use waypoint_engine::{
    ExecuteError, Executor, InputKind, InputRequest, InputResponder, RunEvent, RunOutcome,
};

/// Reads answers line-by-line from stdin.
pub struct ConsoleResponder {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleResponder {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    fn present(request: &InputRequest) {
        if let Some(prompt) = &request.prompt {
            println!("\n{prompt}");
        }
        match request.kind {
            InputKind::Choice => {
                for (index, choice) in request.choices.iter().enumerate() {
                    println!("  {}. {} [{}]", index + 1, choice.label, choice.value);
                }
                print!("selection> ");
            }
            InputKind::Freeform => {
                if let Some(default_value) = &request.default_value {
                    print!("input (default: {default_value})> ");
                } else {
                    print!("input> ");
                }
            }
        }
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }

    /// Map a numeric selection onto the matching choice value; everything
    /// else passes through and is matched by the executor as a value.
    fn normalize(request: &InputRequest, line: &str) -> String {
        let line = line.trim();
        if request.kind == InputKind::Choice
            && let Ok(index) = line.parse::<usize>()
            && index >= 1
            && index <= request.choices.len()
        {
            return request.choices[index - 1].value.clone();
        }
        line.to_string()
    }
}

#[async_trait]
impl InputResponder for ConsoleResponder {
    async fn respond(&self, request: &InputRequest) -> Option<String> {
        Self::present(request);
        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => Some(Self::normalize(request, &line)),
            // stdin closed: let the run stop instead of hanging.
            _ => None,
        }
    }
}

/// Drive a run to settlement, printing progress and answering inputs
/// interactively.
pub async fn drive_interactive(
    executor: Arc<Executor>,
    mut events: tokio::sync::mpsc::UnboundedReceiver<RunEvent>,
) -> Result<RunOutcome, ExecuteError> {
    let responder = ConsoleResponder::new();
    let feeder = executor.clone();
    let bridge = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RunEvent::StateStarted { state } => {
                    println!("── {state}");
                }
                RunEvent::ModelResponded { response, .. } => {
                    println!("{response}");
                }
                RunEvent::Transition { .. } => {}
                RunEvent::InputRequested(request) => match responder.respond(&request).await {
                    Some(value) => {
                        let _ = feeder.provide_input(value);
                    }
                    None => feeder.stop(),
                },
            }
        }
    });

    let outcome = executor.execute().await;
    bridge.abort();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_types::ChoiceOption;

    fn choice_request() -> InputRequest {
        InputRequest {
            state: "pick".into(),
            kind: InputKind::Choice,
            prompt: Some("Pick".into()),
            choices: vec![
                ChoiceOption {
                    label: "Send".into(),
                    value: "send".into(),
                    next: "a".into(),
                },
                ChoiceOption {
                    label: "File".into(),
                    value: "file".into(),
                    next: "b".into(),
                },
            ],
            default_value: None,
        }
    }

    #[test]
    fn numeric_selections_map_to_choice_values() {
        let request = choice_request();
        assert_eq!(ConsoleResponder::normalize(&request, "1"), "send");
        assert_eq!(ConsoleResponder::normalize(&request, "2"), "file");
    }

    #[test]
    fn literal_values_pass_through() {
        let request = choice_request();
        assert_eq!(ConsoleResponder::normalize(&request, "file"), "file");
        assert_eq!(ConsoleResponder::normalize(&request, "9"), "9");
        assert_eq!(ConsoleResponder::normalize(&request, "  send "), "send");
    }
}
