//! Terminal rendering of core interaction requests.
//!
//! The core never prompts; it returns `InteractionRequest` values. This
//! module is the only place that reads stdin. Non-interactive runs answer
//! with the request default (`--yes`) or fail with a usage error naming it.

use std::io::{BufRead, Write};

use scc_common::{InteractionKind, InteractionRequest, SccError, SccResult};

/// How prompts are answered for the current command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerMode {
    /// Read from the terminal.
    Prompt,
    /// Take each request's default.
    AcceptDefaults,
    /// Refuse to prompt.
    Fail,
}

impl AnswerMode {
    pub fn from_flags(yes: bool, non_interactive: bool) -> Self {
        if yes {
            AnswerMode::AcceptDefaults
        } else if non_interactive {
            AnswerMode::Fail
        } else {
            AnswerMode::Prompt
        }
    }
}

/// Resolve an interaction request to the chosen option id (for selects) or
/// `"yes"`/`"no"` (for confirms).
pub fn resolve(request: &InteractionRequest, mode: AnswerMode) -> SccResult<String> {
    match mode {
        AnswerMode::AcceptDefaults => request.default.clone().ok_or_else(|| {
            SccError::usage(format!("no default answer for '{}'", request.label))
        }),
        AnswerMode::Fail => {
            let mut err = SccError::usage(format!(
                "interaction required in a non-interactive run: {}",
                request.label
            ));
            err.suggestion = Some(match request.options.first() {
                Some(first) => format!(
                    "{} (e.g. '{}'), or pass --yes to accept defaults",
                    request
                        .options
                        .iter()
                        .map(|o| o.label.as_str())
                        .collect::<Vec<_>>()
                        .join(" / "),
                    first.label
                ),
                None => "pass --yes to accept defaults".to_string(),
            });
            Err(err)
        }
        AnswerMode::Prompt => prompt(request),
    }
}

fn prompt(request: &InteractionRequest) -> SccResult<String> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    match request.kind {
        InteractionKind::Confirm => {
            write!(stdout, "{} [y/N] ", request.label).ok();
            stdout.flush().ok();
            let mut line = String::new();
            stdin.lock().read_line(&mut line).map_err(read_error)?;
            let yes = matches!(line.trim().to_lowercase().as_str(), "y" | "yes");
            Ok(if yes { "yes" } else { "no" }.to_string())
        }
        InteractionKind::Select => {
            writeln!(stdout, "{}", request.label).ok();
            for (i, option) in request.options.iter().enumerate() {
                writeln!(stdout, "  {}) {}", i + 1, option.label).ok();
            }
            write!(stdout, "choice [1-{}]: ", request.options.len()).ok();
            stdout.flush().ok();
            let mut line = String::new();
            stdin.lock().read_line(&mut line).map_err(read_error)?;
            let index: usize = line
                .trim()
                .parse()
                .map_err(|_| SccError::usage("not a number"))?;
            request
                .options
                .get(index.wrapping_sub(1))
                .map(|o| o.id.clone())
                .ok_or_else(|| SccError::usage("choice out of range"))
        }
        InteractionKind::Input => {
            write!(stdout, "{}: ", request.label).ok();
            stdout.flush().ok();
            let mut line = String::new();
            stdin.lock().read_line(&mut line).map_err(read_error)?;
            Ok(line.trim().to_string())
        }
    }
}

fn read_error(e: std::io::Error) -> SccError {
    SccError::state(format!("failed to read from stdin: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scc_common::interaction::InteractionOption;

    fn select_request() -> InteractionRequest {
        InteractionRequest::select(
            "protected-branch",
            "Branch 'main' is protected",
            vec![
                InteractionOption::new("create-branch", "Create a branch"),
                InteractionOption::new("cancel", "Cancel"),
            ],
        )
        .with_default("create-branch")
    }

    #[test]
    fn accept_defaults_returns_the_default() {
        let answer = resolve(&select_request(), AnswerMode::AcceptDefaults).unwrap();
        assert_eq!(answer, "create-branch");
    }

    #[test]
    fn fail_mode_is_a_usage_error_naming_options() {
        let err = resolve(&select_request(), AnswerMode::Fail).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.suggestion.as_deref().unwrap_or("").contains("Create a branch"));
    }

    #[test]
    fn accept_defaults_without_default_is_an_error() {
        let request = InteractionRequest::confirm("odd", "No default here");
        assert!(resolve(&request, AnswerMode::AcceptDefaults).is_err());
    }
}
