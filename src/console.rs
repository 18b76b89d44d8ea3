//! Line protocol of the operator console.
//!
//! Each stdin line is one [`ConsoleInput`]. Parsing is kept apart from the
//! binary so it can be tested without a terminal.

use crate::domain::{Command, TaxType};
use crate::error::LinkError;

/// Usage text printed by `help` and after a parse error.
pub const HELP: &str = "\
commands:
  pause | resume | step
  rate <number>                      set the base interest rate
  tax <income|corporate> <number>    set a tax rate
  {\"type\": ..., \"payload\": ...}      send a raw command
  stats                              print link counters
  quit                               disconnect and exit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    /// Send this command to the backend.
    Send(Command),
    /// Print link counters.
    Stats,
    /// Print usage.
    Help,
    /// Disconnect and exit.
    Quit,
    /// Blank line.
    Empty,
}

/// Parses one console line.
///
/// # Errors
///
/// Returns [`LinkError::InvalidCommand`] for unknown words, missing or
/// non-numeric arguments, and JSON that is not a command object.
pub fn parse_line(line: &str) -> Result<ConsoleInput, LinkError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleInput::Empty);
    }
    if line.starts_with('{') {
        return parse_raw(line).map(ConsoleInput::Send);
    }

    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(ConsoleInput::Empty);
    };

    let input = match word.to_ascii_lowercase().as_str() {
        "pause" => ConsoleInput::Send(Command::pause()),
        "resume" => ConsoleInput::Send(Command::resume()),
        "step" => ConsoleInput::Send(Command::step()),
        "rate" => ConsoleInput::Send(Command::set_base_rate(parse_rate(words.next())?)),
        "tax" => {
            let tax_type: TaxType = words
                .next()
                .ok_or_else(|| LinkError::InvalidCommand("tax needs a tax type".to_string()))?
                .parse()?;
            ConsoleInput::Send(Command::set_tax_rate(tax_type, parse_rate(words.next())?))
        }
        "stats" => ConsoleInput::Stats,
        "help" | "?" => ConsoleInput::Help,
        "quit" | "exit" => ConsoleInput::Quit,
        other => {
            return Err(LinkError::InvalidCommand(format!("unknown command {other}")));
        }
    };

    if let Some(extra) = words.next() {
        return Err(LinkError::InvalidCommand(format!(
            "unexpected argument {extra}"
        )));
    }
    Ok(input)
}

fn parse_rate(raw: Option<&str>) -> Result<f64, LinkError> {
    let raw = raw.ok_or_else(|| LinkError::InvalidCommand("missing rate".to_string()))?;
    match raw.parse::<f64>() {
        Ok(rate) if rate.is_finite() => Ok(rate),
        _ => Err(LinkError::InvalidCommand(format!("{raw} is not a number"))),
    }
}

fn parse_raw(line: &str) -> Result<Command, LinkError> {
    let command: Command = serde_json::from_str(line)
        .map_err(|e| LinkError::InvalidCommand(format!("raw command: {e}")))?;
    if command.kind.is_empty() {
        return Err(LinkError::InvalidCommand(
            "raw command has an empty type".to_string(),
        ));
    }
    Ok(command)
}
