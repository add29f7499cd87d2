use std::str::FromStr;

use thiserror::Error;

/// Operator input accepted by the terminal viewer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperatorCommand {
    Start,
    Stop,
    Stats,
    History,
    Help,
    Quit,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown command `{0}` (try: start, stop, stats, history, help, quit)")]
pub struct UnknownCommand(pub String);

impl FromStr for OperatorCommand {
    type Err = UnknownCommand;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" | "s" => Ok(OperatorCommand::Start),
            "stop" | "x" => Ok(OperatorCommand::Stop),
            "stats" => Ok(OperatorCommand::Stats),
            "history" | "h" => Ok(OperatorCommand::History),
            "help" | "?" => Ok(OperatorCommand::Help),
            "quit" | "exit" | "q" => Ok(OperatorCommand::Quit),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

pub const HELP: &str = "commands: start | stop | stats | history | help | quit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively_with_aliases() {
        assert_eq!(" START ".parse(), Ok(OperatorCommand::Start));
        assert_eq!("q".parse(), Ok(OperatorCommand::Quit));
        assert_eq!("History".parse(), Ok(OperatorCommand::History));
        assert_eq!(
            "launch".parse::<OperatorCommand>(),
            Err(UnknownCommand("launch".into()))
        );
    }
}
