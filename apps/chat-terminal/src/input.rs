//! Line input parsing for `chat-terminal`.

/// Rows moved by `/up` and `/down`.
pub const SCROLL_STEP: usize = 5;

pub const HELP_TEXT: &str = "/rooms  /open N  /new  /search TEXT  /pick N  /close  /up  /down  /signout  /quit";

/// What one line of user input asks for. List positions are zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    RefreshChatrooms,
    OpenChatroom(usize),
    OpenSearch,
    Search(String),
    PickContact(usize),
    CloseSearch,
    ScrollUp,
    ScrollDown,
    SignOut,
    Quit,
    Help,
    Send(String),
    Nothing,
    Invalid(String),
}

pub fn parse_line(line: &str) -> InputAction {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return InputAction::Nothing;
    }

    // A doubled slash sends the rest as text.
    if let Some(text) = line.strip_prefix("//") {
        return InputAction::Send(format!("/{text}"));
    }
    let Some(command) = line.strip_prefix('/') else {
        return InputAction::Send(line.to_owned());
    };

    let (name, argument) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name {
        "rooms" => InputAction::RefreshChatrooms,
        "open" => position(argument, "open").map_or_else(|err| err, InputAction::OpenChatroom),
        "new" => InputAction::OpenSearch,
        "search" => InputAction::Search(argument.to_owned()),
        "pick" => position(argument, "pick").map_or_else(|err| err, InputAction::PickContact),
        "close" => InputAction::CloseSearch,
        "up" => InputAction::ScrollUp,
        "down" => InputAction::ScrollDown,
        "signout" => InputAction::SignOut,
        "quit" | "exit" => InputAction::Quit,
        "help" => InputAction::Help,
        other => InputAction::Invalid(format!("Unknown command /{other}. {HELP_TEXT}")),
    }
}

/// Parse a one-based list position as shown on screen.
fn position(argument: &str, command: &str) -> Result<usize, InputAction> {
    match argument.parse::<usize>() {
        Ok(number) if number >= 1 => Ok(number - 1),
        _ => Err(InputAction::Invalid(format!(
            "Usage: /{command} N, where N is a list number."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_sent() {
        assert_eq!(parse_line("hello there\n"), InputAction::Send("hello there".into()));
    }

    #[test]
    fn blank_lines_do_nothing() {
        assert_eq!(parse_line("   \n"), InputAction::Nothing);
    }

    #[test]
    fn list_positions_are_one_based() {
        assert_eq!(parse_line("/open 1"), InputAction::OpenChatroom(0));
        assert_eq!(parse_line("/pick 3"), InputAction::PickContact(2));
        assert!(matches!(parse_line("/open 0"), InputAction::Invalid(_)));
        assert!(matches!(parse_line("/pick x"), InputAction::Invalid(_)));
    }

    #[test]
    fn search_keeps_inner_spacing() {
        assert_eq!(
            parse_line("/search  alex smith "),
            InputAction::Search("alex smith".into())
        );
        assert_eq!(parse_line("/search"), InputAction::Search(String::new()));
    }

    #[test]
    fn double_slash_sends_literal_text() {
        assert_eq!(parse_line("//shrug"), InputAction::Send("/shrug".into()));
    }

    #[test]
    fn unknown_commands_are_reported() {
        match parse_line("/dance") {
            InputAction::Invalid(message) => assert!(message.starts_with("Unknown command /dance")),
            other => panic!("unexpected action: {other:?}"),
        }
    }
}
