//! Chat-line command grammar.
//!
//! `/imposter` and `/wordle` commands are case-sensitive. `vote <name>` and
//! `guess <word>` match their keyword case-insensitively; whether they act as
//! commands depends on the game phase, which the dispatcher checks.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ImposterNew,
    ImposterJoin,
    ImposterStart,
    ImposterCancel,
    ImposterUnknown(String),
    Vote(String),
    WordleStart,
    WordleCancel,
    WordleUnknown(String),
    Guess(String),
}

/// Strip a slash command and return its argument text.
///
/// `"/imposter join"` with `"/imposter"` yields `Some("join")`, while
/// `"/imposters"` yields `None`.
fn slash_args<'a>(line: &'a str, command: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(command)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Case-insensitive `keyword <arg>` with a non-empty argument
fn keyword_arg<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let head = line.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &line[keyword.len()..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let arg = rest.trim();
    (!arg.is_empty()).then_some(arg)
}

pub fn parse(line: &str) -> Option<Command> {
    let line = line.trim();

    if let Some(args) = slash_args(line, "/imposter") {
        return Some(match args {
            "" => Command::ImposterNew,
            "join" => Command::ImposterJoin,
            "start" => Command::ImposterStart,
            "cancel" => Command::ImposterCancel,
            other => Command::ImposterUnknown(other.to_string()),
        });
    }

    if let Some(args) = slash_args(line, "/wordle") {
        return Some(match args {
            "" => Command::WordleStart,
            "cancel" => Command::WordleCancel,
            other => Command::WordleUnknown(other.to_string()),
        });
    }

    if let Some(target) = keyword_arg(line, "vote") {
        return Some(Command::Vote(target.to_string()));
    }

    if let Some(word) = keyword_arg(line, "guess") {
        return Some(Command::Guess(word.to_string()));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imposter_commands() {
        assert_eq!(parse("/imposter"), Some(Command::ImposterNew));
        assert_eq!(parse("  /imposter  "), Some(Command::ImposterNew));
        assert_eq!(parse("/imposter join"), Some(Command::ImposterJoin));
        assert_eq!(parse("/imposter start"), Some(Command::ImposterStart));
        assert_eq!(parse("/imposter cancel"), Some(Command::ImposterCancel));
        assert_eq!(
            parse("/imposter dance"),
            Some(Command::ImposterUnknown("dance".to_string()))
        );
    }

    #[test]
    fn test_slash_commands_are_case_sensitive() {
        assert_eq!(parse("/Imposter join"), None);
        assert_eq!(parse("/imposter JOIN"), Some(Command::ImposterUnknown("JOIN".to_string())));
        assert_eq!(parse("/WORDLE"), None);
    }

    #[test]
    fn test_prefix_must_end_at_word_boundary() {
        assert_eq!(parse("/imposters"), None);
        assert_eq!(parse("/wordles"), None);
        assert_eq!(parse("voter fraud"), None);
        assert_eq!(parse("guessing game"), None);
    }

    #[test]
    fn test_vote_keyword_is_case_insensitive() {
        assert_eq!(parse("vote Bob"), Some(Command::Vote("Bob".to_string())));
        assert_eq!(parse("VOTE  bob "), Some(Command::Vote("bob".to_string())));
        assert_eq!(parse("vote"), None);
        assert_eq!(parse("vote   "), None);
    }

    #[test]
    fn test_wordle_commands() {
        assert_eq!(parse("/wordle"), Some(Command::WordleStart));
        assert_eq!(parse("/wordle cancel"), Some(Command::WordleCancel));
        assert_eq!(
            parse("/wordle hint"),
            Some(Command::WordleUnknown("hint".to_string()))
        );
        assert_eq!(parse("guess crane"), Some(Command::Guess("crane".to_string())));
        assert_eq!(parse("Guess PAPER"), Some(Command::Guess("PAPER".to_string())));
    }

    #[test]
    fn test_plain_lines() {
        assert_eq!(parse("hello there"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("it has a mane"), None);
        // Multi-byte text must not panic when matching keywords
        assert_eq!(parse("vöté x"), None);
    }
}
