// ABOUTME: Parsing of "!command" lines typed into the terminal chat
// ABOUTME: Anything that is not a command is composer input

use std::str::FromStr;
use tutorchat_core::ContentKind;

/// A parsed `!command` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The command name (without the `!`)
    pub name: String,
    /// Arguments, with quoted strings kept together
    pub args: Vec<String>,
    /// The raw argument string after the command name
    pub raw_args: String,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>, raw_args: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args,
            raw_args: raw_args.into(),
        }
    }

    pub fn first_arg(&self) -> Option<&str> {
        self.args.first().map(|s| s.as_str())
    }

    /// Map onto the commands the chat loop understands
    pub fn as_chat(&self) -> ChatCommand {
        match self.name.as_str() {
            "search" | "find" | "f" => {
                if self.raw_args.is_empty() {
                    ChatCommand::ToggleSearch
                } else {
                    ChatCommand::Search(self.raw_args.clone())
                }
            }
            "kinds" => {
                let parsed: Result<Vec<ContentKind>, _> =
                    self.args.iter().map(|a| ContentKind::from_str(a)).collect();
                match parsed {
                    Ok(kinds) if !kinds.is_empty() => ChatCommand::SearchKinds(kinds),
                    Ok(_) => ChatCommand::SearchKinds(ContentKind::ALL.to_vec()),
                    Err(e) => ChatCommand::Invalid(e.to_string()),
                }
            }
            "close" => ChatCommand::CloseSearch,
            "code" => ChatCommand::ToggleCode {
                language: self.first_arg().map(str::to_string),
            },
            "md" | "markdown" => ChatCommand::Markdown,
            "send" | "s" => ChatCommand::Send,
            "voice" | "v" => match self.first_arg() {
                None => ChatCommand::ToggleVoice,
                Some("in") | Some("input") => ChatCommand::ToggleVoiceInput,
                Some("out") | Some("output") => ChatCommand::ToggleVoiceOutput,
                Some(voice) => ChatCommand::SetVoice(voice.to_string()),
            },
            "export" | "e" => ChatCommand::Export,
            "attach" | "a" => {
                if self.args.is_empty() {
                    ChatCommand::Invalid("usage: !attach <path> [path...]".to_string())
                } else {
                    ChatCommand::Attach(self.args.clone())
                }
            }
            "detach" => match self.first_arg() {
                None | Some("all") => ChatCommand::DetachAll,
                Some(id) => ChatCommand::Detach(id.to_string()),
            },
            "key" | "k" => {
                if self.raw_args.is_empty() {
                    ChatCommand::Invalid("usage: !key <chord>, e.g. !key Ctrl+K".to_string())
                } else {
                    ChatCommand::Key(self.raw_args.clone())
                }
            }
            "copy" => match self.first_arg() {
                Some(id) => ChatCommand::Copy(id.to_string()),
                None => ChatCommand::Invalid("usage: !copy <message-id>".to_string()),
            },
            "read" => ChatCommand::MarkRead,
            "status" => ChatCommand::Status,
            "stats" => ChatCommand::Stats,
            "history" | "log" => ChatCommand::History,
            "help" | "h" | "?" => ChatCommand::Help,
            "quit" | "exit" | "q" => ChatCommand::Quit { end_session: false },
            "end" => ChatCommand::Quit { end_session: true },
            other => ChatCommand::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    ToggleSearch,
    Search(String),
    SearchKinds(Vec<ContentKind>),
    CloseSearch,
    ToggleCode { language: Option<String> },
    Markdown,
    Send,
    ToggleVoice,
    ToggleVoiceInput,
    ToggleVoiceOutput,
    SetVoice(String),
    Export,
    Attach(Vec<String>),
    Detach(String),
    DetachAll,
    Key(String),
    Copy(String),
    MarkRead,
    Status,
    Stats,
    History,
    Help,
    Quit { end_session: bool },
    Invalid(String),
    Unknown(String),
}

pub const HELP: &str = "\
Commands:
  !search <text>     filter the log (no text toggles search)
  !kinds <kind...>   restrict search to text, code, markdown, image, file, voice
  !close             close search
  !code [language]   toggle the code editor; !send submits the buffer
  !md                compose the next message as markdown
  !voice [in|out|<voice>]  record, toggle input/output, or pick a voice
  !attach <path...>  attach files to the next message
  !detach [id|all]   drop pending attachments
  !key <chord>       press a key chord, e.g. !key Ctrl+E
  !copy <id>         copy a message to the clipboard
  !export            export this session as JSON
  !read              mark everything read
  !status            connection and session status
  !stats             message and connection counters
  !history           print the log again
  !quit / !end       leave (keep / delete history)
!!<text> sends <text> as a message even if it looks like a command.";

/// Result of parsing an input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    Command(Command),
    Message(String),
    Ignore,
}

impl ParseResult {
    pub fn is_command(&self) -> bool {
        matches!(self, ParseResult::Command(_))
    }

    pub fn as_message(&self) -> Option<&str> {
        match self {
            ParseResult::Message(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Split arguments on whitespace, respecting quotes
fn parse_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_char = '"';

    for c in input.chars() {
        match c {
            '"' | '\'' if !in_quotes => {
                in_quotes = true;
                quote_char = c;
            }
            c if c == quote_char && in_quotes => {
                in_quotes = false;
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// Parse one input line.
///
/// `!name args` is a command; `!!text` escapes to a message starting with
/// the remaining text; blank lines are ignored. Message text keeps its
/// leading indentation so code lines survive.
pub fn parse_line(line: &str) -> ParseResult {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ParseResult::Ignore;
    }

    if let Some(escaped) = trimmed.strip_prefix("!!") {
        let escaped = escaped.trim();
        if escaped.is_empty() {
            return ParseResult::Ignore;
        }
        return ParseResult::Message(escaped.to_string());
    }

    if let Some(after_bang) = trimmed.strip_prefix('!') {
        if after_bang.chars().next().is_some_and(|c| c.is_alphabetic() || c == '?') {
            let parts: Vec<&str> = after_bang.splitn(2, char::is_whitespace).collect();
            let name = parts[0].to_lowercase();
            let raw_args = parts.get(1).map(|s| s.trim()).unwrap_or("").to_string();
            let args = parse_args(&raw_args);
            return ParseResult::Command(Command::new(name, args, raw_args));
        }
    }

    ParseResult::Message(line.trim_end().to_string())
}
