//! Classifies a raw command line into a verb plus parameter.
//!
//! `Command::parse` never fails: an unrecognized verb becomes
//! [`CommandType::Unknown`] rather than an error, so the state machine
//! always has something to dispatch on and can reply 500 itself.

/// The closed set of SMTP verbs this server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Ehlo,
    Helo,
    MailFrom,
    RcptTo,
    Data,
    Reset,
    Quit,
    Noop,
    Expand,
    Verify,
    Help,
    StartTls,
    Auth,
    Unknown,
}

/// A parsed command line: a verb and whatever text followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandType,
    pub parameter: Option<String>,
}

impl Command {
    /// Parses one line (already stripped of its CRLF). Returns `None` for an
    /// empty line, which signals "end of commands" to the caller.
    pub fn parse(line: &str) -> Option<Command> {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            return None;
        }

        let mut parts = trimmed.splitn(2, char::is_whitespace);
        let verb_token = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim_start();
        let verb_upper = verb_token.to_ascii_uppercase();

        let command = match verb_upper.as_str() {
            "EHLO" => Command { kind: CommandType::Ehlo, parameter: non_empty(rest) },
            "HELO" => Command { kind: CommandType::Helo, parameter: non_empty(rest) },
            "MAIL" => parse_mail_rcpt(rest, true),
            "RCPT" => parse_mail_rcpt(rest, false),
            "DATA" => Command { kind: CommandType::Data, parameter: None },
            "RSET" => Command { kind: CommandType::Reset, parameter: None },
            "QUIT" => Command { kind: CommandType::Quit, parameter: None },
            "NOOP" => Command { kind: CommandType::Noop, parameter: non_empty(rest) },
            "EXPN" => Command { kind: CommandType::Expand, parameter: non_empty(rest) },
            "VRFY" => Command { kind: CommandType::Verify, parameter: non_empty(rest) },
            "HELP" => Command { kind: CommandType::Help, parameter: non_empty(rest) },
            "STARTTLS" => Command { kind: CommandType::StartTls, parameter: None },
            "AUTH" => Command { kind: CommandType::Auth, parameter: non_empty(rest) },
            _ => Command { kind: CommandType::Unknown, parameter: non_empty(trimmed) },
        };

        Some(command)
    }
}

/// Extracts the `FROM:`/`TO:` keyword plus the angle-bracketed address for
/// `MAIL`/`RCPT`. A mismatched keyword yields `Unknown`: the verb itself
/// is determined jointly by the first token and this keyword.
fn parse_mail_rcpt(rest: &str, is_mail: bool) -> Command {
    let rest = rest.trim_start();
    let keyword = if is_mail { "FROM:" } else { "TO:" };

    if rest.len() >= keyword.len() && rest[..keyword.len()].eq_ignore_ascii_case(keyword) {
        let kind = if is_mail { CommandType::MailFrom } else { CommandType::RcptTo };
        Command { kind, parameter: extract_angle(rest) }
    } else {
        Command { kind: CommandType::Unknown, parameter: non_empty(rest) }
    }
}

/// Finds the `<...>` substring (brackets included) in a command parameter.
fn extract_angle(s: &str) -> Option<String> {
    let start = s.find('<')?;
    let end = s[start..].find('>')? + start;
    Some(s[start..=end].to_string())
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}
