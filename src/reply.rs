//! Emits single/multi-line SMTP replies with the correct continuation
//! syntax. The writer side lives in [`Session`](crate::session::Session)
//! itself — this module only builds the text, since wire I/O is generic
//! over whatever stream the session owns.

/// A three-digit status code plus an ordered list of message lines.
///
/// Invariant: the last line uses the space separator (`CODE text`); every
/// earlier line uses the dash separator (`CODE-text`). An empty line emits
/// only the code and separator, no trailing space.
#[derive(Debug, Clone)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn single(code: u16, line: impl Into<String>) -> Self {
        Reply { code, lines: vec![line.into()] }
    }

    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        debug_assert!(!lines.is_empty(), "a reply must have at least one line");
        Reply { code, lines }
    }

    /// Renders the full wire text for this reply, CRLF-terminated.
    pub fn render(&self) -> String {
        let last = self.lines.len().saturating_sub(1);
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            if line.is_empty() {
                out.push_str(&format!("{}{}\r\n", self.code, sep));
            } else {
                out.push_str(&format!("{}{}{}\r\n", self.code, sep, line));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_uses_space_separator() {
        let reply = Reply::single(250, "OK");
        assert_eq!(reply.render(), "250 OK\r\n");
    }

    #[test]
    fn multiline_uses_dash_then_space() {
        let reply = Reply::multiline(250, vec!["a greets b".into(), "8BITMIME".into(), "SIZE".into()]);
        assert_eq!(reply.render(), "250-a greets b\r\n250-8BITMIME\r\n250 SIZE\r\n");
    }

    #[test]
    fn empty_line_emits_only_code_and_separator() {
        let reply = Reply::single(250, "");
        assert_eq!(reply.render(), "250 \r\n");
    }
}
