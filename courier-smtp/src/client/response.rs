//! SMTP reply parsing.

use super::error::{ClientError, Result};

/// One line of a possibly multi-line reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `true` for `250 text`, `false` for `250-text`.
    pub is_last: bool,
    pub message: String,
}

/// A complete reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All lines joined with newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// `3xx`, e.g. `354` after DATA.
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Whether an EHLO reply advertises `keyword`.
    ///
    /// The first line is the server's greeting; each later line is a keyword
    /// followed by its parameters.
    #[must_use]
    pub fn advertises(&self, keyword: &str) -> bool {
        self.extension(keyword).is_some()
    }

    /// Parameters of an advertised EHLO keyword.
    #[must_use]
    pub fn extension(&self, keyword: &str) -> Option<Vec<&str>> {
        self.lines.iter().skip(1).find_map(|line| {
            let mut words = line.split_whitespace();
            words
                .next()
                .filter(|word| word.eq_ignore_ascii_case(keyword))
                .map(|_| words.collect())
        })
    }

    /// Parse a single reply line.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the line is not `NNN[ -]text`.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code_str = line
            .get(..3)
            .ok_or_else(|| ClientError::ParseError(format!("Response line too short: '{line}'")))?;

        let code = code_str
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code: '{code_str}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(*c)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parse a complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` if
    /// more data is needed.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the reply is malformed.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut lines = Vec::new();
        let mut consumed = 0;
        let mut first_code = None;

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let text = std::str::from_utf8(raw)?.trim_end_matches('\r');
            if text.is_empty() {
                continue;
            }

            let line = Self::parse_line(text)?;
            match first_code {
                Some(code) if code != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {code}, got {}",
                        line.code
                    )));
                }
                Some(_) => {}
                None => first_code = Some(line.code),
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(first_code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}
