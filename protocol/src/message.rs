use crate::commands::{CommandCode, ERROR_LITERAL, ERROR_SUB_CODE, UNKNOWN_REQUEST_LITERAL};
use crate::error::ProtocolError;
use crate::{FIELD_DELIMITER, FRAME_TERMINATOR, RECORD_DELIMITER};
use std::str::FromStr;

/// One request or reply: `COMMAND^SUB^PARAM1^PARAM2^...`.
///
/// The command is kept as the raw wire token so that an unknown code still
/// decodes; dispatch decides what to do with it. Parameter values are
/// percent-substituted on encode so the two delimiters can never appear
/// unescaped inside a value: `%` becomes `%25`, `^` becomes `%5E` and `$`
/// becomes `%24`. Decoding reverses the substitution; sequences that do not
/// match one of the three codes pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: String,
    pub sub_code: String,
    pub params: Vec<String>,
}

impl Message {
    pub fn new(command: &str, sub_code: &str, params: Vec<String>) -> Self {
        Self {
            command: command.to_string(),
            sub_code: sub_code.to_string(),
            params,
        }
    }

    /// A request for `command` carrying the registry sub-code.
    pub fn request(command: CommandCode, params: Vec<String>) -> Self {
        Self::new(command.as_str(), command.request_sub_code(), params)
    }

    /// A reply to `command` with the given payload parameters. The sub-code
    /// carries the parameter count, the receiver's lightweight integrity hint.
    pub fn reply(command: CommandCode, params: Vec<String>) -> Self {
        Self::new(command.as_str(), &params.len().to_string(), params)
    }

    /// The reserved reply for a failed handler.
    pub fn error_reply() -> Self {
        Self::new(
            CommandCode::Error.as_str(),
            ERROR_SUB_CODE,
            vec![ERROR_LITERAL.to_string()],
        )
    }

    /// The reserved reply for a command with no dispatch match.
    pub fn unknown_request() -> Self {
        Self::new(
            CommandCode::Error.as_str(),
            ERROR_SUB_CODE,
            vec![UNKNOWN_REQUEST_LITERAL.to_string()],
        )
    }

    /// The command as a registry code, if it is one.
    pub fn command_code(&self) -> Result<CommandCode, ProtocolError> {
        CommandCode::from_str(&self.command)
    }

    pub fn is_error(&self) -> bool {
        self.command == CommandCode::Error.as_str()
    }

    pub fn encode(&self) -> String {
        let mut line = String::with_capacity(16 + self.params.len() * 12);
        line.push_str(&self.command);
        line.push(FIELD_DELIMITER);
        line.push_str(&self.sub_code);
        for param in &self.params {
            line.push(FIELD_DELIMITER);
            line.push_str(&escape_param(param));
        }
        line
    }

    /// The encoded line with the frame terminator appended, ready for the wire.
    pub fn encode_bytes(&self) -> Vec<u8> {
        let mut bytes = self.encode().into_bytes();
        bytes.extend_from_slice(FRAME_TERMINATOR.as_bytes());
        bytes
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.split(FIELD_DELIMITER);

        let command = parts
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProtocolError::MalformedMessage(line.to_string()))?;
        let sub_code = parts
            .next()
            .ok_or_else(|| ProtocolError::MalformedMessage(line.to_string()))?;

        let mut params: Vec<String> = parts.map(unescape_param).collect();
        // The terminal pads reply lines with trailing delimiters.
        while params.last().is_some_and(|p| p.is_empty()) {
            params.pop();
        }

        Ok(Self::new(command, sub_code, params))
    }

    /// Splits one compound parameter into its record fields.
    ///
    /// Permissive by design: there is nothing to fail on, a segment that was
    /// never joined simply comes back as a single opaque field.
    pub fn record_fields(param: &str) -> Vec<String> {
        param.split(RECORD_DELIMITER).map(str::to_string).collect()
    }

    /// Joins record fields into one compound parameter.
    pub fn join_record(fields: &[&str]) -> String {
        fields.join(&RECORD_DELIMITER.to_string())
    }

    /// Advisory integrity check: a numeric sub-code is expected to equal the
    /// parameter count. Returns `(expected, actual)` on a mismatch so callers
    /// can log it; never enforced.
    pub fn integrity_hint(&self) -> Option<(usize, usize)> {
        let numeric: usize = self.sub_code.parse().ok()?;
        let expected = self.params.len();
        (numeric != expected).then_some((expected, numeric))
    }
}

fn escape_param(value: &str) -> String {
    if !value.contains(['%', FIELD_DELIMITER, RECORD_DELIMITER]) {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            FIELD_DELIMITER => out.push_str("%5E"),
            RECORD_DELIMITER => out.push_str("%24"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_param(value: &str) -> String {
    if !value.contains('%') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        match rest[pos..].get(..3) {
            Some("%25") => {
                out.push('%');
                rest = &rest[pos + 3..];
            }
            Some("%5E") => {
                out.push(FIELD_DELIMITER);
                rest = &rest[pos + 3..];
            }
            Some("%24") => {
                out.push(RECORD_DELIMITER);
                rest = &rest[pos + 3..];
            }
            // Anything else passes through untouched.
            _ => {
                out.push('%');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}
