//! Line codec for the lobby text protocol
//!
//! Every line is `COMMAND<sep>param<sep>param...`. The separator is a space,
//! except around "sentences" (parameters that contain a space), which are
//! delimited with tabs. Tab is reserved, so a literal tab inside a parameter
//! is sent as two spaces.

/// One decoded (or prepared) protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: String,
    pub data: String,
}

impl Message {
    pub fn new(command: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            data: data.into(),
        }
    }

    /// Build an outbound message, joining `params` with the protocol separators
    pub fn prepare<S: AsRef<str>>(command: &str, params: &[S]) -> Self {
        let mut pieces: Vec<String> = Vec::with_capacity(params.len() * 2);

        for (i, param) in params.iter().enumerate() {
            let param = param.as_ref().replace('\t', "  ");

            if param.contains(' ') {
                if i > 0 {
                    if let Some(sep) = pieces.last_mut() {
                        *sep = "\t".to_string();
                    }
                }
                pieces.push(param);
                pieces.push("\t".to_string());
            } else {
                pieces.push(param);
                pieces.push(" ".to_string());
            }
        }

        // trailing separator
        pieces.pop();

        Self {
            command: command.to_string(),
            data: pieces.concat(),
        }
    }

    /// The line as written to the socket, without the newline
    pub fn to_line(&self) -> String {
        if self.data.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.data)
        }
    }

    /// Split the payload back into parameters on the protocol separators.
    ///
    /// This is ambiguous when words and sentences are mixed (a space-joined
    /// run of words looks like a sentence) and for a lone sentence; it
    /// recovers the original params when they are all words or at least two
    /// sentences.
    pub fn params(&self) -> Vec<&str> {
        if self.data.is_empty() {
            return Vec::new();
        }
        if self.data.contains('\t') {
            self.data.split('\t').collect()
        } else {
            self.data.split(' ').collect()
        }
    }
}

/// Encode a command and its parameters into a newline-terminated line
pub fn encode<S: AsRef<str>>(command: &str, params: &[S]) -> Vec<u8> {
    let mut line = Message::prepare(command, params).to_line().into_bytes();
    line.push(b'\n');
    line
}

/// Decode one line (with or without its newline) into a message
pub fn decode(line: &str) -> Message {
    match line.find(' ') {
        // no params, a bare command like PONG
        None => Message::new(line.trim(), ""),
        Some(mark) => Message::new(&line[..mark], line[mark..].trim()),
    }
}
