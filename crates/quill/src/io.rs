//! Input/output abstraction for the `IN` and `OUT` opcodes.

use std::collections::VecDeque;
use std::io::BufRead;

/// Maximum length of a single input token, in bytes. Longer runs of
/// non-whitespace are served in chunks of this size, the remainder left
/// for the next read.
pub const MAX_TOKEN_LEN: usize = 1023;

/// Backend for the two IO opcodes.
///
/// `IN` pulls one whitespace-delimited token; `OUT` writes one line.
/// Implement this to redirect or capture script IO; [`StdIo`] is the
/// default backed by the process's standard streams.
pub trait VmIo {
    /// Returns the next input token, or `None` when no token can be
    /// obtained (end of input or read failure).
    fn read_token(&mut self) -> Option<String>;

    /// Writes one line of output (without the trailing newline).
    fn write_line(&mut self, line: &str);
}

/// Splits `line` into whitespace-delimited tokens, chunking any token
/// longer than [`MAX_TOKEN_LEN`].
fn split_tokens(line: &str, out: &mut VecDeque<String>) {
    for token in line.split_whitespace() {
        let mut rest = token;
        while rest.len() > MAX_TOKEN_LEN {
            let mut cut = MAX_TOKEN_LEN;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            let (head, tail) = rest.split_at(cut);
            out.push_back(head.to_owned());
            rest = tail;
        }
        out.push_back(rest.to_owned());
    }
}

/// IO backed by stdin/stdout.
#[derive(Debug, Default)]
pub struct StdIo {
    pending: VecDeque<String>,
}

impl StdIo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VmIo for StdIo {
    fn read_token(&mut self) -> Option<String> {
        while self.pending.is_empty() {
            let mut line = String::new();
            let read = std::io::stdin().lock().read_line(&mut line).ok()?;
            if read == 0 {
                return None;
            }
            split_tokens(&line, &mut self.pending);
        }
        self.pending.pop_front()
    }

    fn write_line(&mut self, line: &str) {
        println!("{line}");
    }
}

/// IO over in-memory buffers, for tests and embedding.
///
/// Input tokens are pre-split from the string given to [`BufferedIo::new`];
/// output lines are collected into a string.
#[derive(Debug, Default)]
pub struct BufferedIo {
    tokens: VecDeque<String>,
    output: String,
}

impl BufferedIo {
    /// Creates buffered IO whose `IN` opcode will serve the
    /// whitespace-delimited tokens of `input`.
    #[must_use]
    pub fn new(input: &str) -> Self {
        let mut tokens = VecDeque::new();
        split_tokens(input, &mut tokens);
        Self {
            tokens,
            output: String::new(),
        }
    }

    /// Everything written so far, newline-terminated per line.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Consumes the IO and returns the collected output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.output
    }
}

impl VmIo for BufferedIo {
    fn read_token(&mut self) -> Option<String> {
        self.tokens.pop_front()
    }

    fn write_line(&mut self, line: &str) {
        self.output.push_str(line);
        self.output.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_split_on_any_whitespace() {
        let mut io = BufferedIo::new("  one\ttwo\nthree  ");
        assert_eq!(io.read_token().as_deref(), Some("one"));
        assert_eq!(io.read_token().as_deref(), Some("two"));
        assert_eq!(io.read_token().as_deref(), Some("three"));
        assert_eq!(io.read_token(), None);
    }

    #[test]
    fn oversized_tokens_are_chunked() {
        let long = "x".repeat(MAX_TOKEN_LEN + 5);
        let mut io = BufferedIo::new(&long);
        assert_eq!(io.read_token().map(|t| t.len()), Some(MAX_TOKEN_LEN));
        assert_eq!(io.read_token().map(|t| t.len()), Some(5));
        assert_eq!(io.read_token(), None);
    }

    #[test]
    fn output_lines_are_newline_terminated() {
        let mut io = BufferedIo::new("");
        io.write_line("a");
        io.write_line("b");
        assert_eq!(io.output(), "a\nb\n");
    }
}
