//! Incremental fragment parser with in-place console rendering.

use std::io::Write;

use crate::line::{parse_result_line, TestLine};

const LINE_TERMINATOR: &str = "\n";

/// Consumes arbitrary text chunks and renders one status line per test.
///
/// Each rendered result overwrites the previous one using a carriage
/// return, so the console shows a single updating line.
pub struct LiveResultParser<W: Write> {
    out: W,
    buffer: String,
    last_rendered_len: usize,
    rendered: usize,
}

impl<W: Write> LiveResultParser<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            buffer: String::new(),
            last_rendered_len: 0,
            rendered: 0,
        }
    }

    /// Feed the next chunk of the stream.
    pub fn feed(&mut self, chunk: &str) {
        if !chunk.contains(LINE_TERMINATOR) {
            self.buffer.push_str(chunk);
            return;
        }

        let mut segments = chunk.split(LINE_TERMINATOR).peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                if segment.is_empty() {
                    // exactly terminated: whatever is buffered is a full line
                    self.flush_buffer();
                } else {
                    self.buffer.push_str(segment);
                }
                break;
            }
            self.buffer.push_str(segment);
            self.flush_buffer();
        }
    }

    /// Text held back waiting for a terminator.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Number of result lines rendered so far.
    pub fn rendered(&self) -> usize {
        self.rendered
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn flush_buffer(&mut self) {
        let line = std::mem::take(&mut self.buffer);
        self.process_line(line.trim_end_matches('\r'));
    }

    fn process_line(&mut self, line: &str) {
        match parse_result_line(line) {
            Ok(Some(test)) => {
                if let Err(e) = self.render(&test) {
                    tracing::debug!(error = %e, "failed to render live result");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, line, "dropping unparsable live result line");
            }
        }
    }

    fn render(&mut self, test: &TestLine) -> std::io::Result<()> {
        let text = test.render();
        if self.last_rendered_len != 0 {
            write!(self.out, "\r")?;
        }
        write!(self.out, "{}", text)?;
        let width = text.chars().count();
        if width < self.last_rendered_len {
            let pad = self.last_rendered_len - width;
            write!(self.out, "{}", " ".repeat(pad))?;
            write!(self.out, "{}", "\u{8}".repeat(pad))?;
        }
        self.out.flush()?;
        self.last_rendered_len = width;
        self.rendered += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(parser: &LiveResultParser<Vec<u8>>) -> String {
        String::from_utf8_lossy(parser.get_ref()).to_string()
    }

    #[test]
    fn test_split_element_renders_once() {
        let mut parser = LiveResultParser::new(Vec::new());
        parser.feed(r#"<test name="A" result="Pass""#);
        assert_eq!(parser.rendered(), 0);
        parser.feed("/>\n");
        assert_eq!(parser.rendered(), 1);
        assert_eq!(output(&parser), "[ OK ] A");
    }

    #[test]
    fn test_into_inner_returns_rendered_output() {
        let mut parser = LiveResultParser::new(Vec::new());
        parser.feed("<test name=\"B\" result=\"Skip\" />\n");
        let out = String::from_utf8(parser.into_inner()).unwrap();
        assert_eq!(out, "[SKIP] B");
    }

    #[test]
    fn test_pure_terminator_flushes_once() {
        let mut parser = LiveResultParser::new(Vec::new());
        parser.feed(r#"<test name="A" result="Fail" />"#);
        parser.feed("\n");
        assert_eq!(parser.rendered(), 1);
        assert_eq!(output(&parser), "[FAIL] A");
        assert_eq!(parser.pending(), "");
    }

    #[test]
    fn test_trailing_partial_is_retained() {
        let mut parser = LiveResultParser::new(Vec::new());
        parser.feed("<test name=\"A\" result=\"Pass\"/>\n<test name=\"B\"");
        assert_eq!(parser.rendered(), 1);
        assert_eq!(parser.pending(), "<test name=\"B\"");
        parser.feed(" result=\"Skip\"/>\n");
        assert_eq!(parser.rendered(), 2);
        assert_eq!(output(&parser), "[ OK ] A\r[SKIP] B");
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut parser = LiveResultParser::new(Vec::new());
        parser.feed(
            "starting\n<test name=\"One\" result=\"Pass\">\n<test name=\"Two\" result=\"weird\"/>\n",
        );
        assert_eq!(parser.rendered(), 2);
        assert_eq!(output(&parser), "[ OK ] One\r[????] Two");
    }

    #[test]
    fn test_shorter_line_clears_previous() {
        let mut parser = LiveResultParser::new(Vec::new());
        parser.feed("<test name=\"LongerName\" result=\"Pass\"/>\n");
        parser.feed("<test name=\"B\" result=\"Pass\"/>\n");
        let out = output(&parser);
        assert!(out.starts_with("[ OK ] LongerName\r[ OK ] B         "));
    }

    #[test]
    fn test_malformed_lines_swallowed() {
        let mut parser = LiveResultParser::new(Vec::new());
        parser.feed("<test name=\"A\" result=\"Pass\"/> junk <x/>\n");
        parser.feed("<test name\n");
        parser.feed("\r\n");
        assert_eq!(parser.rendered(), 0);
        assert_eq!(output(&parser), "");
    }

    #[test]
    fn test_crlf_terminated_lines() {
        let mut parser = LiveResultParser::new(Vec::new());
        parser.feed("<test name=\"A\" result=\"Pass\"/>\r\n");
        assert_eq!(output(&parser), "[ OK ] A");
    }
}
