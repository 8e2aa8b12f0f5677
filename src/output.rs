//! Printing delivered log lines

use std::io::{self, Write};

use runlog_protocol::ops::FetchLogsResponse;

use crate::client::ResumeMode;

/// Writes delivered log lines, one per line, flushing after each response
///
/// Snapshot responses repeat every earlier line, so in that mode only lines
/// beyond those already printed are written.
pub struct LogPrinter<W: Write> {
    out: W,
    printed: usize,
}

impl<W: Write> LogPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out, printed: 0 }
    }

    /// Print `response`, returning the number of lines written
    pub fn print(&mut self, response: &FetchLogsResponse, mode: Option<ResumeMode>) -> io::Result<usize> {
        let lines = match mode {
            Some(ResumeMode::Snapshot) => {
                // A shorter snapshot means the log was replaced; start over
                if response.log_lines.len() < self.printed {
                    self.printed = 0;
                }
                &response.log_lines[self.printed..]
            }
            _ => &response.log_lines[..],
        };

        for line in lines {
            writeln!(self.out, "{}", line)?;
        }
        self.out.flush()?;

        self.printed += lines.len();
        Ok(lines.len())
    }

    pub fn printed(&self) -> usize {
        self.printed
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runlog_protocol::RunId;

    fn response(lines: &[&str]) -> FetchLogsResponse {
        FetchLogsResponse {
            run_id: RunId::try_from(1u64).unwrap(),
            log_lines: lines.iter().map(|l| l.to_string()).collect(),
            next_cursor: None,
            has_more: false,
        }
    }

    #[test]
    fn test_cursor_mode_prints_everything() {
        let mut printer = LogPrinter::new(Vec::new());
        printer.print(&response(&["a", "b"]), Some(ResumeMode::Cursor)).unwrap();
        printer.print(&response(&["c"]), Some(ResumeMode::Cursor)).unwrap();

        assert_eq!(String::from_utf8(printer.into_inner()).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn test_snapshot_mode_prints_only_new_lines() {
        let mut printer = LogPrinter::new(Vec::new());
        assert_eq!(printer.print(&response(&["a"]), Some(ResumeMode::Snapshot)).unwrap(), 1);
        assert_eq!(printer.print(&response(&["a"]), Some(ResumeMode::Snapshot)).unwrap(), 0);
        assert_eq!(printer.print(&response(&["a", "b", "c"]), Some(ResumeMode::Snapshot)).unwrap(), 2);

        assert_eq!(printer.printed(), 3);
        assert_eq!(String::from_utf8(printer.into_inner()).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn test_shrunken_snapshot_restarts() {
        let mut printer = LogPrinter::new(Vec::new());
        printer.print(&response(&["a", "b"]), Some(ResumeMode::Snapshot)).unwrap();
        printer.print(&response(&["x"]), Some(ResumeMode::Snapshot)).unwrap();

        assert_eq!(String::from_utf8(printer.into_inner()).unwrap(), "a\nb\nx\n");
    }
}
