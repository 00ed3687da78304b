//! Progress bars that share the terminal with log output.
//!
//! Every bar is registered on one `MultiProgress`; log lines are routed
//! through it so they print above the bars instead of tearing them.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

/// Bar counting emails through a batch operation
pub fn email_progress_bar(len: u64, action: &str) -> ProgressBar {
    let pb = multi_progress().add(ProgressBar::new(len));
    let style = ProgressStyle::with_template("{msg} [{bar:30.cyan/blue}] {pos}/{len} emails ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);
    pb.set_message(action.to_string());
    pb
}

/// Hidden bar for library callers and tests
pub fn hidden_progress_bar() -> ProgressBar {
    ProgressBar::hidden()
}

fn print_line(line: &str) {
    let _ = multi_progress().println(line.to_string());
}

/// `MakeWriter` that sends formatted log lines through the progress display
#[derive(Default, Clone)]
pub struct LogWriterFactory;

pub struct LogWriter {
    buffer: String,
}

impl LogWriter {
    fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.push_str(&String::from_utf8_lossy(buf));

        while let Some(idx) = self.buffer.find('\n') {
            print_line(self.buffer[..idx].trim_end_matches('\r'));
            self.buffer.drain(..idx + 1);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            print_line(line.trim_end_matches(['\n', '\r']));
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_consumes_complete_lines() {
        let mut writer = LogWriter::new();
        writer.write_all(b"first line\nsecond ").unwrap();
        assert_eq!(writer.buffer, "second ");
        writer.write_all(b"half\r\n").unwrap();
        assert!(writer.buffer.is_empty());
    }
}
