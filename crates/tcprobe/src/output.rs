use std::fmt;
use std::io::Write;

use tracing::warn;

/// Receives the `key value` diagnostic lines a probe produces, in order.
pub trait ProbeSink: Send {
    fn emit(&mut self, name: &str, value: &dyn fmt::Display);
}

impl ProbeSink for Vec<String> {
    fn emit(&mut self, name: &str, value: &dyn fmt::Display) {
        self.push(format!("{name} {value}"));
    }
}

impl ProbeSink for String {
    fn emit(&mut self, name: &str, value: &dyn fmt::Display) {
        use std::fmt::Write as _;
        let _ = writeln!(self, "{name} {value}");
    }
}

/// Writes each line straight to an `io::Write`, e.g. stdout
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ProbeSink for WriterSink<W> {
    fn emit(&mut self, name: &str, value: &dyn fmt::Display) {
        if let Err(e) = writeln!(self.writer, "{name} {value}") {
            warn!("Failed to write probe output {name}: {e}");
        }
    }
}
