use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing_subscriber::fmt::MakeWriter;

/// The one place text leaves the process.
///
/// Console replies and log lines both lock the same writer, so a line is
/// always written whole.
#[derive(Clone)]
pub struct OutputSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl OutputSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `text` followed by a newline. Output errors are ignored.
    pub fn print(&self, text: &str) {
        let mut out = self.lock();
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }
}

/// Exclusive handle for one log record.
pub struct LockedOutput<'a>(MutexGuard<'a, Box<dyn Write + Send>>);

impl Write for LockedOutput<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for OutputSink {
    type Writer = LockedOutput<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LockedOutput(self.lock())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// In-memory writer shared with the test.
    #[derive(Clone, Default)]
    pub(crate) struct Captured(pub Arc<Mutex<Vec<u8>>>);

    impl Captured {
        pub(crate) fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn replies_and_logs_share_the_writer() {
        let captured = Captured::default();
        let sink = OutputSink::new(captured.clone());
        sink.print("Queued show Start 0");
        {
            let mut w = sink.make_writer();
            w.write_all(b"INFO log line\n").unwrap();
        }
        sink.print("done");
        assert_eq!(captured.text(), "Queued show Start 0\nINFO log line\ndone\n");
    }
}
