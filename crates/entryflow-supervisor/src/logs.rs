//! Multiplexes every child's output into one tagged sink.
//!
//! Each captured stream gets its own drain task. Lines go through a single
//! channel to the sink task, which writes and flushes one line at a time so
//! output shows up as it is produced.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::event::{Stream, SupervisorEvent};
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub process: String,
    pub stream: Stream,
    pub line: String,
}

impl LogLine {
    /// Tagged form written to the sink.
    pub fn render(&self) -> String {
        match self.stream {
            Stream::Stdout => format!("[{}] {}", self.process, self.line),
            Stream::Stderr => format!("[{}:stderr] {}", self.process, self.line),
        }
    }
}

/// Handle used by drain tasks to reach the sink.
#[derive(Debug, Clone)]
pub struct LogSender(mpsc::UnboundedSender<LogLine>);

impl LogSender {
    /// Forwards `reader` line by line until it reaches end of file.
    pub fn drain<R>(&self, reader: R, process: &str, stream: Stream) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tx = self.0.clone();
        let process = process.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf)
                            .trim_end_matches(['\n', '\r'])
                            .to_string();
                        let sent = tx.send(LogLine {
                            process: process.clone(),
                            stream,
                            line,
                        });
                        if sent.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(process = %process, error = %e, "log stream read failed");
                        break;
                    }
                }
            }
        })
    }
}

/// Starts the sink task writing to `writer`.
///
/// The task ends once every [`LogSender`] clone has been dropped and the
/// remaining lines have been written.
pub fn spawn_sink<W>(mut writer: W, registry: Registry) -> (LogSender, JoinHandle<()>)
where
    W: Write + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();
    let handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let rendered = line.render();
            if let Err(e) = writeln!(writer, "{rendered}").and_then(|()| writer.flush()) {
                warn!(error = %e, "log sink write failed");
            }
            registry.emit(SupervisorEvent::Log {
                process: line.process,
                stream: line.stream,
                line: line.line,
            });
        }
    });
    (LogSender(tx), handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory sink shared with the test body.
    #[derive(Debug, Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn tags_lines_by_process_and_stream() {
        let buf = SharedBuf::default();
        let registry = Registry::new(16);
        let (tx, sink) = spawn_sink(buf.clone(), registry);

        let out = tx.drain(&b"first\nsecond\npartial"[..], "web", Stream::Stdout);
        let err = tx.drain(&b"oops\r\n"[..], "celery", Stream::Stderr);
        out.await.unwrap();
        err.await.unwrap();
        drop(tx);
        sink.await.unwrap();

        let text = buf.contents();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines.contains(&"[web] first"));
        assert!(lines.contains(&"[web] partial"));
        assert!(lines.contains(&"[celery:stderr] oops"));
        let first = lines.iter().position(|l| *l == "[web] first").unwrap();
        let second = lines.iter().position(|l| *l == "[web] second").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn sink_rebroadcasts_log_events() {
        let registry = Registry::new(16);
        let mut events = registry.subscribe();
        let (tx, sink) = spawn_sink(std::io::sink(), registry);

        tx.drain(&b"ready\n"[..], "web", Stream::Stdout).await.unwrap();
        drop(tx);
        sink.await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            SupervisorEvent::Log {
                process: "web".to_string(),
                stream: Stream::Stdout,
                line: "ready".to_string(),
            }
        );
    }
}
