//! Stream draining for captured process output

use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use smol::Task;
use tracing::Level;

/// Reads one output stream to completion on a detached task.
///
/// Each line is logged at the configured level, tagged with the label, and
/// appended byte-for-byte to the captured buffer, so the final text is
/// exactly what the stream produced, trailing newlines included. The stream
/// handle is closed when the task finishes, not by the caller.
///
/// Draining starts at construction and proceeds independently of the caller;
/// a process writing more than the pipe buffer holds can therefore never
/// stall behind the caller's wait.
pub struct StreamDrainer {
    task: Option<Task<String>>,
    output: Option<String>,
}

impl StreamDrainer {
    /// Start draining `stream`, logging each line at `level` under `label`.
    pub fn spawn<R>(stream: R, level: Level, label: String) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let task = smol::spawn(async move {
            let mut reader = BufReader::new(stream);
            let mut captured = Vec::new();
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        captured.extend_from_slice(&line);
                        log_line(level, &label, &line);
                    }
                    Err(err) => {
                        tracing::debug!("{}: read failed: {}", label, err);
                        break;
                    }
                }
            }
            String::from_utf8_lossy(&captured).into_owned()
        });
        Self {
            task: Some(task),
            output: None,
        }
    }

    /// Block until the stream has been drained and return the captured text.
    ///
    /// Never returns partial text: the first call waits for the drain task's
    /// terminal read, and every later call returns the same value.
    pub async fn wait_for_output(&mut self) -> String {
        if let Some(task) = self.task.take() {
            self.output = Some(task.await);
        }
        self.output.clone().unwrap_or_default()
    }
}

fn log_line(level: Level, label: &str, raw: &[u8]) {
    let line = String::from_utf8_lossy(raw);
    let line: &str = line.strip_suffix('\n').unwrap_or(&line);
    if level == Level::ERROR {
        tracing::error!("{}: {}", label, line);
    } else if level == Level::WARN {
        tracing::warn!("{}: {}", label, line);
    } else if level == Level::INFO {
        tracing::info!("{}: {}", label, line);
    } else if level == Level::DEBUG {
        tracing::debug!("{}: {}", label, line);
    } else {
        tracing::trace!("{}: {}", label, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::io::Cursor;

    fn drain(bytes: &[u8]) -> StreamDrainer {
        let stream = Cursor::new(bytes.to_vec());
        StreamDrainer::spawn(stream, Level::TRACE, "[test]".to_string())
    }

    #[smol_potat::test]
    async fn captured_text_is_byte_exact() {
        let mut drainer = drain(b"one\ntwo\nno newline");
        assert_eq!(drainer.wait_for_output().await, "one\ntwo\nno newline");
    }

    #[smol_potat::test]
    async fn empty_stream_yields_empty_text() {
        let mut drainer = drain(b"");
        assert_eq!(drainer.wait_for_output().await, "");
    }

    #[smol_potat::test]
    async fn repeated_waits_return_the_same_text() {
        let mut drainer = drain(b"line\n");
        assert_eq!(drainer.wait_for_output().await, "line\n");
        assert_eq!(drainer.wait_for_output().await, "line\n");
    }
}
