//! Routes `tracing` events to the Extism host log.

use std::io;

use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;

struct HostLog;

/// Buffers one formatted event and hands it to the host when dropped.
struct HostLine {
    level: Level,
    buf: Vec<u8>,
}

impl io::Write for HostLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for HostLine {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        let line = text.trim_end();
        if line.is_empty() {
            return;
        }
        match self.level {
            Level::ERROR => extism_pdk::error!("{}", line),
            Level::WARN => extism_pdk::warn!("{}", line),
            Level::INFO => extism_pdk::info!("{}", line),
            _ => extism_pdk::debug!("{}", line),
        }
    }
}

impl<'a> MakeWriter<'a> for HostLog {
    type Writer = HostLine;

    fn make_writer(&'a self) -> Self::Writer {
        HostLine {
            level: Level::INFO,
            buf: Vec::new(),
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        HostLine {
            level: *meta.level(),
            buf: Vec::new(),
        }
    }
}

/// Install the host log subscriber. Later calls are no-ops.
pub fn init() {
    // No clock inside the sandbox; the host stamps its own log lines.
    let _ = tracing_subscriber::fmt()
        .with_writer(HostLog)
        .with_max_level(Level::DEBUG)
        .without_time()
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
