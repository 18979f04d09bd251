use crate::types::SpectraResult;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Shared text sink for per-gate diagnostic dumps.
///
/// Several workers may hold clones of the same sink. Each block is written
/// under the lock so dumps from different workers never interleave.
#[derive(Clone)]
pub struct DiagnosticSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticSink").finish_non_exhaustive()
    }
}

impl DiagnosticSink {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }

    /// Write one complete block and flush it
    pub fn write_block(&self, block: &str) -> SpectraResult<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(block.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}
