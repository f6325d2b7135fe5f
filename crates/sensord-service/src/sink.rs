//! JSON-lines event output.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use sensord_core::{EventSink, SinkError};
use sensord_types::Event;

/// Writes one [`EventRecord`](sensord_types::EventRecord) JSON object per
/// line.
///
/// A session truncates the file when started with `overwrite` and appends
/// otherwise. Every line is flushed as soon as it is written.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonLinesSink {
    /// Create a sink writing to `path`. The file is opened by `begin`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    /// Output file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonLinesSink {
    fn begin(&self, overwrite: bool) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if overwrite {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(&self.path)?;

        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(BufWriter::new(file));
        info!(path = %self.path.display(), overwrite, "Event output opened");
        Ok(())
    }

    fn submit(&self, event: Event) -> Result<(), SinkError> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = guard.as_mut().ok_or(SinkError::Closed)?;

        let line = serde_json::to_string(&event.to_record())
            .map_err(|e| SinkError::Serialize(e.to_string()))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn end(&self) {
        if let Some(mut writer) = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = writer.flush();
            debug!(path = %self.path.display(), "Event output closed");
        }
    }
}
