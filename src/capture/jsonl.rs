use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use super::{CaptureSource, RawCaptureEvent};
use crate::error::{MetricsError, Result};

/// Un événement JSON par ligne
pub struct JsonLinesSource {
    lines: Lines<BufReader<File>>,
    path: String,
    line_number: u64,
}

impl JsonLinesSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            MetricsError::SourceUnavailable(format!("{}: {}", path.display(), e))
        })?;

        Ok(Self {
            lines: BufReader::new(file).lines(),
            path: path.display().to_string(),
            line_number: 0,
        })
    }
}

impl CaptureSource for JsonLinesSource {
    fn next_event(&mut self) -> Result<Option<RawCaptureEvent>> {
        loop {
            let line = match self.lines.next() {
                None => return Ok(None),
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    return Err(MetricsError::SourceUnavailable(format!(
                        "{} ligne {}: {}",
                        self.path,
                        self.line_number + 1,
                        e
                    )))
                }
            };
            self.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            // Une ligne illisible devient un événement sans couche : le
            // classifieur le rejettera sans interrompre le lot
            let event = serde_json::from_str::<RawCaptureEvent>(&line).unwrap_or_else(|e| {
                debug!("{} ligne {}: JSON invalide ({})", self.path, self.line_number, e);
                RawCaptureEvent::default()
            });
            return Ok(Some(event));
        }
    }

    fn describe(&self) -> String {
        format!("JSON lines {}", self.path)
    }
}
