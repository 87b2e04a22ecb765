use std::io::{self, Write};

use serde::Serialize;

use crate::app::HarvestResult;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_result(result: &HarvestResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, event: crate::app::ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::trace!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::trace!("{}", event.message),
        }
    }
}
