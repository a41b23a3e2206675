//! Writer downgrading newest-major messages to a connector's version

use crate::codec::ErasedSerializer;
use crate::factory::VersionedMigrator;
use crate::models::{AirbyteMessage, ConfiguredAirbyteCatalog};
use crate::{Error, Result};
use std::io::Write;
use std::sync::Arc;

/// One JSON object per line, in the target major's representation
pub struct VersionedMessageWriter<W: Write> {
    output: Option<W>,
    serializer: Arc<dyn ErasedSerializer>,
    migrator: VersionedMigrator,
    catalog: Option<ConfiguredAirbyteCatalog>,
}

impl<W: Write> VersionedMessageWriter<W> {
    pub fn new(
        output: W,
        serializer: Arc<dyn ErasedSerializer>,
        migrator: VersionedMigrator,
        catalog: Option<ConfiguredAirbyteCatalog>,
    ) -> Self {
        Self {
            output: Some(output),
            serializer,
            migrator,
            catalog,
        }
    }

    pub fn write(&mut self, message: AirbyteMessage) -> Result<()> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| Error::Io(std::io::Error::other("message writer is closed")))?;
        let downgraded = self.migrator.downgrade(message, self.catalog.as_ref())?;
        let line = self.serializer.serialize_any(&*downgraded)?;
        output.write_all(line.as_bytes())?;
        output.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(output) = self.output.as_mut() {
            output.flush()?;
        }
        Ok(())
    }

    /// Flush and drop the underlying output. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut output) = self.output.take() {
            output.flush()?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.output.is_none()
    }
}
