//! Synclane connector protocol
//!
//! Versioned message models, the migration chain between protocol majors,
//! per-major serdes and the reader/writer pair that lets a source and a
//! destination speak different majors.
//!
//! # Example
//!
//! ```no_run
//! use synclane_protocol::{ProtocolRegistry, Version};
//! use std::io::BufReader;
//!
//! # fn main() -> synclane_protocol::Result<()> {
//! let registry = ProtocolRegistry::standard()?;
//! let stdin = BufReader::new(std::io::stdin());
//! for message in registry.reader(stdin, &Version::new(0, 3, 0), None) {
//!     println!("{:?}", message?.message_type);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod factory;
pub mod migration;
pub mod models;
pub mod reader;
pub mod registry;
pub mod validation;
pub mod version;
pub mod writer;

pub use codec::SerDeProvider;
pub use error::{Error, Result};
pub use factory::{VersionedMigrator, VersionedMigratorFactory};
pub use migration::{AirbyteMessageMigrator, ConfiguredAirbyteCatalogMigrator, MigrationContainer};
pub use models::{
    AirbyteMessage, AirbyteMessageType, AirbyteStateMessage, AirbyteStreamNameNamespacePair,
    ConfiguredAirbyteCatalog, StreamDescriptor,
};
pub use reader::VersionedMessageReader;
pub use registry::ProtocolRegistry;
pub use validation::{JsonSchemaProtocolValidator, ProtocolValidator};
pub use version::Version;
pub use writer::VersionedMessageWriter;
