//! Migration chain integration tests
//!
//! Covers chains built from public edges: round-trips across every
//! intermediate major, registration collisions and unsupported versions.

use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use synclane_protocol::migration::{MessageMigration, Migration};
use synclane_protocol::models::{ConfiguredAirbyteCatalog, v0};
use synclane_protocol::{AirbyteMessage, AirbyteMessageMigrator, Error, Result, Version};

/// Message whose payload lives under a field named after its major
#[derive(Debug, Clone, PartialEq)]
struct Versioned {
    fields: BTreeMap<String, String>,
}

impl Versioned {
    fn at(major: u64, payload: &str) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(format!("v{major}"), payload.to_string());
        Self { fields }
    }
}

struct RenameField {
    previous: Version,
    current: Version,
}

impl RenameField {
    fn new(major: u64) -> Self {
        Self {
            previous: Version::new(major, 0, 0),
            current: Version::new(major + 1, 0, 0),
        }
    }

    fn rename(message: Versioned, from: u64, to: u64) -> Result<Versioned> {
        let mut message = message;
        let payload = message
            .fields
            .remove(&format!("v{from}"))
            .ok_or_else(|| Error::migration(format!("missing field v{from}")))?;
        message.fields.insert(format!("v{to}"), payload);
        Ok(message)
    }
}

impl Migration for RenameField {
    fn previous_version(&self) -> &Version {
        &self.previous
    }

    fn current_version(&self) -> &Version {
        &self.current
    }
}

impl MessageMigration for RenameField {
    type Previous = Versioned;
    type Current = Versioned;

    fn upgrade(&self, m: Versioned, _: Option<&ConfiguredAirbyteCatalog>) -> Result<Versioned> {
        Self::rename(m, self.previous.major(), self.current.major())
    }

    fn downgrade(&self, m: Versioned, _: Option<&ConfiguredAirbyteCatalog>) -> Result<Versioned> {
        Self::rename(m, self.current.major(), self.previous.major())
    }
}

fn chain(majors: u64) -> AirbyteMessageMigrator {
    let mut migrator = AirbyteMessageMigrator::new();
    for major in 0..majors {
        migrator.register(RenameField::new(major)).unwrap();
    }
    migrator.initialize().unwrap();
    migrator
}

proptest! {
    /// Upgrading from major 0 then downgrading to major k keeps the payload under field k
    #[test]
    fn prop_round_trip_to_every_major(majors in 1u64..6, payload in "[a-z0-9]{1,12}") {
        let migrator = chain(majors);
        let upgraded: Versioned = migrator
            .upgrade(Versioned::at(0, &payload), &Version::new(0, 0, 0), None)
            .unwrap();
        prop_assert_eq!(&upgraded, &Versioned::at(majors, &payload));

        for k in 0..=majors {
            let downgraded: Versioned = migrator
                .downgrade(upgraded.clone(), &Version::new(k, 0, 0), None)
                .unwrap();
            prop_assert_eq!(downgraded, Versioned::at(k, &payload));
        }
    }

    /// Registration order never changes the resulting keys
    #[test]
    fn prop_keys_exclude_newest(majors in 1u64..8) {
        let mut migrator = AirbyteMessageMigrator::new();
        for major in (0..majors).rev() {
            migrator.register(RenameField::new(major)).unwrap();
        }
        migrator.initialize().unwrap();
        let expected: Vec<String> = (0..majors).map(|m| m.to_string()).collect();
        prop_assert_eq!(migrator.migration_keys().unwrap(), expected);
        prop_assert_eq!(migrator.most_recent_version().unwrap().major(), majors);
    }
}

/// Two edges starting from the same major are a configuration error
#[test]
fn test_duplicate_edges_fail_initialize() {
    let mut migrator = AirbyteMessageMigrator::new();
    migrator.register(RenameField::new(0)).unwrap();
    migrator.register(RenameField::new(0)).unwrap();
    let err = migrator.initialize().unwrap_err();
    assert!(matches!(err, Error::RegistrationCollision { .. }));
}

/// Walking past the registered chain fails without a partial result
#[test]
fn test_unregistered_major_is_unsupported() {
    let migrator = chain(2);
    let result: Result<Versioned> =
        migrator.upgrade(Versioned::at(5, "x"), &Version::new(5, 0, 0), None);
    assert!(matches!(result, Err(Error::UnsupportedVersion(_))));

    let result: Result<Versioned> =
        migrator.downgrade(Versioned::at(2, "x"), &Version::new(7, 0, 0), None);
    assert!(matches!(result, Err(Error::UnsupportedVersion(_))));
}

/// The shipped V0 to V1 edge through the public chain API
#[test]
fn test_standard_chain_upgrades_records() {
    let mut migrator = AirbyteMessageMigrator::new();
    migrator
        .register(synclane_protocol::migration::v1::AirbyteMessageMigrationV1::new())
        .unwrap();
    migrator.initialize().unwrap();
    assert_eq!(migrator.migration_keys().unwrap(), vec!["0"]);

    let legacy = v0::AirbyteMessage(AirbyteMessage::record("s", None, json!({"price": 9.5})));
    let current: AirbyteMessage = migrator
        .upgrade(legacy, &Version::new(0, 3, 0), None)
        .unwrap();
    assert_eq!(current.record.unwrap().data, json!({"price": "9.5"}));
}
