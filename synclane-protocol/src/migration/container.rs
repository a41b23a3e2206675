//! Ordered chain of migration edges

use super::{AnyValue, ErasedMigration};
use crate::models::ConfiguredAirbyteCatalog;
use crate::{Error, Result, Version};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A chain of edges keyed by the major each edge starts from
///
/// Edges are collected with [`register`](Self::register) and validated once by
/// [`initialize`](Self::initialize). The newest major is the one no edge
/// starts from. Queries before initialization fail.
pub struct MigrationContainer {
    kind: &'static str,
    pending: Vec<Box<dyn ErasedMigration>>,
    by_previous: BTreeMap<u64, Box<dyn ErasedMigration>>,
    previous_by_current: HashMap<u64, u64>,
    most_recent: Option<Version>,
    initialized: bool,
}

impl MigrationContainer {
    /// Create an empty container; `kind` names it in errors and logs
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            pending: Vec::new(),
            by_previous: BTreeMap::new(),
            previous_by_current: HashMap::new(),
            most_recent: None,
            initialized: false,
        }
    }

    pub(crate) fn register(&mut self, edge: Box<dyn ErasedMigration>) -> Result<()> {
        if self.initialized {
            return Err(Error::invalid_chain(format!(
                "{}: cannot register {} -> {} after initialize()",
                self.kind,
                edge.previous_version(),
                edge.current_version()
            )));
        }
        self.pending.push(edge);
        Ok(())
    }

    /// Build the chain from the registered edges. Calling it again is a no-op.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        if self.pending.is_empty() {
            return Err(Error::invalid_chain(format!("{}: no migrations registered", self.kind)));
        }

        let mut by_previous = BTreeMap::new();
        let mut previous_by_current = HashMap::new();
        for edge in self.pending.drain(..) {
            let previous = edge.previous_version().major();
            let current = edge.current_version().major();
            if current != previous + 1 {
                return Err(Error::invalid_chain(format!(
                    "{}: edge {} -> {} does not join adjacent majors",
                    self.kind,
                    edge.previous_version(),
                    edge.current_version()
                )));
            }
            if by_previous.contains_key(&previous) {
                return Err(Error::collision(self.kind, previous.to_string()));
            }
            previous_by_current.insert(current, previous);
            by_previous.insert(previous, edge);
        }

        // Gaps are allowed; a walk across one fails at the missing edge
        let majors: Vec<u64> = by_previous.keys().copied().collect();

        let most_recent = by_previous
            .values()
            .next_back()
            .map(|edge| edge.current_version().clone());

        debug!(
            kind = self.kind,
            majors = ?majors,
            most_recent = ?most_recent.as_ref().map(ToString::to_string),
            "migration chain initialized"
        );

        self.by_previous = by_previous;
        self.previous_by_current = previous_by_current;
        self.most_recent = most_recent;
        self.initialized = true;
        Ok(())
    }

    /// Newest version reachable through the chain
    pub fn most_recent_version(&self) -> Result<&Version> {
        self.ensure_initialized()?;
        self.most_recent
            .as_ref()
            .ok_or(Error::NotInitialized(self.kind))
    }

    /// Majors (as strings) that have an outgoing edge; the newest is never included
    pub fn migration_keys(&self) -> Result<Vec<String>> {
        self.ensure_initialized()?;
        Ok(self.by_previous.keys().map(u64::to_string).collect())
    }

    /// Walk `value` from `from` up to the newest major
    pub fn upgrade(
        &self,
        value: AnyValue,
        from: &Version,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<AnyValue> {
        let newest = self.most_recent_version()?.major();
        if from.is_unspecified() {
            return Err(Error::unsupported(format!("{}: {}", self.kind, from)));
        }

        let mut value = value;
        let mut major = from.major();
        while major != newest {
            let edge = self.by_previous.get(&major).ok_or_else(|| {
                Error::unsupported(format!(
                    "{}: cannot upgrade from {} (no migration starts at major {})",
                    self.kind, from, major
                ))
            })?;
            value = edge.upgrade_any(value, catalog)?;
            major = edge.current_version().major();
        }
        Ok(value)
    }

    /// Walk `value` from the newest major down to `to`
    pub fn downgrade(
        &self,
        value: AnyValue,
        to: &Version,
        catalog: Option<&ConfiguredAirbyteCatalog>,
    ) -> Result<AnyValue> {
        let newest = self.most_recent_version()?.major();
        let target = to.major();
        if to.is_unspecified() || target > newest || !self.reaches(target, newest) {
            return Err(Error::unsupported(format!(
                "{}: cannot downgrade to {}",
                self.kind, to
            )));
        }

        let mut value = value;
        let mut major = newest;
        while major != target {
            let previous = self.previous_by_current.get(&major).copied().ok_or_else(|| {
                Error::unsupported(format!("{}: no migration ends at major {}", self.kind, major))
            })?;
            let edge = self
                .by_previous
                .get(&previous)
                .ok_or_else(|| Error::unsupported(format!("{}: major {}", self.kind, previous)))?;
            value = edge.downgrade_any(value, catalog)?;
            major = previous;
        }
        Ok(value)
    }

    fn reaches(&self, target: u64, newest: u64) -> bool {
        target == newest || self.by_previous.contains_key(&target)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized(self.kind))
        }
    }
}

impl std::fmt::Debug for MigrationContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationContainer")
            .field("kind", &self.kind)
            .field("majors", &self.by_previous.keys().collect::<Vec<_>>())
            .field("most_recent", &self.most_recent)
            .field("initialized", &self.initialized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{MessageEdge, MessageMigration, Migration, downcast};

    /// Test payload recording every upgrade step it went through
    #[derive(Debug, Clone, PartialEq)]
    struct Tagged {
        major: u64,
        trail: Vec<String>,
    }

    struct Step {
        previous: Version,
        current: Version,
    }

    impl Step {
        fn new(previous: u64, current: u64) -> Self {
            Self {
                previous: Version::new(previous, 0, 0),
                current: Version::new(current, 0, 0),
            }
        }
    }

    impl Migration for Step {
        fn previous_version(&self) -> &Version {
            &self.previous
        }
        fn current_version(&self) -> &Version {
            &self.current
        }
    }

    impl MessageMigration for Step {
        type Previous = Tagged;
        type Current = Tagged;

        fn upgrade(&self, mut m: Tagged, _: Option<&ConfiguredAirbyteCatalog>) -> Result<Tagged> {
            m.major = self.current.major();
            m.trail.push(format!("up{}", m.major));
            Ok(m)
        }

        fn downgrade(&self, mut m: Tagged, _: Option<&ConfiguredAirbyteCatalog>) -> Result<Tagged> {
            m.major = self.previous.major();
            m.trail.pop();
            Ok(m)
        }
    }

    fn container(edges: &[(u64, u64)]) -> MigrationContainer {
        let mut c = MigrationContainer::new("test migration");
        for (p, n) in edges {
            c.register(Box::new(MessageEdge(Step::new(*p, *n)))).unwrap();
        }
        c
    }

    #[test]
    fn test_query_before_initialize_fails() {
        let c = container(&[(0, 1)]);
        assert!(matches!(c.most_recent_version(), Err(Error::NotInitialized(_))));
        assert!(c.migration_keys().is_err());
    }

    #[test]
    fn test_keys_exclude_newest_major() {
        let mut c = container(&[(1, 2), (0, 1)]);
        c.initialize().unwrap();
        c.initialize().unwrap();
        assert_eq!(c.migration_keys().unwrap(), vec!["0", "1"]);
        assert_eq!(c.most_recent_version().unwrap(), &Version::new(2, 0, 0));
    }

    #[test]
    fn test_duplicate_previous_major_collides() {
        let mut c = container(&[(0, 1), (0, 1)]);
        let err = c.initialize().unwrap_err();
        assert!(matches!(err, Error::RegistrationCollision { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_non_adjacent_edge_rejected() {
        let mut skip = container(&[(0, 2)]);
        assert!(matches!(skip.initialize(), Err(Error::InvalidChain(_))));
    }

    #[test]
    fn test_gap_is_allowed_but_not_crossable() {
        let mut c = container(&[(0, 1), (2, 3)]);
        c.initialize().unwrap();
        assert_eq!(c.migration_keys().unwrap(), vec!["0", "2"]);
        assert_eq!(c.most_recent_version().unwrap(), &Version::new(3, 0, 0));

        let tagged = |major| {
            Box::new(Tagged {
                major,
                trail: vec![],
            }) as AnyValue
        };
        let out: Tagged = downcast(c.upgrade(tagged(2), &Version::new(2, 0, 0), None).unwrap()).unwrap();
        assert_eq!(out.major, 3);
        assert!(matches!(
            c.upgrade(tagged(0), &Version::new(0, 0, 0), None),
            Err(Error::UnsupportedVersion(_))
        ));
        assert!(matches!(
            c.downgrade(tagged(3), &Version::new(0, 0, 0), None),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_upgrade_walks_every_edge() {
        let mut c = container(&[(0, 1), (1, 2)]);
        c.initialize().unwrap();
        let tagged = Tagged {
            major: 0,
            trail: vec![],
        };
        let out: Tagged =
            downcast(c.upgrade(Box::new(tagged), &Version::new(0, 4, 1), None).unwrap()).unwrap();
        assert_eq!(out.major, 2);
        assert_eq!(out.trail, vec!["up1", "up2"]);
    }

    #[test]
    fn test_upgrade_from_newest_is_identity() {
        let mut c = container(&[(0, 1)]);
        c.initialize().unwrap();
        let tagged = Tagged {
            major: 1,
            trail: vec!["x".into()],
        };
        let out: Tagged = downcast(
            c.upgrade(Box::new(tagged.clone()), &Version::new(1, 3, 0), None)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(out, tagged);
    }

    #[test]
    fn test_unsupported_versions() {
        let mut c = container(&[(1, 2)]);
        c.initialize().unwrap();
        let tagged = || {
            Box::new(Tagged {
                major: 0,
                trail: vec![],
            }) as AnyValue
        };
        assert!(matches!(
            c.upgrade(tagged(), &Version::new(0, 1, 0), None),
            Err(Error::UnsupportedVersion(_))
        ));
        assert!(matches!(
            c.upgrade(tagged(), &Version::new(5, 0, 0), None),
            Err(Error::UnsupportedVersion(_))
        ));
        assert!(matches!(
            c.downgrade(tagged(), &Version::new(0, 0, 0), None),
            Err(Error::UnsupportedVersion(_))
        ));
        assert!(matches!(
            c.downgrade(tagged(), &Version::new(3, 0, 0), None),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_wrong_type_reports_mismatch() {
        let mut c = container(&[(0, 1)]);
        c.initialize().unwrap();
        let err = c
            .upgrade(Box::new("not a tagged"), &Version::new(0, 0, 0), None)
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_register_after_initialize_rejected() {
        let mut c = container(&[(0, 1)]);
        c.initialize().unwrap();
        assert!(c.register(Box::new(MessageEdge(Step::new(1, 2)))).is_err());
    }
}
