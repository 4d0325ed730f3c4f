//! Provider table.
//!
//! A provider is a named kind of engine identified by a stable UUID. The
//! table always contains the fallback provider, so engine creation can
//! degrade instead of failing.

use anyhow::{bail, Result};
use uuid::Uuid;

use super::dummy::{DummyFactory, DUMMY_UUID};
use super::rawcode::RawCodeFactory;
use super::Engine;

/// Something that can create engine instances.
pub trait EngineFactory: std::fmt::Debug {
    /// Stable identity.
    fn uuid(&self) -> Uuid;

    /// Display name.
    fn name(&self) -> &str;

    /// Language tag.
    fn language(&self) -> &str;

    /// Icon path or name.
    fn icon(&self) -> &str {
        ""
    }

    /// Help text shown by the panel.
    fn help(&self) -> &str;

    /// Create an instance bound to `encoding`.
    ///
    /// # Errors
    ///
    /// Fails if the encoding is unsupported or the engine cannot start.
    fn create(&self, encoding: &str, id: u32) -> Result<Box<dyn Engine>>;
}

/// Registered providers, fallback first.
#[derive(Debug)]
pub struct ProviderTable {
    factories: Vec<Box<dyn EngineFactory>>,
}

impl Default for ProviderTable {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl ProviderTable {
    /// Table with only the fallback provider.
    pub fn fallback_only() -> Self {
        Self {
            factories: vec![Box::new(DummyFactory)],
        }
    }

    /// Table with the fallback and the raw code provider.
    pub fn with_builtin() -> Self {
        let mut table = Self::fallback_only();
        table.register(Box::new(RawCodeFactory));
        table
    }

    /// Add a provider. A provider with the same UUID is replaced.
    pub fn register(&mut self, factory: Box<dyn EngineFactory>) {
        let uuid = factory.uuid();
        self.factories.retain(|f| f.uuid() != uuid);
        log::debug!("[engine] registered provider {} ({uuid})", factory.name());
        self.factories.push(factory);
    }

    /// Look up a provider.
    pub fn get(&self, uuid: Uuid) -> Option<&dyn EngineFactory> {
        self.factories
            .iter()
            .find(|f| f.uuid() == uuid)
            .map(|f| &**f)
    }

    /// Every provider, fallback first.
    pub fn iter(&self) -> impl Iterator<Item = &dyn EngineFactory> {
        self.factories.iter().map(|f| &**f)
    }

    /// The configured provider if registered, else the first real one,
    /// else the fallback.
    pub fn default_provider(&self, configured: Option<Uuid>) -> Uuid {
        if let Some(uuid) = configured {
            if self.get(uuid).is_some() {
                return uuid;
            }
            log::warn!("[engine] configured provider {uuid} is not registered");
        }
        self.factories
            .iter()
            .map(|f| f.uuid())
            .find(|u| *u != DUMMY_UUID)
            .unwrap_or(DUMMY_UUID)
    }

    /// Instantiate `uuid`.
    ///
    /// # Errors
    ///
    /// Fails if the provider is unknown or its factory fails.
    pub fn create(&self, uuid: Uuid, encoding: &str, id: u32) -> Result<Box<dyn Engine>> {
        let Some(factory) = self.get(uuid) else {
            bail!("no provider {uuid}");
        };
        factory.create(encoding, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rawcode::RAWCODE_UUID;

    #[derive(Debug)]
    struct Broken;

    impl EngineFactory for Broken {
        fn uuid(&self) -> Uuid {
            Uuid::from_u128(42)
        }
        fn name(&self) -> &str {
            "broken"
        }
        fn language(&self) -> &str {
            "xx"
        }
        fn help(&self) -> &str {
            ""
        }
        fn create(&self, _encoding: &str, _id: u32) -> Result<Box<dyn Engine>> {
            bail!("cannot start")
        }
    }

    #[test]
    fn test_default_prefers_configured_then_first_real() {
        let mut table = ProviderTable::with_builtin();
        assert_eq!(table.default_provider(None), RAWCODE_UUID);
        assert_eq!(table.default_provider(Some(Uuid::from_u128(9))), RAWCODE_UUID);
        table.register(Box::new(Broken));
        assert_eq!(table.default_provider(Some(Uuid::from_u128(42))), Uuid::from_u128(42));
        assert_eq!(ProviderTable::fallback_only().default_provider(None), DUMMY_UUID);
    }

    #[test]
    fn test_create_reports_failures() {
        let mut table = ProviderTable::with_builtin();
        table.register(Box::new(Broken));
        assert!(table.create(Uuid::from_u128(42), "UTF-8", 0).is_err());
        assert!(table.create(Uuid::from_u128(7), "UTF-8", 0).is_err());
        assert!(table.create(DUMMY_UUID, "UTF-8", 0).is_ok());
    }

    #[test]
    fn test_register_replaces_same_uuid() {
        let mut table = ProviderTable::with_builtin();
        let before = table.iter().count();
        table.register(Box::new(RawCodeFactory));
        assert_eq!(table.iter().count(), before);
    }
}
