//! Fallback provider.
//!
//! Used when no provider is configured or when creating the requested one
//! fails. Every key passes through to the client untouched.

use anyhow::Result;
use uuid::Uuid;

use super::provider::EngineFactory;
use super::{Engine, EngineHost, KeyEvent};

/// Identity of the fallback provider.
pub const DUMMY_UUID: Uuid = Uuid::from_u128(0x6c2b_0f8e_43a1_4c5d_9b7e_2f1d_0a3c_5e71);

/// Engine that consumes nothing.
#[derive(Debug, Default)]
pub struct DummyEngine;

impl Engine for DummyEngine {
    fn focus_in(&mut self, _host: &mut dyn EngineHost) {}

    fn focus_out(&mut self, _host: &mut dyn EngineHost) {}

    fn reset(&mut self, _host: &mut dyn EngineHost) {}

    fn process_key_event(&mut self, _key: &KeyEvent, _host: &mut dyn EngineHost) -> bool {
        false
    }
}

/// Factory for [`DummyEngine`].
#[derive(Debug, Default)]
pub struct DummyFactory;

impl EngineFactory for DummyFactory {
    fn uuid(&self) -> Uuid {
        DUMMY_UUID
    }

    fn name(&self) -> &str {
        "English/Keyboard"
    }

    fn language(&self) -> &str {
        "en"
    }

    fn help(&self) -> &str {
        "Keys are passed to the application unchanged."
    }

    fn create(&self, _encoding: &str, _id: u32) -> Result<Box<dyn Engine>> {
        Ok(Box::new(DummyEngine))
    }
}
