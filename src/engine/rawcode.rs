//! Raw code point entry.
//!
//! Type hexadecimal digits, see the pending code point as `U+XXXX` in the
//! preedit and every one-digit continuation in the candidate table, commit
//! with space or return.
//!
//! | Key              | Effect                                        |
//! |------------------|-----------------------------------------------|
//! | `0-9 a-f`        | append a digit                                |
//! | `BackSpace`      | drop the last digit                           |
//! | `space` `Return` | commit the pending character                  |
//! | `Escape`         | abandon the entry                             |
//! | `Page_Up/Down`   | page the candidate table                      |
//! | `Shift+BackSpace`| pull the character before the caret back in   |
//!
//! The last row needs surrounding text support from the client.

use anyhow::{bail, Result};
use uuid::Uuid;

use super::key::keysym;
use super::provider::EngineFactory;
use super::{
    Attribute, AttributeKind, ClientCapabilities, Engine, EngineEvent, EngineHost, KeyEvent,
    KeyMask, LookupTable, Property,
};

/// Identity of the raw code provider.
pub const RAWCODE_UUID: Uuid = Uuid::from_u128(0x3f9a_51c2_7d04_4e8b_a1c6_88e2_53b7_9d10);

/// Longest code point, `10FFFF`.
const MAX_DIGITS: usize = 6;

const MODE_PROPERTY: &str = "/RawCode/Mode";

/// Hex code point entry engine.
#[derive(Debug)]
pub struct RawCodeEngine {
    id: u32,
    digits: String,
    table: LookupTable,
    caps: ClientCapabilities,
}

impl RawCodeEngine {
    /// New engine with an empty entry.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            digits: String::new(),
            table: LookupTable::new(10),
            caps: ClientCapabilities::empty(),
        }
    }

    fn pending_char(&self) -> Option<char> {
        u32::from_str_radix(&self.digits, 16)
            .ok()
            .and_then(char::from_u32)
    }

    fn rebuild_table(&mut self) {
        self.table.clear();
        if self.digits.len() >= MAX_DIGITS {
            return;
        }
        for d in "0123456789abcdef".chars() {
            let candidate = format!("{}{d}", self.digits);
            if let Some(c) = u32::from_str_radix(&candidate, 16).ok().and_then(char::from_u32) {
                if !c.is_control() {
                    self.table.append(c.to_string());
                }
            }
        }
    }

    fn refresh(&mut self, host: &mut dyn EngineHost) {
        if self.digits.is_empty() {
            host.emit(EngineEvent::HidePreedit);
            host.emit(EngineEvent::HideAux);
            host.emit(EngineEvent::HideLookupTable);
            return;
        }
        let text = format!("U+{}", self.digits.to_uppercase());
        let len = text.chars().count() as u32;
        host.emit(EngineEvent::UpdatePreedit {
            text,
            attrs: vec![Attribute::new(0, len, AttributeKind::Underline)],
        });
        host.emit(EngineEvent::UpdatePreeditCaret(len));
        host.emit(EngineEvent::ShowPreedit);

        let aux = match self.pending_char() {
            Some(c) if !c.is_control() => format!("{c}"),
            _ => "?".to_string(),
        };
        host.emit(EngineEvent::UpdateAux {
            text: aux,
            attrs: Vec::new(),
        });
        host.emit(EngineEvent::ShowAux);

        self.rebuild_table();
        if self.table.is_empty() {
            host.emit(EngineEvent::HideLookupTable);
        } else {
            host.emit(EngineEvent::UpdateLookupTable(self.table.clone()));
            host.emit(EngineEvent::ShowLookupTable);
        }
    }

    fn clear(&mut self, host: &mut dyn EngineHost) {
        self.digits.clear();
        self.table.clear();
        self.refresh(host);
    }

    fn commit_pending(&mut self, host: &mut dyn EngineHost) {
        match self.pending_char() {
            Some(c) if !c.is_control() => {
                self.clear(host);
                host.emit(EngineEvent::Commit(c.to_string()));
            }
            _ => host.emit(EngineEvent::Beep),
        }
    }

    /// Take the character before the caret back into the entry.
    fn reconvert(&mut self, host: &mut dyn EngineHost) -> bool {
        if !self.caps.contains(ClientCapabilities::SURROUNDING_TEXT) {
            return false;
        }
        let Some(surrounding) = host.get_surrounding_text(1, 0) else {
            return false;
        };
        let Some(prev) = surrounding
            .text
            .chars()
            .nth((surrounding.cursor as usize).saturating_sub(1))
            .filter(|_| surrounding.cursor > 0)
        else {
            return false;
        };
        if !host.delete_surrounding_text(-1, 1) {
            return false;
        }
        self.digits = format!("{:x}", u32::from(prev));
        self.refresh(host);
        true
    }

    fn properties() -> Vec<Property> {
        vec![Property::new(MODE_PROPERTY, "U+", "Unicode code point entry")]
    }
}

impl Engine for RawCodeEngine {
    fn focus_in(&mut self, host: &mut dyn EngineHost) {
        host.emit(EngineEvent::RegisterProperties(Self::properties()));
        self.refresh(host);
    }

    fn focus_out(&mut self, _host: &mut dyn EngineHost) {}

    fn reset(&mut self, host: &mut dyn EngineHost) {
        log::trace!("[rawcode] session {} reset", self.id);
        self.clear(host);
    }

    fn process_key_event(&mut self, key: &KeyEvent, host: &mut dyn EngineHost) -> bool {
        if key.is_release() {
            return !self.digits.is_empty();
        }
        let mods = key.mask.significant();

        if key.code == keysym::BACKSPACE && mods == KeyMask::SHIFT && self.digits.is_empty() {
            return self.reconvert(host);
        }
        if self.digits.is_empty() {
            return match key.printable() {
                Some(c) if mods.is_empty() && c.is_ascii_hexdigit() => {
                    self.digits.push(c.to_ascii_lowercase());
                    self.refresh(host);
                    true
                }
                _ => false,
            };
        }

        match key.code {
            keysym::BACKSPACE => {
                self.digits.pop();
                self.refresh(host);
            }
            keysym::ESCAPE => self.clear(host),
            keysym::SPACE | keysym::RETURN => self.commit_pending(host),
            keysym::PAGE_UP => {
                if self.table.page_up() {
                    host.emit(EngineEvent::UpdateLookupTable(self.table.clone()));
                } else {
                    host.emit(EngineEvent::Beep);
                }
            }
            keysym::PAGE_DOWN => {
                if self.table.page_down() {
                    host.emit(EngineEvent::UpdateLookupTable(self.table.clone()));
                } else {
                    host.emit(EngineEvent::Beep);
                }
            }
            _ => match key.printable() {
                Some(c) if mods.is_empty() && c.is_ascii_hexdigit() => {
                    if self.digits.len() < MAX_DIGITS {
                        self.digits.push(c.to_ascii_lowercase());
                        self.refresh(host);
                    } else {
                        host.emit(EngineEvent::Beep);
                    }
                }
                _ => host.emit(EngineEvent::Beep),
            },
        }
        true
    }

    fn update_client_capabilities(&mut self, caps: ClientCapabilities) {
        self.caps = caps;
    }

    fn select_candidate(&mut self, index: u32, host: &mut dyn EngineHost) {
        let Some(text) = self.table.candidate_in_page(index).map(str::to_owned) else {
            host.emit(EngineEvent::Beep);
            return;
        };
        self.clear(host);
        host.emit(EngineEvent::Commit(text));
    }

    fn trigger_property(&mut self, key: &str, host: &mut dyn EngineHost) {
        if key == MODE_PROPERTY {
            self.clear(host);
        }
    }

    fn lookup_table_page_up(&mut self, host: &mut dyn EngineHost) {
        if self.table.page_up() {
            host.emit(EngineEvent::UpdateLookupTable(self.table.clone()));
        }
    }

    fn lookup_table_page_down(&mut self, host: &mut dyn EngineHost) {
        if self.table.page_down() {
            host.emit(EngineEvent::UpdateLookupTable(self.table.clone()));
        }
    }

    fn update_lookup_table_page_size(&mut self, size: u32, host: &mut dyn EngineHost) {
        self.table.set_page_size(size);
        if !self.table.is_empty() {
            host.emit(EngineEvent::UpdateLookupTable(self.table.clone()));
        }
    }
}

/// Factory for [`RawCodeEngine`].
#[derive(Debug, Default)]
pub struct RawCodeFactory;

impl EngineFactory for RawCodeFactory {
    fn uuid(&self) -> Uuid {
        RAWCODE_UUID
    }

    fn name(&self) -> &str {
        "RAW CODE"
    }

    fn language(&self) -> &str {
        "zh_CN"
    }

    fn help(&self) -> &str {
        "Type a hexadecimal Unicode code point, then space or return to insert it.\n\
         Shift+BackSpace pulls the character before the caret back for editing."
    }

    fn create(&self, encoding: &str, id: u32) -> Result<Box<dyn Engine>> {
        if !encoding.eq_ignore_ascii_case("UTF-8") {
            bail!("raw code entry needs UTF-8, got {encoding}");
        }
        Ok(Box::new(RawCodeEngine::new(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RecordingHost, SurroundingText};

    fn press(code: u32) -> KeyEvent {
        KeyEvent::new(code, KeyMask::empty())
    }

    fn typed(engine: &mut RawCodeEngine, host: &mut RecordingHost, text: &str) {
        for c in text.chars() {
            assert!(engine.process_key_event(&press(u32::from(c)), host));
        }
    }

    fn commits(host: &RecordingHost) -> Vec<String> {
        host.events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Commit(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_type_and_commit() {
        let mut engine = RawCodeEngine::new(0);
        let mut host = RecordingHost::default();
        typed(&mut engine, &mut host, "3042");
        assert!(host.events.contains(&EngineEvent::UpdatePreedit {
            text: "U+3042".into(),
            attrs: vec![Attribute::new(0, 6, AttributeKind::Underline)],
        }));
        assert!(engine.process_key_event(&press(keysym::SPACE), &mut host));
        assert_eq!(commits(&host), ["あ"]);
        assert!(engine.digits.is_empty());
    }

    #[test]
    fn test_non_hex_passes_through_when_idle() {
        let mut engine = RawCodeEngine::new(0);
        let mut host = RecordingHost::default();
        assert!(!engine.process_key_event(&press(u32::from('z')), &mut host));
        assert!(!engine.process_key_event(&press(keysym::RETURN), &mut host));
        assert!(host.events.is_empty());
    }

    #[test]
    fn test_backspace_and_escape() {
        let mut engine = RawCodeEngine::new(0);
        let mut host = RecordingHost::default();
        typed(&mut engine, &mut host, "41");
        engine.process_key_event(&press(keysym::BACKSPACE), &mut host);
        assert_eq!(engine.digits, "4");
        engine.process_key_event(&press(keysym::ESCAPE), &mut host);
        assert!(engine.digits.is_empty());
        assert_eq!(host.events.last(), Some(&EngineEvent::HideLookupTable));
        assert!(commits(&host).is_empty());
    }

    #[test]
    fn test_select_candidate_commits_continuation() {
        let mut engine = RawCodeEngine::new(0);
        let mut host = RecordingHost::default();
        typed(&mut engine, &mut host, "4");
        // Candidates are 0x40..0x4f, index 1 is 'A'.
        engine.select_candidate(1, &mut host);
        assert_eq!(commits(&host), ["A"]);
    }

    #[test]
    fn test_invalid_code_point_beeps() {
        let mut engine = RawCodeEngine::new(0);
        let mut host = RecordingHost::default();
        typed(&mut engine, &mut host, "d800");
        engine.process_key_event(&press(keysym::RETURN), &mut host);
        assert_eq!(host.events.last(), Some(&EngineEvent::Beep));
        assert!(commits(&host).is_empty());
    }

    #[test]
    fn test_reconvert_uses_surrounding_text() {
        let mut engine = RawCodeEngine::new(0);
        let mut host = RecordingHost {
            surrounding: Some(SurroundingText {
                text: "xA".into(),
                cursor: 2,
            }),
            ..RecordingHost::default()
        };
        let shift_bs = KeyEvent::new(keysym::BACKSPACE, KeyMask::SHIFT);
        assert!(!engine.process_key_event(&shift_bs, &mut host));

        engine.update_client_capabilities(ClientCapabilities::SURROUNDING_TEXT);
        assert!(engine.process_key_event(&shift_bs, &mut host));
        assert_eq!(engine.digits, "41");
        assert_eq!(host.deleted, [(-1, 1)]);
    }

    #[test]
    fn test_factory_rejects_other_encodings() {
        assert!(RawCodeFactory.create("EUC-JP", 1).is_err());
        assert!(RawCodeFactory.create("utf-8", 1).is_ok());
    }
}
