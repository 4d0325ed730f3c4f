//! Key events as engines see them.
//!
//! A key event is a keysym code plus a modifier mask. Clients spell the
//! modifiers out by name (`shift control ...`) and send the press/release
//! state as a separate flag, which maps onto [`KeyMask::RELEASE`].

use std::fmt;

use anyhow::{bail, Result};

bitflags::bitflags! {
    /// Modifier state of a key event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeyMask: u16 {
        /// Shift held.
        const SHIFT = 1 << 0;
        /// Caps lock on.
        const CAPS_LOCK = 1 << 1;
        /// Control held.
        const CONTROL = 1 << 2;
        /// Alt held.
        const ALT = 1 << 3;
        /// Meta held.
        const META = 1 << 4;
        /// Super held.
        const SUPER = 1 << 5;
        /// Hyper held.
        const HYPER = 1 << 6;
        /// Num lock on.
        const NUM_LOCK = 1 << 7;
        /// The key was released rather than pressed.
        const RELEASE = 1 << 15;
    }
}

/// Client-facing modifier names, in wire order.
const MODIFIER_NAMES: [(&str, KeyMask); 8] = [
    ("shift", KeyMask::SHIFT),
    ("control", KeyMask::CONTROL),
    ("alt", KeyMask::ALT),
    ("meta", KeyMask::META),
    ("super", KeyMask::SUPER),
    ("hyper", KeyMask::HYPER),
    ("caps_lock", KeyMask::CAPS_LOCK),
    ("num_lock", KeyMask::NUM_LOCK),
];

impl KeyMask {
    /// Look up a client modifier name.
    pub fn from_modifier_name(name: &str) -> Option<Self> {
        MODIFIER_NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, m)| *m)
    }

    /// Client modifier names set in this mask (excluding `RELEASE`).
    pub fn modifier_names(self) -> Vec<&'static str> {
        MODIFIER_NAMES
            .iter()
            .filter(|(_, m)| self.contains(*m))
            .map(|(n, _)| *n)
            .collect()
    }

    /// Modifiers that change what a key means, i.e. everything except the
    /// lock states and the release bit.
    pub fn significant(self) -> Self {
        self - (Self::CAPS_LOCK | Self::NUM_LOCK | Self::RELEASE)
    }
}

/// Keysym codes the built-in engines and trigger parsing care about.
pub mod keysym {
    /// Space.
    pub const SPACE: u32 = 0x0020;
    /// Backspace.
    pub const BACKSPACE: u32 = 0xff08;
    /// Tab.
    pub const TAB: u32 = 0xff09;
    /// Return.
    pub const RETURN: u32 = 0xff0d;
    /// Escape.
    pub const ESCAPE: u32 = 0xff1b;
    /// Left arrow.
    pub const LEFT: u32 = 0xff51;
    /// Up arrow.
    pub const UP: u32 = 0xff52;
    /// Right arrow.
    pub const RIGHT: u32 = 0xff53;
    /// Down arrow.
    pub const DOWN: u32 = 0xff54;
    /// Page up.
    pub const PAGE_UP: u32 = 0xff55;
    /// Page down.
    pub const PAGE_DOWN: u32 = 0xff56;
    /// Zenkaku/Hankaku toggle.
    pub const ZENKAKU_HANKAKU: u32 = 0xff2a;
    /// F1; F2..F12 follow consecutively.
    pub const F1: u32 = 0xffbe;
}

const NAMED_KEYS: [(&str, u32); 13] = [
    ("space", keysym::SPACE),
    ("BackSpace", keysym::BACKSPACE),
    ("Tab", keysym::TAB),
    ("Return", keysym::RETURN),
    ("Escape", keysym::ESCAPE),
    ("Left", keysym::LEFT),
    ("Up", keysym::UP),
    ("Right", keysym::RIGHT),
    ("Down", keysym::DOWN),
    ("Page_Up", keysym::PAGE_UP),
    ("Page_Down", keysym::PAGE_DOWN),
    ("Prior", keysym::PAGE_UP),
    ("Zenkaku_Hankaku", keysym::ZENKAKU_HANKAKU),
];

fn keysym_from_name(name: &str) -> Option<u32> {
    if let Some((_, code)) = NAMED_KEYS.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
        return Some(*code);
    }
    if let Some(n) = name.strip_prefix('F').and_then(|n| n.parse::<u32>().ok()) {
        if (1..=12).contains(&n) {
            return Some(keysym::F1 + n - 1);
        }
    }
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_control() => Some(u32::from(c)),
        _ => None,
    }
}

/// A key press or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyEvent {
    /// Keysym code.
    pub code: u32,
    /// Modifier state.
    pub mask: KeyMask,
}

impl KeyEvent {
    /// Build a key event.
    pub fn new(code: u32, mask: KeyMask) -> Self {
        Self { code, mask }
    }

    /// Whether this is a release.
    pub fn is_release(&self) -> bool {
        self.mask.contains(KeyMask::RELEASE)
    }

    /// The character a bare or shifted printable key produces.
    pub fn printable(&self) -> Option<char> {
        if !(self.mask.significant() - KeyMask::SHIFT).is_empty() {
            return None;
        }
        let cp = match self.code {
            c if c < 0x100 => c,
            c if c & 0xff00_0000 == 0x0100_0000 => c & 0x00ff_ffff,
            _ => return None,
        };
        char::from_u32(cp).filter(|c| !c.is_control())
    }

    /// Build from client wire arguments.
    ///
    /// # Errors
    ///
    /// Fails on a non-numeric code, a bad press flag, or an unknown modifier.
    pub fn from_wire(code: &str, pressed: &str, modifiers: &[String]) -> Result<Self> {
        let Ok(code) = code.parse::<u32>() else {
            bail!("invalid key code '{code}'");
        };
        let mut mask = match crate::socket::headers::parse_flag(pressed) {
            Some(true) => KeyMask::empty(),
            Some(false) => KeyMask::RELEASE,
            None => bail!("invalid pressed flag '{pressed}'"),
        };
        for name in modifiers {
            match KeyMask::from_modifier_name(name) {
                Some(m) => mask |= m,
                None => bail!("unknown modifier '{name}'"),
            }
        }
        Ok(Self { code, mask })
    }

    /// Client wire arguments: code, pressed flag, modifier names.
    pub fn to_wire(&self) -> Vec<String> {
        let mut out = vec![
            self.code.to_string(),
            crate::socket::headers::flag(!self.is_release()).to_string(),
        ];
        out.extend(self.mask.modifier_names().into_iter().map(str::to_string));
        out
    }

    /// Parse a trigger-key spec such as `Control+space`.
    ///
    /// # Errors
    ///
    /// Fails on an unknown modifier or key name.
    pub fn parse_trigger(spec: &str) -> Result<Self> {
        let mut parts: Vec<&str> = spec.split('+').collect();
        let Some(key) = parts.pop().filter(|k| !k.is_empty()) else {
            bail!("trigger key '{spec}' names no key");
        };
        let mut mask = KeyMask::empty();
        for part in parts {
            let modifier = match part.to_ascii_lowercase().as_str() {
                "ctrl" => Some(KeyMask::CONTROL),
                other => KeyMask::from_modifier_name(other),
            };
            match modifier {
                Some(m) => mask |= m,
                None => bail!("trigger key '{spec}': unknown modifier '{part}'"),
            }
        }
        let Some(code) = keysym_from_name(key) else {
            bail!("trigger key '{spec}': unknown key '{key}'");
        };
        Ok(Self { code, mask })
    }

    /// Whether `self` (a configured trigger) matches an incoming press.
    pub fn matches_press(&self, event: &KeyEvent) -> bool {
        !event.is_release() && self.code == event.code && self.mask.significant() == event.mask.significant()
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in self.mask.modifier_names() {
            write!(f, "{name}+")?;
        }
        write!(f, "0x{:04x}", self.code)?;
        if self.is_release() {
            write!(f, " (release)")?;
        }
        Ok(())
    }
}
