//! Panel transaction codec.
//!
//! Wire format:
//!
//! ```text
//! [u32 LE: magic "IMBT"] [u32 LE: payload_len] [u32 LE: checksum] [payload]
//! ```
//!
//! The payload is a flat sequence of typed items, `[u8: tag][data]`:
//!
//! | Tag    | Item       | Data                                              |
//! |--------|------------|---------------------------------------------------|
//! | `0x01` | Command    | u32 opcode                                        |
//! | `0x02` | U32        | u32                                               |
//! | `0x03` | I32        | i32                                               |
//! | `0x04` | Str        | u32 length + UTF-8                                |
//! | `0x05` | StrList    | u32 count + strings                               |
//! | `0x06` | Attrs      | u32 count + (u32 start, u32 end, u8 type, u32 v)  |
//! | `0x07` | Table      | page size, page start, cursor, visible, labels, candidates |
//! | `0x08` | Prop       | key, label, icon, tip, u8 visible, u8 active      |
//! | `0x09` | Props      | u32 count + properties                            |
//! | `0x0a` | Key        | u32 code + u16 mask                               |
//! | `0x0b` | Nested     | u32 length + payload                              |
//!
//! Every item after a `Command` up to the next `Command` is that command's
//! data. The checksum is a rotate-xor over the payload bytes.

// Rust guideline compliant 2026-02

use anyhow::{anyhow, bail, Context, Result};

use crate::constants::{MAX_TRANSACTION_NESTING, MAX_TRANSACTION_SIZE};
use crate::engine::{Attribute, AttributeKind, KeyEvent, KeyMask, LookupTable, Property};

/// Frame magic, `"IMBT"` little-endian.
pub const MAGIC: u32 = u32::from_le_bytes(*b"IMBT");

const HEADER_LEN: usize = 12;

// ─── Item tags ─────────────────────────────────────────────────────────────

mod tag {
    pub const COMMAND: u8 = 0x01;
    pub const U32: u8 = 0x02;
    pub const I32: u8 = 0x03;
    pub const STR: u8 = 0x04;
    pub const STR_LIST: u8 = 0x05;
    pub const ATTRS: u8 = 0x06;
    pub const TABLE: u8 = 0x07;
    pub const PROP: u8 = 0x08;
    pub const PROPS: u8 = 0x09;
    pub const KEY: u8 = 0x0a;
    pub const NESTED: u8 = 0x0b;
}

mod attr_type {
    pub const DECORATE: u8 = 1;
    pub const FOREGROUND: u8 = 2;
    pub const BACKGROUND: u8 = 3;

    pub const UNDERLINE: u32 = 1;
    pub const HIGHLIGHT: u32 = 2;
    pub const REVERSE: u32 = 4;
}

/// One typed item of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Opcode starting a command.
    Command(u32),
    /// Unsigned integer.
    U32(u32),
    /// Signed integer.
    I32(i32),
    /// UTF-8 string.
    Str(String),
    /// List of strings.
    StrList(Vec<String>),
    /// Styled ranges.
    Attrs(Vec<Attribute>),
    /// Candidate table.
    Table(LookupTable),
    /// Toolbar property.
    Prop(Property),
    /// Toolbar properties.
    Props(Vec<Property>),
    /// Key event.
    Key(KeyEvent),
    /// Embedded transaction (helper payloads).
    Nested(Transaction),
}

/// An ordered list of typed items, built incrementally and sent atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    items: Vec<Item>,
}

impl Transaction {
    /// Empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item.
    pub fn push(&mut self, item: Item) -> &mut Self {
        self.items.push(item);
        self
    }

    /// Append a command opcode.
    pub fn command(&mut self, code: u32) -> &mut Self {
        self.push(Item::Command(code))
    }

    /// All items.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Whether nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Group the items by command.
    ///
    /// # Errors
    ///
    /// Fails if data items precede the first command.
    pub fn commands(&self) -> Result<Vec<CommandView<'_>>> {
        let mut out = Vec::new();
        let mut start = None;
        for (i, item) in self.items.iter().enumerate() {
            match (item, start) {
                (Item::Command(_), Some(s)) => {
                    out.push(CommandView::from_slice(&self.items[s..i]));
                    start = Some(i);
                }
                (Item::Command(_), None) => start = Some(i),
                (_, None) => bail!("transaction data precedes the first command"),
                (_, Some(_)) => {}
            }
        }
        if let Some(s) = start {
            out.push(CommandView::from_slice(&self.items[s..]));
        }
        Ok(out)
    }

    /// Encode the item payload (no frame header).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        for item in &self.items {
            encode_item(item, &mut buf);
        }
        buf
    }

    /// Encode a complete frame.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&checksum(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        buf
    }

    /// Decode an item payload.
    ///
    /// # Errors
    ///
    /// Fails on an unknown tag, a truncated item, invalid UTF-8, or nested
    /// transactions deeper than `MAX_TRANSACTION_NESTING`.
    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        Self::decode_nested(payload, 0)
    }

    fn decode_nested(payload: &[u8], depth: usize) -> Result<Self> {
        if depth > MAX_TRANSACTION_NESTING {
            bail!("transactions nested deeper than {MAX_TRANSACTION_NESTING}");
        }
        let mut cursor = Cursor { buf: payload, pos: 0 };
        let mut items = Vec::new();
        while !cursor.at_end() {
            items.push(decode_item(&mut cursor, depth)?);
        }
        Ok(Self { items })
    }
}

/// One command and its data items.
#[derive(Debug, Clone, Copy)]
pub struct CommandView<'a> {
    /// Opcode.
    pub code: u32,
    /// Data items following the opcode.
    pub data: &'a [Item],
}

impl<'a> CommandView<'a> {
    fn from_slice(items: &'a [Item]) -> Self {
        let code = match items.first() {
            Some(Item::Command(code)) => *code,
            _ => 0,
        };
        Self {
            code,
            data: items.get(1..).unwrap_or_default(),
        }
    }

    /// Unsigned integer at `index`.
    ///
    /// # Errors
    ///
    /// Fails if the item is absent or of another type.
    pub fn u32_at(&self, index: usize) -> Result<u32> {
        match self.data.get(index) {
            Some(Item::U32(v)) => Ok(*v),
            other => Err(self.mismatch("u32", index, other)),
        }
    }

    /// Signed integer at `index`.
    ///
    /// # Errors
    ///
    /// Fails if the item is absent or of another type.
    pub fn i32_at(&self, index: usize) -> Result<i32> {
        match self.data.get(index) {
            Some(Item::I32(v)) => Ok(*v),
            other => Err(self.mismatch("i32", index, other)),
        }
    }

    /// String at `index`.
    ///
    /// # Errors
    ///
    /// Fails if the item is absent or of another type.
    pub fn str_at(&self, index: usize) -> Result<&'a str> {
        match self.data.get(index) {
            Some(Item::Str(v)) => Ok(v),
            other => Err(self.mismatch("string", index, other)),
        }
    }

    /// Key event at `index`.
    ///
    /// # Errors
    ///
    /// Fails if the item is absent or of another type.
    pub fn key_at(&self, index: usize) -> Result<KeyEvent> {
        match self.data.get(index) {
            Some(Item::Key(v)) => Ok(*v),
            other => Err(self.mismatch("key event", index, other)),
        }
    }

    /// Nested transaction at `index`.
    ///
    /// # Errors
    ///
    /// Fails if the item is absent or of another type.
    pub fn nested_at(&self, index: usize) -> Result<&'a Transaction> {
        match self.data.get(index) {
            Some(Item::Nested(v)) => Ok(v),
            other => Err(self.mismatch("transaction", index, other)),
        }
    }

    fn mismatch(&self, want: &str, index: usize, got: Option<&Item>) -> anyhow::Error {
        match got {
            Some(item) => anyhow!(
                "{}: item #{index} is {item:?}, expected {want}",
                super::commands::name(self.code)
            ),
            None => anyhow!(
                "{}: missing item #{index} ({want})",
                super::commands::name(self.code)
            ),
        }
    }
}

/// Rotate-xor checksum over `payload`.
pub fn checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |sum, b| sum.rotate_left(5) ^ u32::from(*b))
}

// ─── Item encoding ─────────────────────────────────────────────────────────

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn put_str_list(buf: &mut Vec<u8>, list: &[String]) {
    put_u32(buf, list.len() as u32);
    for s in list {
        put_str(buf, s);
    }
}

fn put_property(buf: &mut Vec<u8>, p: &Property) {
    put_str(buf, &p.key);
    put_str(buf, &p.label);
    put_str(buf, &p.icon);
    put_str(buf, &p.tip);
    buf.push(u8::from(p.visible));
    buf.push(u8::from(p.active));
}

fn encode_item(item: &Item, buf: &mut Vec<u8>) {
    match item {
        Item::Command(code) => {
            buf.push(tag::COMMAND);
            put_u32(buf, *code);
        }
        Item::U32(v) => {
            buf.push(tag::U32);
            put_u32(buf, *v);
        }
        Item::I32(v) => {
            buf.push(tag::I32);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Item::Str(s) => {
            buf.push(tag::STR);
            put_str(buf, s);
        }
        Item::StrList(list) => {
            buf.push(tag::STR_LIST);
            put_str_list(buf, list);
        }
        Item::Attrs(attrs) => {
            buf.push(tag::ATTRS);
            put_u32(buf, attrs.len() as u32);
            for a in attrs {
                put_u32(buf, a.start);
                put_u32(buf, a.end);
                let (ty, value) = match a.kind {
                    AttributeKind::Underline => (attr_type::DECORATE, attr_type::UNDERLINE),
                    AttributeKind::Highlight => (attr_type::DECORATE, attr_type::HIGHLIGHT),
                    AttributeKind::Reverse => (attr_type::DECORATE, attr_type::REVERSE),
                    AttributeKind::Foreground(rgb) => (attr_type::FOREGROUND, rgb),
                    AttributeKind::Background(rgb) => (attr_type::BACKGROUND, rgb),
                };
                buf.push(ty);
                put_u32(buf, value);
            }
        }
        Item::Table(t) => {
            buf.push(tag::TABLE);
            put_u32(buf, t.page_size);
            put_u32(buf, t.page_start);
            put_u32(buf, t.cursor);
            buf.push(u8::from(t.cursor_visible));
            put_str_list(buf, &t.labels);
            put_str_list(buf, &t.candidates);
        }
        Item::Prop(p) => {
            buf.push(tag::PROP);
            put_property(buf, p);
        }
        Item::Props(list) => {
            buf.push(tag::PROPS);
            put_u32(buf, list.len() as u32);
            for p in list {
                put_property(buf, p);
            }
        }
        Item::Key(k) => {
            buf.push(tag::KEY);
            put_u32(buf, k.code);
            buf.extend_from_slice(&k.mask.bits().to_le_bytes());
        }
        Item::Nested(t) => {
            buf.push(tag::NESTED);
            let inner = t.encode_payload();
            put_u32(buf, inner.len() as u32);
            buf.extend_from_slice(&inner);
        }
    }
}

// ─── Item decoding ─────────────────────────────────────────────────────────

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| anyhow!("truncated item at offset {}", self.pos))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| anyhow!("string item is not UTF-8: {e}"))
    }

    /// Element count, bounded by the bytes left so a corrupt count cannot
    /// trigger a huge allocation.
    fn count(&mut self) -> Result<usize> {
        let n = self.u32()? as usize;
        if n > self.buf.len() - self.pos {
            bail!("item count {n} exceeds remaining payload");
        }
        Ok(n)
    }

    fn string_list(&mut self) -> Result<Vec<String>> {
        let n = self.count()?;
        (0..n).map(|_| self.string()).collect()
    }

    fn property(&mut self) -> Result<Property> {
        Ok(Property {
            key: self.string()?,
            label: self.string()?,
            icon: self.string()?,
            tip: self.string()?,
            visible: self.bool()?,
            active: self.bool()?,
        })
    }
}

fn decode_item(c: &mut Cursor<'_>, depth: usize) -> Result<Item> {
    let t = c.u8()?;
    let item = match t {
        tag::COMMAND => Item::Command(c.u32()?),
        tag::U32 => Item::U32(c.u32()?),
        tag::I32 => Item::I32(c.u32()? as i32),
        tag::STR => Item::Str(c.string()?),
        tag::STR_LIST => Item::StrList(c.string_list()?),
        tag::ATTRS => {
            let n = c.count()?;
            let mut attrs = Vec::with_capacity(n);
            for _ in 0..n {
                let start = c.u32()?;
                let end = c.u32()?;
                let ty = c.u8()?;
                let value = c.u32()?;
                let kind = match (ty, value) {
                    (attr_type::DECORATE, attr_type::UNDERLINE) => AttributeKind::Underline,
                    (attr_type::DECORATE, attr_type::HIGHLIGHT) => AttributeKind::Highlight,
                    (attr_type::DECORATE, attr_type::REVERSE) => AttributeKind::Reverse,
                    (attr_type::FOREGROUND, rgb) => AttributeKind::Foreground(rgb),
                    (attr_type::BACKGROUND, rgb) => AttributeKind::Background(rgb),
                    _ => bail!("unknown attribute type {ty}/{value}"),
                };
                attrs.push(Attribute { start, end, kind });
            }
            Item::Attrs(attrs)
        }
        tag::TABLE => Item::Table(LookupTable {
            page_size: c.u32()?,
            page_start: c.u32()?,
            cursor: c.u32()?,
            cursor_visible: c.bool()?,
            labels: c.string_list()?,
            candidates: c.string_list()?,
        }),
        tag::PROP => Item::Prop(c.property()?),
        tag::PROPS => {
            let n = c.count()?;
            Item::Props((0..n).map(|_| c.property()).collect::<Result<_>>()?)
        }
        tag::KEY => {
            let code = c.u32()?;
            let mask = KeyMask::from_bits_truncate(c.u16()?);
            Item::Key(KeyEvent { code, mask })
        }
        tag::NESTED => {
            let len = c.u32()? as usize;
            let inner = c.take(len)?;
            Item::Nested(Transaction::decode_nested(inner, depth + 1).context("nested transaction")?)
        }
        other => bail!("unknown item tag 0x{other:02x}"),
    };
    Ok(item)
}

// ─── Frame decoder ─────────────────────────────────────────────────────────

/// Incremental transaction frame decoder.
///
/// Same byte-accumulation design as the client line decoder: feed whatever
/// the socket produced, get back every complete transaction.
#[derive(Debug, Default)]
pub struct TransactionDecoder {
    buf: Vec<u8>,
}

impl TransactionDecoder {
    /// Create a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed bytes and extract all complete transactions.
    ///
    /// # Errors
    ///
    /// Fails on a bad magic, an oversized frame, a checksum mismatch, or a
    /// malformed payload.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Transaction>> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        while self.buf.len() >= HEADER_LEN {
            let word = |i: usize| {
                u32::from_le_bytes([self.buf[i], self.buf[i + 1], self.buf[i + 2], self.buf[i + 3]])
            };
            let magic = word(0);
            if magic != MAGIC {
                bail!("bad transaction magic 0x{magic:08x}");
            }
            let length = word(4);
            if length > MAX_TRANSACTION_SIZE {
                bail!("transaction too large: {length} bytes");
            }
            let expected = word(8);
            let total = HEADER_LEN + length as usize;
            if self.buf.len() < total {
                break;
            }
            let payload = &self.buf[HEADER_LEN..total];
            let actual = checksum(payload);
            if actual != expected {
                bail!("transaction checksum mismatch: 0x{actual:08x} != 0x{expected:08x}");
            }
            out.push(Transaction::decode_payload(payload)?);
            self.buf.drain(..total);
        }

        Ok(out)
    }

    /// Whether a partial frame is buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────
