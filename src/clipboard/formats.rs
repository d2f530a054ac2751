//! Clipboard payload formats.
//!
//! MIME names plus the small encoders/decoders the facade needs to turn
//! typed objects into advertised bytes and back. Decoders return `None`
//! on malformed input.

use std::collections::BTreeMap;
use std::io::Cursor;

use image::{ImageFormat, RgbaImage};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_HTML: &str = "text/html";
pub const MIME_RTF: &str = "text/rtf";
pub const MIME_PNG: &str = "image/png";
pub const MIME_URI_LIST: &str = "text/uri-list";
pub const MIME_MOZILLA_URL: &str = "text/x-moz-url";
pub const MIME_WEBKIT_SMART_PASTE: &str = "application/x-webkit-smart-paste";
pub const MIME_WEB_CUSTOM_DATA: &str = "application/x-web-custom-data";

// -- Web custom data --
//
// Layout: u32 payload length, then the payload: u32 entry count followed
// by (type, data) string pairs. Each string is an i32 count of UTF-16
// code units and the units themselves, zero-padded to 4 bytes. All
// integers little-endian.

/// Serialize custom data entries.
pub fn write_custom_data(entries: &BTreeMap<String, String>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (kind, data) in entries {
        write_string16(&mut payload, kind);
        write_string16(&mut payload, data);
    }

    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Look up one entry in serialized custom data.
pub fn read_custom_data(bytes: &[u8], kind: &str) -> Option<String> {
    read_all_custom_data(bytes)?.remove(kind)
}

/// Decode every entry in serialized custom data.
pub fn read_all_custom_data(bytes: &[u8]) -> Option<BTreeMap<String, String>> {
    let mut reader = PickleReader::new(bytes)?;
    let count = reader.read_u32()?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let kind = reader.read_string16()?;
        let data = reader.read_string16()?;
        entries.insert(kind, data);
    }
    Some(entries)
}

fn write_string16(out: &mut Vec<u8>, value: &str) {
    let units: Vec<u16> = value.encode_utf16().collect();
    out.extend_from_slice(&(units.len() as i32).to_le_bytes());
    for unit in &units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    let padding = (4 - (units.len() * 2) % 4) % 4;
    out.extend(std::iter::repeat_n(0u8, padding));
}

struct PickleReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> PickleReader<'a> {
    fn new(bytes: &'a [u8]) -> Option<Self> {
        let header: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        let len = u32::from_le_bytes(header) as usize;
        let payload = bytes.get(4..4usize.checked_add(len)?)?;
        Some(Self { payload, pos: 0 })
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let bytes = self.payload.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn read_u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn read_string16(&mut self) -> Option<String> {
        let len = i32::from_le_bytes(self.take(4)?.try_into().ok()?);
        let len = usize::try_from(len).ok()?;
        let byte_len = len.checked_mul(2)?;
        let raw = self.take(byte_len)?;
        let padding = (4 - byte_len % 4) % 4;
        self.take(padding)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).ok()
    }
}

// -- Mozilla URL (UTF-16LE "url\ntitle") --

pub fn encode_mozilla_url(url: &str, title: &str) -> Vec<u8> {
    format!("{url}\n{title}")
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Returns `(url, title)`.
pub fn decode_mozilla_url(bytes: &[u8]) -> Option<(String, String)> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let text = String::from_utf16(&units).ok()?;
    let (url, title) = text.split_once('\n').unwrap_or((text.as_str(), ""));
    Some((url.to_string(), title.to_string()))
}

// -- PNG --

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

pub fn decode_png(bytes: &[u8]) -> Option<RgbaImage> {
    if bytes.is_empty() {
        return None;
    }
    match image::load_from_memory_with_format(bytes, ImageFormat::Png) {
        Ok(decoded) => Some(decoded.to_rgba8()),
        Err(e) => {
            tracing::debug!(error = %e, "clipboard PNG failed to decode");
            None
        }
    }
}
