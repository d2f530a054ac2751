//! Blocking clipboard facade.
//!
//! Each public method builds exactly one [`RequestKind`], runs it through
//! the buffer's [`SyncBridge`] and shapes the raw bytes for the caller.
//! Writes serialize every object into a fresh data map and publish it with
//! a single offer.
//!
//! The selection buffer is optional (`ClipboardConfig::selection_support`).
//! When it is off, selection reads come back empty and selection writes
//! are dropped.

pub mod formats;

use std::collections::BTreeMap;
use std::rc::Rc;

use image::RgbaImage;

use crate::backend::{ClipboardBackend, ClipboardBuffer, DataMap};
use crate::bridge::{BridgeConfig, EventLoop, Reply, RequestKind, SyncBridge};

use formats::{
    MIME_HTML, MIME_MOZILLA_URL, MIME_PNG, MIME_RTF, MIME_TEXT, MIME_URI_LIST,
    MIME_WEB_CUSTOM_DATA, MIME_WEBKIT_SMART_PASTE,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClipboardConfig {
    pub bridge: BridgeConfig,
    /// Serve the selection buffer as well as copy/paste.
    pub selection_support: bool,
}

/// Something an application puts on the clipboard.
#[derive(Debug, Clone)]
pub enum ClipboardObject {
    Text(String),
    Html { markup: String, url: Option<String> },
    Rtf(Vec<u8>),
    Bookmark { title: String, url: String },
    WebSmartPaste,
    Bitmap(RgbaImage),
    CustomData(BTreeMap<String, String>),
    Data { mime_type: String, data: Vec<u8> },
}

/// Result of [`Clipboard::read_available_types`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailableTypes {
    pub types: Vec<String>,
    pub contains_filenames: bool,
}

/// Result of [`Clipboard::read_html`]. Fragment bounds are byte offsets
/// into `markup`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlFragment {
    pub markup: String,
    pub src_url: Option<String>,
    pub fragment_start: u32,
    pub fragment_end: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub title: String,
    pub url: String,
}

pub struct Clipboard {
    copy_paste: SyncBridge,
    selection: Option<SyncBridge>,
}

impl Clipboard {
    pub fn new(event_loop: Rc<EventLoop>, config: ClipboardConfig) -> Self {
        let selection = config
            .selection_support
            .then(|| SyncBridge::new(Rc::clone(&event_loop), config.bridge));
        Self {
            copy_paste: SyncBridge::new(event_loop, config.bridge),
            selection,
        }
    }

    /// Attach the platform backend for `buffer`.
    ///
    /// Returns `false` (and ignores the backend) if `buffer` is not
    /// supported by this clipboard.
    pub fn set_backend(&self, buffer: ClipboardBuffer, backend: Rc<dyn ClipboardBackend>) -> bool {
        match self.bridge(buffer) {
            Some(bridge) => {
                bridge.set_backend(backend);
                true
            }
            None => {
                tracing::debug!(?buffer, "backend ignored for unsupported clipboard buffer");
                false
            }
        }
    }

    pub fn supports(&self, buffer: ClipboardBuffer) -> bool {
        self.bridge(buffer).is_some()
    }

    fn bridge(&self, buffer: ClipboardBuffer) -> Option<&SyncBridge> {
        match buffer {
            ClipboardBuffer::CopyPaste => Some(&self.copy_paste),
            ClipboardBuffer::Selection => self.selection.as_ref(),
        }
    }

    fn run(&self, buffer: ClipboardBuffer, kind: RequestKind) -> Option<Reply> {
        match self.bridge(buffer) {
            Some(bridge) => Some(bridge.execute(kind)),
            None => {
                tracing::debug!(?buffer, kind = kind.name(), "clipboard buffer not supported");
                None
            }
        }
    }

    fn read_bytes(&self, buffer: ClipboardBuffer, mime_type: &str) -> Vec<u8> {
        self.run(
            buffer,
            RequestKind::Read {
                mime_type: mime_type.to_string(),
            },
        )
        .map(Reply::into_bytes)
        .unwrap_or_default()
    }

    fn mime_types(&self, buffer: ClipboardBuffer) -> Vec<String> {
        self.run(buffer, RequestKind::Enumerate)
            .map(Reply::into_mime_types)
            .unwrap_or_default()
    }

    fn offer(&self, buffer: ClipboardBuffer, data: DataMap) {
        if let Some(Reply::Offer { acknowledged: false }) =
            self.run(buffer, RequestKind::Offer { data })
        {
            tracing::warn!(?buffer, "clipboard offer was not acknowledged");
        }
    }

    /// Number of writes (including clears) made to `buffer`.
    pub fn sequence_number(&self, buffer: ClipboardBuffer) -> u64 {
        self.bridge(buffer).map_or(0, SyncBridge::sequence_number)
    }

    pub fn is_format_available(&self, mime_type: &str, buffer: ClipboardBuffer) -> bool {
        self.mime_types(buffer).iter().any(|t| t == mime_type)
    }

    /// Empty the buffer by offering an empty data map.
    pub fn clear(&self, buffer: ClipboardBuffer) {
        self.offer(buffer, DataMap::new());
    }

    pub fn read_available_types(&self, buffer: ClipboardBuffer) -> AvailableTypes {
        let types = self.mime_types(buffer);
        let contains_filenames = types.iter().any(|t| t == MIME_URI_LIST);
        AvailableTypes {
            types,
            contains_filenames,
        }
    }

    pub fn read_text(&self, buffer: ClipboardBuffer) -> String {
        String::from_utf8_lossy(&self.read_bytes(buffer, MIME_TEXT)).into_owned()
    }

    /// Plain text with every non-ASCII byte replaced by `?`.
    pub fn read_ascii_text(&self, buffer: ClipboardBuffer) -> String {
        self.read_bytes(buffer, MIME_TEXT)
            .into_iter()
            .map(|b| if b.is_ascii() { b as char } else { '?' })
            .collect()
    }

    pub fn read_html(&self, buffer: ClipboardBuffer) -> HtmlFragment {
        let markup = String::from_utf8_lossy(&self.read_bytes(buffer, MIME_HTML)).into_owned();
        let fragment_end = u32::try_from(markup.len()).unwrap_or(u32::MAX);
        HtmlFragment {
            markup,
            src_url: None,
            fragment_start: 0,
            fragment_end,
        }
    }

    pub fn read_rtf(&self, buffer: ClipboardBuffer) -> Vec<u8> {
        self.read_bytes(buffer, MIME_RTF)
    }

    pub fn read_image(&self, buffer: ClipboardBuffer) -> Option<RgbaImage> {
        formats::decode_png(&self.read_bytes(buffer, MIME_PNG))
    }

    pub fn read_custom_data(&self, buffer: ClipboardBuffer, data_type: &str) -> Option<String> {
        let bytes = self.read_bytes(buffer, MIME_WEB_CUSTOM_DATA);
        if bytes.is_empty() {
            return None;
        }
        formats::read_custom_data(&bytes, data_type)
    }

    pub fn read_bookmark(&self, buffer: ClipboardBuffer) -> Option<Bookmark> {
        let bytes = self.read_bytes(buffer, MIME_MOZILLA_URL);
        if bytes.is_empty() {
            return None;
        }
        let (url, title) = formats::decode_mozilla_url(&bytes)?;
        Some(Bookmark { title, url })
    }

    /// Raw payload for an arbitrary MIME type on the copy/paste buffer.
    pub fn read_data(&self, mime_type: &str) -> Vec<u8> {
        self.read_bytes(ClipboardBuffer::CopyPaste, mime_type)
    }

    /// Replace the buffer's content with `objects`.
    pub fn write_objects(&self, buffer: ClipboardBuffer, objects: &[ClipboardObject]) {
        if !self.supports(buffer) {
            tracing::debug!(?buffer, "write to unsupported clipboard buffer dropped");
            return;
        }
        let mut data = DataMap::new();
        for object in objects {
            if let Some((mime_type, bytes)) = serialize_object(object) {
                if data.insert(mime_type.clone(), bytes).is_some() {
                    tracing::warn!(%mime_type, "clipboard object overrides an earlier one");
                }
            }
        }
        self.offer(buffer, data);
    }
}

fn serialize_object(object: &ClipboardObject) -> Option<(String, Vec<u8>)> {
    let entry = match object {
        ClipboardObject::Text(text) => (MIME_TEXT.to_string(), text.as_bytes().to_vec()),
        // The source URL has no place in the advertised markup.
        ClipboardObject::Html { markup, .. } => (MIME_HTML.to_string(), markup.as_bytes().to_vec()),
        ClipboardObject::Rtf(rtf) => (MIME_RTF.to_string(), rtf.clone()),
        ClipboardObject::Bookmark { title, url } => (
            MIME_MOZILLA_URL.to_string(),
            formats::encode_mozilla_url(url, title),
        ),
        ClipboardObject::WebSmartPaste => (MIME_WEBKIT_SMART_PASTE.to_string(), Vec::new()),
        ClipboardObject::Bitmap(image) => match formats::encode_png(image) {
            Ok(png) => (MIME_PNG.to_string(), png),
            Err(e) => {
                tracing::warn!(error = %e, "bitmap could not be encoded; skipped");
                return None;
            }
        },
        ClipboardObject::CustomData(entries) => (
            MIME_WEB_CUSTOM_DATA.to_string(),
            formats::write_custom_data(entries),
        ),
        ClipboardObject::Data { mime_type, data } => (mime_type.clone(), data.clone()),
    };
    Some(entry)
}
