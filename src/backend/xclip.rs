//! X11 clipboard backend — transfers via `xclip`, ownership via x11rb.
//!
//! Every transfer is an `xclip` subprocess driven by a `spawn_local`
//! task, so the callback fires on the event loop once the process exits.
//! xclip serves one target per invocation: an offer advertises
//! `text/plain` when present, otherwise the first MIME type by name.
//! The bridge keeps the full offered map and answers our own reads from
//! it, so only other applications see the reduced offer.

use std::cell::Cell;
use std::process::Stdio;
use std::rc::Rc;

use x11rb::protocol::xproto::{self, Atom, AtomEnum, Window};
use x11rb::rust_connection::RustConnection;

use super::{
    BackendError, ClipboardBackend, ClipboardBuffer, DataMap, DataReceived, MimeTypesReceived,
    OfferDone,
};
use crate::clipboard::formats::MIME_TEXT;

/// Targets every X11 selection owner advertises that are not data.
const META_TARGETS: &[&str] = &["TARGETS", "TIMESTAMP", "MULTIPLE", "SAVE_TARGETS"];

/// X11 text targets reported to callers as `text/plain`.
const TEXT_TARGETS: &[&str] = &["UTF8_STRING", "STRING", "TEXT", "text/plain;charset=utf-8"];

pub struct XclipBackend {
    conn: Rc<RustConnection>,
    buffer: ClipboardBuffer,
    selection: Atom,
    /// Selection owner window recorded right after our last offer.
    offered_owner: Rc<Cell<Option<Window>>>,
}

impl XclipBackend {
    /// Connect to the X display named by `$DISPLAY`.
    pub fn new(buffer: ClipboardBuffer) -> Result<Self, BackendError> {
        let (conn, _screen_num) = RustConnection::connect(None)
            .map_err(|e| BackendError::X11(format!("connect failed: {e}")))?;

        let selection = match buffer {
            ClipboardBuffer::CopyPaste => {
                xproto::intern_atom(&conn, false, b"CLIPBOARD")
                    .map_err(|e| BackendError::X11(format!("intern_atom: {e}")))?
                    .reply()
                    .map_err(|e| BackendError::X11(format!("intern_atom reply: {e}")))?
                    .atom
            }
            ClipboardBuffer::Selection => AtomEnum::PRIMARY.into(),
        };

        Ok(Self {
            conn: Rc::new(conn),
            buffer,
            selection,
            offered_owner: Rc::new(Cell::new(None)),
        })
    }
}

impl ClipboardBackend for XclipBackend {
    fn is_selection_owner(&self) -> bool {
        match self.offered_owner.get() {
            Some(ours) => current_owner(&self.conn, self.selection) == Some(ours),
            None => false,
        }
    }

    fn offer_clipboard_data(&self, data: DataMap, on_done: OfferDone) {
        let (target, bytes) = pick_offer_target(data);
        let args = xclip_args(self.buffer, target.as_deref(), "-i");
        let conn = Rc::clone(&self.conn);
        let selection = self.selection;
        let offered_owner = Rc::clone(&self.offered_owner);

        tokio::task::spawn_local(async move {
            match write_selection(&args, &bytes).await {
                Ok(()) => {
                    offered_owner.set(current_owner(&conn, selection));
                    on_done();
                }
                // Dropping on_done leaves the offer unacknowledged.
                Err(e) => tracing::warn!(error = %e, "xclip offer failed"),
            }
        });
    }

    fn request_clipboard_data(&self, mime_type: &str, on_done: DataReceived) {
        let target = if mime_type == MIME_TEXT { "UTF8_STRING" } else { mime_type };
        let args = xclip_args(self.buffer, Some(target), "-o");
        let mime_type = mime_type.to_string();

        tokio::task::spawn_local(async move {
            let data = match read_selection(&args).await {
                Ok(bytes) if !bytes.is_empty() => DataMap::from([(mime_type, bytes)]),
                Ok(_) => DataMap::new(),
                Err(e) => {
                    tracing::debug!(error = %e, mime_type = %mime_type, "xclip read failed");
                    DataMap::new()
                }
            };
            on_done(data);
        });
    }

    fn get_available_mime_types(&self, on_done: MimeTypesReceived) {
        let args = xclip_args(self.buffer, Some("TARGETS"), "-o");

        tokio::task::spawn_local(async move {
            let types = match read_selection(&args).await {
                Ok(bytes) => parse_targets(&String::from_utf8_lossy(&bytes)),
                Err(e) => {
                    tracing::debug!(error = %e, "xclip TARGETS failed");
                    Vec::new()
                }
            };
            on_done(types);
        });
    }
}

fn current_owner(conn: &RustConnection, selection: Atom) -> Option<Window> {
    let owner = xproto::get_selection_owner(conn, selection)
        .ok()?
        .reply()
        .ok()?
        .owner;
    (owner != x11rb::NONE).then_some(owner)
}

/// Choose the single target xclip will serve. `None` lets xclip offer its
/// default text targets.
fn pick_offer_target(mut data: DataMap) -> (Option<String>, Vec<u8>) {
    if let Some(text) = data.remove(MIME_TEXT) {
        if !data.is_empty() {
            tracing::debug!(dropped = data.len(), "xclip offers text only");
        }
        return (None, text);
    }
    let Some(first) = data.keys().min().cloned() else {
        return (None, Vec::new());
    };
    let bytes = data.remove(&first).unwrap_or_default();
    if !data.is_empty() {
        tracing::debug!(mime_type = %first, dropped = data.len(), "xclip offers one target");
    }
    (Some(first), bytes)
}

fn xclip_args(buffer: ClipboardBuffer, target: Option<&str>, direction: &str) -> Vec<String> {
    let selection = match buffer {
        ClipboardBuffer::CopyPaste => "clipboard",
        ClipboardBuffer::Selection => "primary",
    };
    let mut args = vec!["-selection".to_string(), selection.to_string()];
    if let Some(target) = target {
        args.push("-t".into());
        args.push(target.into());
    }
    args.push(direction.into());
    args
}

/// MIME types from `xclip -t TARGETS -o` output, meta targets removed and
/// X11 text targets folded into `text/plain`.
fn parse_targets(output: &str) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for target in output.lines().map(str::trim).filter(|t| !t.is_empty()) {
        if META_TARGETS.contains(&target) {
            continue;
        }
        let mime_type = if TEXT_TARGETS.contains(&target) { MIME_TEXT } else { target };
        if !types.iter().any(|known| known == mime_type) {
            types.push(mime_type.to_string());
        }
    }
    types
}

async fn write_selection(args: &[String], content: &[u8]) -> Result<(), String> {
    use tokio::io::AsyncWriteExt;
    use tokio::process::Command;

    let mut child = Command::new("xclip")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn xclip: {e}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(content)
            .await
            .map_err(|e| format!("failed to write to xclip: {e}"))?;
        // Dropping stdin closes the pipe so xclip can take the selection.
    }

    let status = child
        .wait()
        .await
        .map_err(|e| format!("failed to wait for xclip: {e}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("xclip exited with status {status}"))
    }
}

async fn read_selection(args: &[String]) -> Result<Vec<u8>, String> {
    let output = tokio::process::Command::new("xclip")
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| format!("failed to spawn xclip -o: {e}"))?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(format!("xclip -o exited with status {}", output.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_drop_meta_and_fold_text() {
        let output = "TIMESTAMP\nTARGETS\nMULTIPLE\nUTF8_STRING\nSTRING\ntext/html\nimage/png\n\n";
        assert_eq!(parse_targets(output), vec!["text/plain", "text/html", "image/png"]);
    }

    #[test]
    fn empty_targets_output() {
        assert!(parse_targets("").is_empty());
        assert!(parse_targets("TARGETS\nSAVE_TARGETS\n").is_empty());
    }

    #[test]
    fn text_is_preferred_for_offers() {
        let data = DataMap::from([
            ("text/html".to_string(), b"<b>x</b>".to_vec()),
            ("text/plain".to_string(), b"x".to_vec()),
        ]);
        assert_eq!(pick_offer_target(data), (None, b"x".to_vec()));
    }

    #[test]
    fn non_text_offer_uses_first_type_by_name() {
        let data = DataMap::from([
            ("text/rtf".to_string(), b"{\\rtf1}".to_vec()),
            ("image/png".to_string(), vec![0x89]),
        ]);
        assert_eq!(
            pick_offer_target(data),
            (Some("image/png".to_string()), vec![0x89])
        );
        assert_eq!(pick_offer_target(DataMap::new()), (None, Vec::new()));
    }

    #[test]
    fn args_name_selection_and_target() {
        assert_eq!(
            xclip_args(ClipboardBuffer::CopyPaste, Some("TARGETS"), "-o"),
            vec!["-selection", "clipboard", "-t", "TARGETS", "-o"]
        );
        assert_eq!(
            xclip_args(ClipboardBuffer::Selection, None, "-i"),
            vec!["-selection", "primary", "-i"]
        );
    }
}
