//! One-shot clipboard commands.
//!
//! Builds an event loop and a [`Clipboard`] facade on the chosen
//! backend, performs a single operation, prints the result and returns.

mod format;

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::rc::Rc;

use image::ImageFormat;

use clipbridge::backend::{
    BackendError, ClipboardBackend, ClipboardBuffer, ServiceBackend, ServiceConnection,
    XclipBackend,
};
use clipbridge::bridge::EventLoop;
use clipbridge::clipboard::{Clipboard, ClipboardObject};

use crate::cli::{BackendKind, Cli, ClipboardCommand};

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
    #[error("the selection buffer is disabled; pass --selection")]
    SelectionDisabled,
    #[error("{0}")]
    NoData(&'static str),
    #[error("raw reads are only served from the copy/paste buffer")]
    CopyPasteOnly,
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Run a clipboard command. Called from `main.rs` for every command
/// except `service`.
pub fn run(cli: &Cli, command: ClipboardCommand) -> Result<(), ClientError> {
    let buffer = cli.buffer();
    if buffer == ClipboardBuffer::Selection && !cli.selection {
        return Err(ClientError::SelectionDisabled);
    }

    let event_loop = Rc::new(EventLoop::new()?);
    let clipboard = Clipboard::new(Rc::clone(&event_loop), cli.clipboard_config());
    let service = attach_backends(&event_loop, &clipboard, cli.backend, cli.socket.clone())?;

    match command {
        ClipboardCommand::Types => format::print_types(&clipboard.read_available_types(buffer)),
        ClipboardCommand::Has { mime_type } => {
            let available = clipboard.is_format_available(&mime_type, buffer);
            format::print_availability(&mime_type, available);
        }
        ClipboardCommand::ReadText => format::print_text(&clipboard.read_text(buffer)),
        ClipboardCommand::ReadHtml => format::print_html(&clipboard.read_html(buffer)),
        ClipboardCommand::ReadRtf => io::stdout().lock().write_all(&clipboard.read_rtf(buffer))?,
        ClipboardCommand::Read { mime_type } => {
            if buffer != ClipboardBuffer::CopyPaste {
                return Err(ClientError::CopyPasteOnly);
            }
            io::stdout().lock().write_all(&clipboard.read_data(&mime_type))?;
        }
        ClipboardCommand::ReadImage { path } => {
            let bitmap = clipboard
                .read_image(buffer)
                .ok_or(ClientError::NoData("no image on the clipboard"))?;
            bitmap.save_with_format(&path, ImageFormat::Png)?;
            format::print_saved(&path, bitmap.width(), bitmap.height());
        }
        ClipboardCommand::WriteText { text } => {
            clipboard.write_objects(buffer, &[ClipboardObject::Text(text)]);
        }
        ClipboardCommand::WriteHtml { markup, url } => {
            clipboard.write_objects(buffer, &[ClipboardObject::Html { markup, url }]);
        }
        ClipboardCommand::Write { mime_type } => {
            let mut data = Vec::new();
            io::stdin().lock().read_to_end(&mut data)?;
            clipboard.write_objects(buffer, &[ClipboardObject::Data { mime_type, data }]);
        }
        ClipboardCommand::Clear => clipboard.clear(buffer),
        ClipboardCommand::Seq => {
            // The bridge only counts this process's offers; the service
            // count is the one shared between clients.
            let connection = service.ok_or(ClientError::NoData(
                "the xclip backend has no clipboard sequence number",
            ))?;
            let number = event_loop
                .run_until(connection.sequence_number(buffer))
                .ok_or(ClientError::NoData("the clipboard service did not report a sequence number"))?;
            println!("{number}");
        }
    }

    Ok(())
}

/// Attach one backend per buffer the clipboard supports. Returns the
/// service connection when the service backend was chosen.
fn attach_backends(
    event_loop: &EventLoop,
    clipboard: &Clipboard,
    kind: BackendKind,
    socket: Option<PathBuf>,
) -> Result<Option<ServiceConnection>, ClientError> {
    let buffers = [ClipboardBuffer::CopyPaste, ClipboardBuffer::Selection]
        .into_iter()
        .filter(|buffer| clipboard.supports(*buffer));

    match kind {
        BackendKind::Service => {
            let path = socket
                .or_else(clipbridge::service::default_socket_path)
                .ok_or(BackendError::NoRuntimeDir)?;
            let connection = event_loop.run_until(ServiceConnection::connect(&path))?;
            for buffer in buffers {
                let backend: Rc<dyn ClipboardBackend> =
                    Rc::new(ServiceBackend::new(&connection, buffer));
                clipboard.set_backend(buffer, backend);
            }
            Ok(Some(connection))
        }
        BackendKind::Xclip => {
            for buffer in buffers {
                let backend: Rc<dyn ClipboardBackend> = Rc::new(XclipBackend::new(buffer)?);
                clipboard.set_backend(buffer, backend);
            }
            Ok(None)
        }
    }
}
