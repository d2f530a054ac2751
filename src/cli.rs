use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use clipbridge::backend::ClipboardBuffer;
use clipbridge::bridge::BridgeConfig;
use clipbridge::clipboard::ClipboardConfig;

#[derive(Parser)]
#[command(name = "clipbridge", about = "Blocking clipboard access over an asynchronous clipboard")]
pub struct Cli {
    /// Platform clipboard to talk to
    #[arg(long, value_enum, default_value_t = BackendKind::Service, global = true)]
    pub backend: BackendKind,

    /// Clipboard service socket (default: $XDG_RUNTIME_DIR/clipbridge/service.sock)
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Give up on an unanswered request after this many milliseconds
    #[arg(long, default_value_t = 1000, global = true)]
    pub timeout_ms: u64,

    /// Check for an expired request this often, in milliseconds
    #[arg(
        long,
        default_value_t = 100,
        global = true,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_ms: u64,

    /// Enable the selection (middle-click) buffer
    #[arg(long, global = true)]
    pub selection: bool,

    /// Target the selection buffer instead of copy/paste
    #[arg(long, global = true)]
    pub primary: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// The clipbridge clipboard service
    Service,
    /// The X11 clipboard through xclip
    Xclip,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the clipboard service daemon
    Service,
    #[command(flatten)]
    Clipboard(ClipboardCommand),
}

#[derive(Subcommand, Clone)]
pub enum ClipboardCommand {
    /// List the advertised MIME types
    Types,
    /// Check whether a MIME type is advertised
    Has { mime_type: String },
    /// Print the clipboard text
    ReadText,
    /// Print the clipboard HTML
    ReadHtml,
    /// Write the clipboard RTF to stdout
    ReadRtf,
    /// Write the copy/paste payload for a MIME type to stdout
    Read { mime_type: String },
    /// Save the clipboard image as a PNG file
    ReadImage { path: PathBuf },
    /// Put text on the clipboard
    WriteText { text: String },
    /// Put HTML on the clipboard
    WriteHtml {
        markup: String,

        /// Source URL of the markup
        #[arg(long)]
        url: Option<String>,
    },
    /// Put stdin on the clipboard under a MIME type
    Write { mime_type: String },
    /// Empty the clipboard
    Clear,
    /// Print the service's clipboard sequence number
    Seq,
}

impl Cli {
    pub fn clipboard_config(&self) -> ClipboardConfig {
        ClipboardConfig {
            bridge: BridgeConfig {
                request_timeout: Duration::from_millis(self.timeout_ms),
                abort_poll_interval: Duration::from_millis(self.poll_ms),
            },
            selection_support: self.selection,
        }
    }

    pub fn buffer(&self) -> ClipboardBuffer {
        if self.primary {
            ClipboardBuffer::Selection
        } else {
            ClipboardBuffer::CopyPaste
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bridge_defaults() {
        let cli = Cli::try_parse_from(["clipbridge", "types"]).unwrap();
        assert_eq!(cli.backend, BackendKind::Service);
        assert_eq!(cli.clipboard_config(), ClipboardConfig::default());
        assert_eq!(cli.buffer(), ClipboardBuffer::CopyPaste);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "clipbridge",
            "read-text",
            "--backend",
            "xclip",
            "--timeout-ms",
            "250",
            "--poll-ms",
            "10",
            "--selection",
            "--primary",
        ])
        .unwrap();
        assert_eq!(cli.backend, BackendKind::Xclip);
        let config = cli.clipboard_config();
        assert_eq!(config.bridge.request_timeout, Duration::from_millis(250));
        assert_eq!(config.bridge.abort_poll_interval, Duration::from_millis(10));
        assert!(config.selection_support);
        assert_eq!(cli.buffer(), ClipboardBuffer::Selection);
    }

    #[test]
    fn subcommand_arguments() {
        let cli = Cli::try_parse_from(["clipbridge", "write-html", "<b>x</b>", "--url", "https://a.b/"]).unwrap();
        match cli.command {
            Command::Clipboard(ClipboardCommand::WriteHtml { markup, url }) => {
                assert_eq!(markup, "<b>x</b>");
                assert_eq!(url.as_deref(), Some("https://a.b/"));
            }
            _ => panic!("expected write-html"),
        }
        assert!(Cli::try_parse_from(["clipbridge", "has"]).is_err());
        assert!(Cli::try_parse_from(["clipbridge", "types", "--poll-ms", "0"]).is_err());
        let cli = Cli::try_parse_from(["clipbridge", "service"]).unwrap();
        assert!(matches!(cli.command, Command::Service));
    }
}
