//! MIDI-CI traffic sniffer
//!
//! Prints every message crossing a loopback session as
//! `[timestamp] DIR | HEX => summary`, and decodes single messages for the
//! `--decode` command.

use colored::*;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use crate::ci::{decode, CiMessage, Message};
use crate::loopback::{Direction, TapFn};
use crate::midi::{format_hex, strip_sysex};
use crate::property::header::{ReplyHeader, RequestHeader};

impl Direction {
    fn display(&self) -> ColoredString {
        match self {
            Direction::ToResponder => "I->R".green(),
            Direction::ToInitiator => "R->I".cyan(),
        }
    }
}

/// CLI sniffer implementation
#[derive(Debug, Clone)]
pub struct TrafficSniffer {
    start_time: Instant,
    /// Hex dumps longer than this are cut
    max_hex_bytes: usize,
}

impl Default for TrafficSniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficSniffer {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            max_hex_bytes: 32,
        }
    }

    /// Print the column legend
    pub fn print_banner(&self) {
        println!("{}", "=== MIDI-CI Sniffer ===".bold().cyan());
        println!("{}", "Format: [timestamp] DIR | HEX => PARSED".dimmed());
        println!("{}", "─".repeat(80).dimmed());
    }

    /// Loopback tap printing every message
    pub fn tap(self) -> TapFn {
        Arc::new(move |direction: Direction, bytes: &[u8]| {
            println!("{}", self.format_event(direction, bytes));
        })
    }

    pub fn format_event(&self, direction: Direction, bytes: &[u8]) -> String {
        let timestamp = format!("{:08}", self.start_time.elapsed().as_millis());

        let hex = if bytes.len() > self.max_hex_bytes {
            format!("{} ...", format_hex(&bytes[..self.max_hex_bytes]))
        } else {
            format_hex(bytes)
        };

        match decode(bytes) {
            Ok(msg) => {
                let hex_colored = match msg.sub_id().as_byte() {
                    0x7F => hex.bright_red(),
                    0x20..=0x2F => hex.bright_yellow(),
                    0x30..=0x3F => hex.bright_cyan(),
                    0x40..=0x44 => hex.bright_blue(),
                    _ => hex.bright_magenta(),
                };
                format!(
                    "[{}] {} | {} => {} {}",
                    timestamp.dimmed(),
                    direction.display(),
                    hex_colored,
                    msg.sub_id().to_string().bold(),
                    msg.summary().bright_blue()
                )
            }
            Err(err) => format!(
                "[{}] {} | {} => {}",
                timestamp.dimmed(),
                direction.display(),
                hex.bright_black(),
                err.to_string().red()
            ),
        }
    }
}

/// Multi-line description of one message, with or without F0/F7
pub fn describe_message(bytes: &[u8]) -> String {
    let payload = strip_sysex(bytes);
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", "Bytes:".bold(), format_hex(payload));
    match decode(payload) {
        Ok(msg) => {
            let _ = writeln!(out, "{} {}", "Kind:".bold(), msg.sub_id());
            let _ = writeln!(
                out,
                "{} address {:#04X}, version {:#04X}, {} -> {}",
                "Header:".bold(),
                msg.header.address,
                msg.header.version,
                msg.header.source,
                msg.header.destination
            );
            let _ = writeln!(out, "{} {}", "Summary:".bold(), msg.summary());
            if let Some(text) = property_detail(&msg) {
                let _ = writeln!(out, "{} {}", "Property:".bold(), text);
            }
            let _ = write!(out, "{:#?}", msg.message);
        }
        Err(err) => {
            let _ = write!(out, "{} {}", "Not decodable:".red().bold(), err);
        }
    }
    out
}

/// Readable header of a Property Exchange chunk
fn property_detail(msg: &CiMessage) -> Option<String> {
    let chunk = msg.message.property_chunk()?;
    if chunk.header.is_empty() {
        return Some(format!(
            "request {} chunk {}/{} ({} body bytes)",
            chunk.request_id,
            chunk.chunk_index,
            chunk.num_chunks,
            chunk.data.len()
        ));
    }
    let header_text = String::from_utf8_lossy(&chunk.header).into_owned();
    let kind = match &msg.message {
        Message::GetPropertyDataReply(_)
        | Message::SetPropertyDataReply(_)
        | Message::SubscribePropertyReply(_) => ReplyHeader::parse(&chunk.header)
            .map(|h| format!("status {}", h.status))
            .ok(),
        _ => RequestHeader::parse(&chunk.header)
            .map(|h| format!("resource {}", h.resource))
            .ok(),
    };
    Some(format!(
        "request {} chunk {}/{} {} {}",
        chunk.request_id,
        chunk.chunk_index,
        chunk.num_chunks,
        kind.unwrap_or_default(),
        header_text
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::{encode, Muid};

    fn plain() {
        colored::control::set_override(false);
    }

    fn nak_bytes() -> Vec<u8> {
        let msg = CiMessage::not_supported(
            &crate::ci::Header::new(
                0x7F,
                Muid::from_u28(0x12345).unwrap(),
                Muid::from_u28(0x6789A).unwrap(),
            ),
            Muid::from_u28(0x6789A).unwrap(),
            0x10,
        );
        encode(&msg).unwrap()
    }

    #[test]
    fn test_format_event_line() {
        plain();
        let sniffer = TrafficSniffer::new();
        let line = sniffer.format_event(Direction::ToInitiator, &nak_bytes());
        assert!(line.starts_with('['));
        assert!(line.contains("R->I | 7E 7F 0D 7F 02"));
        assert!(line.contains("=> Nak"));
    }

    #[test]
    fn test_garbage_is_shown_not_hidden() {
        plain();
        let line = TrafficSniffer::new().format_event(Direction::ToResponder, &[0x01, 0x02]);
        assert!(line.contains("I->R | 01 02 =>"));
    }

    #[test]
    fn test_describe_accepts_sysex_framing() {
        plain();
        let framed = crate::midi::wrap_sysex(&nak_bytes());
        let text = describe_message(&framed);
        assert!(text.contains("Kind: Nak"));
        assert!(text.contains("original_sub_id: 16"));
    }
}
