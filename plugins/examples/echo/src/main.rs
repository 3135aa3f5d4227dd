//! Minimal Hearth plugin.
//!
//! Speaks the stdio frame protocol: one JSON object per line, shaped
//! `{"subject", "reply_to", "payload"}`. Announces readiness, answers every
//! relayed command on its reply inbox, mirrors commands carrying a `channel`
//! to `chat.outbound.<channel>` through the runtime's request gateway, and
//! exits on a shutdown control message.
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    #[serde(default)]
    payload: Value,
}

struct Plugin<W: Write> {
    prefix: String,
    out: W,
    next_request: u64,
}

impl<W: Write> Plugin<W> {
    fn send(&mut self, frame: &Frame) -> io::Result<()> {
        let line = serde_json::to_string(frame).map_err(io::Error::other)?;
        writeln!(self.out, "{}", line)?;
        self.out.flush()
    }

    fn ready(&mut self) -> io::Result<()> {
        let frame = Frame {
            subject: format!("{}.ready", self.prefix),
            reply_to: None,
            payload: json!({ "pid": std::process::id() }),
        };
        self.send(&frame)
    }

    /// Returns false once the runtime asked us to stop.
    fn handle(&mut self, frame: Frame) -> io::Result<bool> {
        if frame.subject == format!("{}.control", self.prefix) {
            return Ok(frame.payload["command"] != "shutdown");
        }
        if frame.subject == format!("{}.inbox", self.prefix) {
            if let Some(reply_to) = frame.reply_to.clone() {
                self.send(&Frame {
                    subject: reply_to,
                    reply_to: None,
                    payload: json!({ "echo": frame.payload }),
                })?;
            }
            if let Some(channel) = frame.payload["channel"].as_str() {
                self.next_request += 1;
                let request = Frame {
                    subject: format!("{}.rpc", self.prefix),
                    reply_to: Some(format!("{}.reply.{}", self.prefix, self.next_request)),
                    payload: json!({
                        "op": "publish",
                        "subject": format!("chat.outbound.{}", channel),
                        "payload": { "text": frame.payload["text"].clone() },
                    }),
                };
                self.send(&request)?;
            }
        }
        // Gateway replies and anything else need no action.
        Ok(true)
    }
}

fn main() -> ExitCode {
    let Ok(prefix) = std::env::var("HEARTH_SUBJECT_PREFIX") else {
        eprintln!("HEARTH_SUBJECT_PREFIX is not set; run me under the hearth runtime");
        return ExitCode::FAILURE;
    };
    let stdout = io::stdout();
    let mut plugin = Plugin {
        prefix,
        out: stdout.lock(),
        next_request: 0,
    };
    if let Err(e) = plugin.ready() {
        eprintln!("failed to announce readiness: {}", e);
        return ExitCode::FAILURE;
    }

    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let frame: Frame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                eprintln!("ignoring malformed frame: {}", e);
                continue;
            }
        };
        match plugin.handle(frame) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                eprintln!("stdout closed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
