//! Message transport. The daemon itself is channel-agnostic: messages
//! arrive and leave as JSON files in spool directories, and whatever
//! bridges a real channel (mail, chat, a phone shortcut) only has to read
//! and write files.
//!
//! Layout under the spool root:
//!   inbox/    one JSON file per inbound message
//!   outbox/   one JSON file per outbound message, written by us
//!   handled/  processed inbound files, moved here after the chain ends
//!
//! An inbound file is moved to handled/ only after its chain finishes or
//! fails terminally. A chain aborted by backend unavailability leaves the
//! file in inbox/ so the next poll retries it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::tool_args::now_epoch;
use crate::types::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct InboundMessage {
    pub(crate) thread_token: String,
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) received_at: i64,
}

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    thread_token: &'a str,
    text: &'a str,
    sent_at: i64,
}

pub(crate) trait MessageTransport: Send {
    /// Inbound messages waiting to be processed, oldest first.
    fn poll(&self) -> Result<Vec<(PathBuf, InboundMessage)>, CoreError>;
    /// Retire a processed inbound file.
    fn mark_handled(&self, source: &Path) -> Result<(), CoreError>;
    fn send(&self, thread_token: &str, text: &str) -> Result<(), CoreError>;
}

pub(crate) struct SpoolTransport {
    root: PathBuf,
}

impl SpoolTransport {
    pub(crate) fn new(root: PathBuf) -> Result<Self, CoreError> {
        for sub in ["inbox", "outbox", "handled"] {
            std::fs::create_dir_all(root.join(sub))
                .map_err(|e| CoreError::Store(format!("create spool dir {sub}: {e}")))?;
        }
        Ok(SpoolTransport { root })
    }

    fn inbox(&self) -> PathBuf {
        self.root.join("inbox")
    }
}

impl MessageTransport for SpoolTransport {
    fn poll(&self) -> Result<Vec<(PathBuf, InboundMessage)>, CoreError> {
        let mut found = Vec::new();
        for entry in WalkDir::new(self.inbox()).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| CoreError::Store(format!("scan inbox: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match std::fs::read_to_string(path) {
                Ok(raw) => raw,
                // A bridge may still be writing the file; pick it up next poll.
                Err(_) => continue,
            };
            match serde_json::from_str::<InboundMessage>(&raw) {
                Ok(msg) => found.push((path.to_path_buf(), msg)),
                Err(e) => {
                    eprintln!("[transport] skipping malformed {}: {e}", path.display());
                    // Quarantine so one bad file cannot wedge the inbox.
                    let _ = std::fs::rename(
                        path,
                        self.root.join("handled").join(format!(
                            "malformed-{}",
                            path.file_name().and_then(|n| n.to_str()).unwrap_or("msg.json")
                        )),
                    );
                }
            }
        }
        found.sort_by_key(|(_, msg)| msg.received_at);
        Ok(found)
    }

    fn mark_handled(&self, source: &Path) -> Result<(), CoreError> {
        let name = source
            .file_name()
            .ok_or_else(|| CoreError::Store("inbound path has no file name".into()))?;
        std::fs::rename(source, self.root.join("handled").join(name))
            .map_err(|e| CoreError::Store(format!("retire {}: {e}", source.display())))
    }

    fn send(&self, thread_token: &str, text: &str) -> Result<(), CoreError> {
        let sent_at = now_epoch();
        let msg = OutboundMessage {
            thread_token,
            text,
            sent_at,
        };
        let json = serde_json::to_string_pretty(&msg)
            .map_err(|e| CoreError::Store(format!("encode outbound: {e}")))?;
        let name = format!(
            "out-{sent_at}-{}.json",
            crate::types::derive_id("m", thread_token, sent_at)
        );
        std::fs::write(self.root.join("outbox").join(name), json)
            .map_err(|e| CoreError::Store(format!("write outbound: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_spool(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("aura_test")
            .join(format!("spool_{}_{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn drop_inbound(root: &Path, file: &str, token: &str, text: &str, at: i64) {
        let msg = InboundMessage {
            thread_token: token.to_string(),
            text: text.to_string(),
            received_at: at,
        };
        std::fs::write(
            root.join("inbox").join(file),
            serde_json::to_string(&msg).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_poll_orders_by_received_at() {
        let root = temp_spool("order");
        let transport = SpoolTransport::new(root.clone()).unwrap();
        drop_inbound(&root, "b.json", "t1", "second", 200);
        drop_inbound(&root, "a.json", "t1", "first", 100);

        let msgs = transport.poll().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].1.text, "first");
        assert_eq!(msgs[1].1.text, "second");
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_handled_messages_leave_the_inbox() {
        let root = temp_spool("handled");
        let transport = SpoolTransport::new(root.clone()).unwrap();
        drop_inbound(&root, "a.json", "t1", "hello", 100);

        let msgs = transport.poll().unwrap();
        transport.mark_handled(&msgs[0].0).unwrap();
        assert!(transport.poll().unwrap().is_empty());
        assert!(root.join("handled").join("a.json").exists());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_malformed_file_is_quarantined() {
        let root = temp_spool("malformed");
        let transport = SpoolTransport::new(root.clone()).unwrap();
        std::fs::write(root.join("inbox").join("bad.json"), "{not json").unwrap();
        drop_inbound(&root, "good.json", "t1", "hello", 100);

        let msgs = transport.poll().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].1.text, "hello");
        // The bad file no longer blocks subsequent polls.
        assert!(!root.join("inbox").join("bad.json").exists());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_send_writes_outbox() {
        let root = temp_spool("send");
        let transport = SpoolTransport::new(root.clone()).unwrap();
        transport.send("t9", "your note is saved").unwrap();

        let files: Vec<_> = std::fs::read_dir(root.join("outbox"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(files.len(), 1);
        let raw = std::fs::read_to_string(files[0].path()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["thread_token"], "t9");
        assert_eq!(v["text"], "your note is saved");
        std::fs::remove_dir_all(&root).ok();
    }
}
