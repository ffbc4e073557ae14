//! Tip-of-the-day advisory state (spec §6.4's "on disk (advisory)" file).
//!
//! Deliberately thin: the engine (`push`/`merge`/`status`/`clean`) never
//! consults this module, and it holds no opinion about *what* a tip says —
//! §1's Non-goals exclude "tip display" as a feature, so this only tracks
//! which of a small fixed set of one-liners a machine has already seen,
//! leaving `cli` to decide whether and when to print one. Loss of the file
//! is non-fatal: every read/write failure degrades to "show nothing" rather
//! than surfacing an error.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const FILE_NAME: &str = "jaspr-tips-seen.json";

/// A tip's stable key and the text shown the first time it's picked.
pub struct Tip {
    pub key: &'static str,
    pub text: &'static str,
}

pub const TIPS: &[Tip] = &[
    Tip {
        key: "count-flag",
        text: "tip: `--count N` pushes/merges only the bottom N commits of the stack; negative N counts from the top.",
    },
    Tip {
        key: "named-stacks",
        text: "tip: `jaspr stack checkout NAME` switches between named stacks without losing track of their remotes.",
    },
    Tip {
        key: "dont-push-pattern",
        text: "tip: prefix a commit subject with `wip`/`draft`/`dont-push` to keep it local — jaspr won't push it or anything above it.",
    },
];

#[derive(Debug, Default, Serialize, Deserialize)]
struct TipState {
    seen: BTreeSet<String>,
}

/// Tracks which tips this machine has already been shown.
pub struct TipTracker {
    path: PathBuf,
    state: TipState,
}

impl TipTracker {
    /// Load the tracker from the system temp dir, or start empty if the file
    /// is missing, unreadable, or malformed.
    pub fn load() -> Self {
        let path = std::env::temp_dir().join(FILE_NAME);
        let state = fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self { path, state }
    }

    /// Pick the first not-yet-shown tip, if any, and mark it shown.
    pub fn next_unseen(&mut self) -> Option<&'static str> {
        let tip = TIPS.iter().find(|t| !self.state.seen.contains(t.key))?;
        self.state.seen.insert(tip.key.to_string());
        Some(tip.text)
    }

    /// Best-effort persist; a failure here is swallowed, matching the
    /// "loss is non-fatal" contract for this file.
    pub fn save(&self) {
        if let Ok(content) = serde_json::to_string(&self.state) {
            let _ = fs::write(&self.path, content);
        }
    }
}
