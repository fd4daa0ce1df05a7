//! Sync-folder selection.

/// Folders we are willing to sync, best first. Gmail's All Mail contains
/// every message exactly once, so it beats INBOX when present; plain
/// servers fall through to INBOX.
pub const FOLDER_PREFERENCE: &[&str] = &["[Gmail]/All Mail", "[Google Mail]/All Mail", "INBOX"];

/// Pick the first preferred folder that the server actually advertises.
pub fn choose_folder(names: &[String]) -> Option<&'static str> {
    FOLDER_PREFERENCE
        .iter()
        .find(|preferred| names.iter().any(|name| name == *preferred))
        .copied()
}
