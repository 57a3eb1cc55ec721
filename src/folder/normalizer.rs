//! Deterministic mapping from an adapter-specific folder descriptor to a
//! canonical name (spec §4.3).

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// A folder as reported by a provider adapter, before normalization.
#[derive(Debug, Clone)]
pub struct RawFolder {
    pub path: String,
    pub provider: String,
    pub special_use: Option<String>,
    pub flags: Vec<String>,
}

const EXCLUSION_SUBSTRINGS: &[&str] = &[
    "[gmail]/all mail",
    "notes",
    "contacts",
    "calendar",
    "tasks",
    "journal",
    "sync issues",
    "local failures",
    "server failures",
    "yammer root",
];

static PROVIDER_DISPLAY_NAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("sentitems", "Sent"),
        ("deleteditems", "Trash"),
        ("junkemail", "Spam"),
        ("archive", "Archive"),
        ("drafts", "Drafts"),
        ("conversation history", "<passthrough>"),
        ("outbox", "<passthrough>"),
    ])
});

static PROVIDER_SCOPED_TABLE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("[gmail]/sent mail", "Sent"),
        ("[gmail]/all mail", "Archive"),
        ("sent items", "Sent"),
    ])
});

/// Resolves a [`RawFolder`] to a canonical name, trying the resolution
/// order in spec order (first match wins). A name that falls through
/// every rule is returned unchanged (passthrough).
pub fn normalize(raw: &RawFolder) -> String {
    let path_lower = raw.path.trim().to_lowercase();

    // 1. Exact INBOX match.
    if path_lower == "inbox" {
        return "INBOX".to_string();
    }

    // 2. RFC 6154 special-use flag.
    if let Some(special) = &raw.special_use {
        if let Some(name) = special_use_to_canonical(special) {
            return name.to_string();
        }
    }

    // 3. Graph/provider canonical display names.
    let collapsed = path_lower.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some(name) = PROVIDER_DISPLAY_NAMES.get(collapsed.as_str()) {
        if *name != "<passthrough>" {
            return name.to_string();
        }
    }

    // 4. IMAP folder flags.
    for flag in &raw.flags {
        if let Some(name) = special_use_to_canonical(flag) {
            return name.to_string();
        }
    }

    // 5. Provider-scoped table.
    if let Some(name) = PROVIDER_SCOPED_TABLE.get(path_lower.as_str()) {
        return name.to_string();
    }

    // 6. Case-insensitive substring heuristics.
    if let Some(name) = substring_heuristic(&path_lower) {
        return name.to_string();
    }

    // 7. Raw path, unchanged.
    raw.path.clone()
}

fn special_use_to_canonical(flag: &str) -> Option<&'static str> {
    match flag.to_lowercase().as_str() {
        "\\sent" => Some("Sent"),
        "\\drafts" => Some("Drafts"),
        "\\trash" => Some("Trash"),
        "\\junk" | "\\spam" => Some("Spam"),
        "\\archive" => Some("Archive"),
        "\\inbox" => Some("INBOX"),
        "\\flagged" | "\\starred" => Some("Starred"),
        _ => None,
    }
}

fn substring_heuristic(path_lower: &str) -> Option<&'static str> {
    const RULES: &[(&str, &str)] = &[
        ("sent", "Sent"),
        ("draft", "Drafts"),
        ("trash", "Trash"),
        ("deleted", "Trash"),
        ("bin", "Trash"),
        ("spam", "Spam"),
        ("junk", "Spam"),
        ("all mail", "Archive"),
        ("archive", "Archive"),
        ("important", "Important"),
        ("starred", "Starred"),
        ("flagged", "Starred"),
    ];
    RULES
        .iter()
        .find(|(needle, _)| path_lower.contains(needle))
        .map(|(_, canonical)| *canonical)
}

/// Whether a folder is eligible for sync at all (spec §4.3 exclusion
/// list). Evaluated against the raw path, lowercased.
///
/// Open question (c) resolved: this is evaluated against the *canonical*
/// name together with the raw path, so a raw path that matches an
/// exclusion substring but normalizes to `INBOX` is still synced.
pub fn should_sync_folder(raw: &RawFolder, canonical: &str) -> bool {
    if canonical == "INBOX" {
        return true;
    }
    let path_lower = raw.path.to_lowercase();
    !EXCLUSION_SUBSTRINGS
        .iter()
        .any(|needle| path_lower.contains(needle))
}

/// Normalizes then filters; callers should use this rather than calling
/// [`normalize`] and [`should_sync_folder`] separately, so the
/// normalize-before-filter ordering (open question c) can't be gotten
/// backwards by accident.
pub fn normalize_and_filter(raw: &RawFolder) -> Option<String> {
    let canonical = normalize(raw);
    should_sync_folder(raw, &canonical).then_some(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(path: &str, provider: &str) -> RawFolder {
        RawFolder {
            path: path.to_string(),
            provider: provider.to_string(),
            special_use: None,
            flags: vec![],
        }
    }

    #[test]
    fn gmail_sent_mail_normalizes_to_sent() {
        assert_eq!(normalize(&raw("[Gmail]/Sent Mail", "gmail")), "Sent");
    }

    #[test]
    fn inbox_is_case_insensitive_exact_match() {
        assert_eq!(normalize(&raw("INBOX", "imap")), "INBOX");
        assert_eq!(normalize(&raw("inbox", "imap")), "INBOX");
    }

    #[test]
    fn special_use_flag_wins_over_substring_heuristics() {
        let mut f = raw("Custom Folder", "imap");
        f.special_use = Some("\\Trash".to_string());
        assert_eq!(normalize(&f), "Trash");
    }

    #[test]
    fn unrecognized_path_passes_through_unchanged() {
        assert_eq!(normalize(&raw("Projects", "imap")), "Projects");
    }

    #[test]
    fn all_mail_is_excluded_to_avoid_duplicates() {
        let f = raw("[Gmail]/All Mail", "gmail");
        let canonical = normalize(&f);
        assert!(!should_sync_folder(&f, &canonical));
    }

    #[test]
    fn inbox_is_never_excluded_even_if_raw_path_matches_exclusion_substring() {
        // Raw path contains "notes" (an exclusion substring) but carries
        // the \Inbox special-use flag, so it normalizes to INBOX —
        // normalize-before-filter ordering (open question c) means it
        // must still be synced.
        let mut f = raw("Notes Folder", "imap");
        f.special_use = Some("\\Inbox".to_string());
        let canonical = normalize(&f);
        assert_eq!(canonical, "INBOX");
        assert!(should_sync_folder(&f, &canonical));
    }
}
