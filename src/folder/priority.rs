//! Folder sync ordering (spec §4.3). Higher priority folders sync first
//! so partial progress under crash surfaces the most useful mail.

pub fn priority(canonical: &str) -> i32 {
    match canonical {
        "INBOX" => 100,
        "Sent" => 90,
        "Drafts" => 80,
        "Important" => 75,
        "Archive" => 70,
        "Spam" => 50,
        "Trash" => 40,
        _ => 60,
    }
}

/// Sorts already-canonical folder names by priority, stable on ties
/// (spec §4.7.2: "apply `shouldSyncFolder` exclusion then priority
/// sort"). Callers must normalize before sorting — this does not
/// re-derive a canonical name from a raw path.
pub fn sort_by_priority(folders: &mut [String]) {
    folders.sort_by_key(|canonical| std::cmp::Reverse(priority(canonical)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_canonical_names_by_priority() {
        let mut folders = vec![
            "Trash".to_string(),
            "INBOX".to_string(),
            "Projects".to_string(),
            "Sent".to_string(),
        ];
        sort_by_priority(&mut folders);
        assert_eq!(
            folders,
            vec![
                "INBOX".to_string(),
                "Sent".to_string(),
                "Projects".to_string(),
                "Trash".to_string(),
            ]
        );
    }
}
