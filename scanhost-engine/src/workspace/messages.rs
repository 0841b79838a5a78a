//! Product message files

use scanhost_core::domain::message::JobMessage;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Reads all `*.json` message files of the folder, ordered by file name
///
/// Unreadable or malformed files are skipped with a warning. A missing folder
/// yields no messages.
pub fn collect_messages(folder: &Path) -> Vec<JobMessage> {
    let Ok(entries) = fs::read_dir(folder) else {
        return Vec::new();
    };

    let mut files: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    files
        .iter()
        .filter_map(|path| {
            let parsed = fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    serde_json::from_str::<JobMessage>(&content).map_err(|e| e.to_string())
                });

            match parsed {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("Skipping message file {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanhost_core::domain::message::MessageType;
    use tempfile::TempDir;

    #[test]
    fn test_collects_valid_messages_in_name_order() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("b.json"),
            r#"{"type":"ERROR","text":"second"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("a.json"), r#"{"type":"INFO","text":"first"}"#).unwrap();
        fs::write(dir.path().join("c.json"), "not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let messages = collect_messages(dir.path());

        assert_eq!(
            messages,
            vec![
                JobMessage::new(MessageType::Info, "first"),
                JobMessage::new(MessageType::Error, "second"),
            ]
        );
    }

    #[test]
    fn test_missing_folder_yields_nothing() {
        assert!(collect_messages(Path::new("/definitely/not/here")).is_empty());
    }
}
