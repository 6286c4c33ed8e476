/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `tasks`: task:{task_id} -> Task (JSON, without file)
/// - `files`: file:{task_id} -> File (JSON, without meta)
/// - `file_meta`: meta:{task_id} -> downloader metadata (JSON)
/// - `tool_versions`: tool:{name} -> ToolVersion (JSON)
///
/// Task ids are UUIDv7 rendered as lowercase hyphenated hex, so key order in
/// `tasks` is creation order.
use uuid::Uuid;

pub const TASK_PREFIX: &str = "task:";

/// Encode a task key: task:{task_id}
pub fn encode_task_key(id: &Uuid) -> Vec<u8> {
    format!("{}{}", TASK_PREFIX, id.hyphenated()).into_bytes()
}

/// Decode a task key: task:{task_id} -> task_id
pub fn decode_task_key(key: &[u8]) -> Option<Uuid> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix(TASK_PREFIX)?.parse().ok()
}

/// Encode a file key: file:{task_id}
pub fn encode_file_key(task_id: &Uuid) -> Vec<u8> {
    format!("file:{}", task_id.hyphenated()).into_bytes()
}

/// Encode a file metadata key: meta:{task_id}
pub fn encode_meta_key(task_id: &Uuid) -> Vec<u8> {
    format!("meta:{}", task_id.hyphenated()).into_bytes()
}

/// Encode a tool version key: tool:{name}
pub fn encode_tool_key(tool: &str) -> Vec<u8> {
    format!("tool:{}", tool).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_key_roundtrip() {
        let id = Uuid::now_v7();
        let key = encode_task_key(&id);
        assert!(key.starts_with(b"task:"));
        assert_eq!(decode_task_key(&key), Some(id));
    }

    #[test]
    fn test_decode_rejects_foreign_keys() {
        assert_eq!(decode_task_key(b"file:123"), None);
        assert_eq!(decode_task_key(b"task:not-a-uuid"), None);
    }

    #[test]
    fn test_task_keys_sort_by_creation() {
        let first = Uuid::now_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = Uuid::now_v7();
        assert!(encode_task_key(&first) < encode_task_key(&second));
    }

    #[test]
    fn test_other_keys() {
        let id = Uuid::nil();
        assert_eq!(
            encode_file_key(&id),
            b"file:00000000-0000-0000-0000-000000000000".to_vec()
        );
        assert!(encode_meta_key(&id).starts_with(b"meta:"));
        assert_eq!(encode_tool_key("yt-dlp"), b"tool:yt-dlp".to_vec());
    }
}
