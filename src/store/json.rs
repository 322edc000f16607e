//! JSON document persistence.
//!
//! Every record in the benchmark is one pretty-printed JSON document in one
//! file. Writes are atomic using a write-to-temp-then-rename pattern:
//!
//! 1. Write to `<name>.json.tmp`
//! 2. fsync the file
//! 3. Rename to `<name>.json`
//! 4. fsync the directory
//!
//! This ensures that readers always see either the old or new document, never
//! a partial write — which is what makes the partition moves of a record
//! (write into the target partition, then delete from the source) safe.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// The file extension used for all persisted records.
pub const JSON_FILE_ENDING: &str = ".json";

/// Errors from reading or writing JSON documents.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("JSON error on {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Reads a JSON document from a file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_str(&contents).map_err(|e| StoreError::json(path, e))
}

/// Writes a JSON document atomically, pretty-printed.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(data).map_err(|e| StoreError::json(path, e))?;

    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        file.write_all(&json).map_err(|e| StoreError::io(&tmp_path, e))?;
        file.sync_all().map_err(|e| StoreError::io(&tmp_path, e))?;
    }
    std::fs::rename(&tmp_path, path).map_err(|e| StoreError::io(path, e))?;

    // A bare file name has an empty parent; nothing to sync there.
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fsync_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    }
    Ok(())
}

/// Syncs a directory to disk, ensuring directory entries (creates, renames,
/// deletes) are durable.
fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}

/// The timestamp wire format used across the dataset: `yyyy-MM-dd HH:mm:ss`
/// in UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses a dataset timestamp string.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).map(|naive| naive.and_utc())
}

/// Formats a timestamp in the dataset wire format.
pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

/// Serde adapter for `DateTime<Utc>` fields in the dataset wire format.
pub mod timestamp {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_timestamp(&s).map_err(serde::de::Error::custom)
    }

    /// Same format for `Option<DateTime<Utc>>` fields.
    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            t: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => serializer.serialize_some(&format_timestamp(t)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let s: Option<String> = Option::deserialize(deserializer)?;
            s.map(|s| parse_timestamp(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc {
            name: "jetty".to_string(),
            count: 3,
        };

        write_json(&path, &doc).unwrap();
        let read: Doc = read_json(&path).unwrap();
        assert_eq!(read, doc);
    }

    #[test]
    fn write_is_pretty_printed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json(
            &path,
            &Doc {
                name: "x".to_string(),
                count: 1,
            },
        )
        .unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains('\n'), "expected multi-line output: {raw}");
    }

    #[test]
    fn overwrite_replaces_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json(
            &path,
            &Doc {
                name: "a".to_string(),
                count: 1,
            },
        )
        .unwrap();
        write_json(
            &path,
            &Doc {
                name: "b".to_string(),
                count: 2,
            },
        )
        .unwrap();
        let read: Doc = read_json(&path).unwrap();
        assert_eq!(read.name, "b");
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json(
            &path,
            &Doc {
                name: "a".to_string(),
                count: 1,
            },
        )
        .unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["doc.json"]);
    }

    #[test]
    fn read_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result: Result<Doc, _> = read_json(&dir.path().join("nope.json"));
        assert!(matches!(result, Err(StoreError::Io { .. })));
    }

    #[test]
    fn timestamp_format_roundtrip() {
        let t = parse_timestamp("2023-02-14 09:30:00").unwrap();
        assert_eq!(format_timestamp(&t), "2023-02-14 09:30:00");
    }

    #[test]
    fn timestamp_serde_adapter() {
        #[derive(Serialize, Deserialize)]
        struct Stamped {
            #[serde(with = "timestamp")]
            at: DateTime<Utc>,
        }

        let json = r#"{"at":"2023-02-14 09:30:00"}"#;
        let parsed: Stamped = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
    }

    #[test]
    fn map_documents_keep_key_order() {
        // The repository index is a map document; BTreeMap keeps the output
        // diff-friendly across rewrites.
        let dir = tempdir().unwrap();
        let path = dir.path().join("map.json");
        let mut map = BTreeMap::new();
        map.insert("b/x".to_string(), 1);
        map.insert("a/y".to_string(), 2);
        write_json(&path, &map).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.find("a/y").unwrap() < raw.find("b/x").unwrap());
    }
}
