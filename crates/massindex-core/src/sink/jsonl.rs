//! JSON-lines index on the local filesystem
//!
//! Layout under the output directory:
//!
//! ```text
//! <dir>/<entity>/partition-<n>.jsonl   one file per partition, appended per chunk
//! <dir>/<entity>.jsonl                 merged and de-duplicated by `optimize`
//! ```
//!
//! `<entity>` is the entity type name escaped into a single path segment (see
//! [`file_stem`]), so names like `../x` or `a/b` stay inside the output directory.

use async_trait::async_trait;
use massindex_common::types::{Entity, EntityId};
use serde_jsonlines::{append_json_lines, json_lines, write_json_lines};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::IndexSink;
use crate::error::SinkError;
use crate::planner::PartitionSpec;

#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    dir: PathBuf,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entity_dir(&self, entity_type: &str) -> PathBuf {
        self.dir.join(file_stem(entity_type))
    }

    pub fn partition_file(&self, entity_type: &str, partition_index: usize) -> PathBuf {
        self.entity_dir(entity_type)
            .join(format!("partition-{partition_index}.jsonl"))
    }

    pub fn merged_file(&self, entity_type: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", file_stem(entity_type)))
    }
}

/// Escape an entity type name into one file name component.
///
/// Bytes outside `[A-Za-z0-9_.-]` and a leading `.` become `%XX`; the empty name
/// becomes `%`, which no escaped name can produce.
pub fn file_stem(entity_type: &str) -> String {
    if entity_type.is_empty() {
        return "%".to_string();
    }
    let mut stem = String::with_capacity(entity_type.len());
    for (i, byte) in entity_type.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-') || (byte == b'.' && i > 0);
        if plain {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

async fn blocking<T, F>(f: F) -> Result<T, SinkError>
where
    F: FnOnce() -> Result<T, SinkError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SinkError::Backend(format!("blocking task failed: {e}")))?
}

/// Merge every partition file of one entity type, keeping the last document per id
fn merge_entity(entity_dir: &Path, merged: &Path) -> Result<usize, SinkError> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(entity_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    files.sort();

    let mut latest: BTreeMap<EntityId, Entity> = BTreeMap::new();
    for file in &files {
        for entity in json_lines(file)? {
            let entity: Entity = entity?;
            latest.insert(entity.id.clone(), entity);
        }
    }

    write_json_lines(merged, latest.values())?;
    Ok(latest.len())
}

#[async_trait]
impl IndexSink for JsonLinesSink {
    async fn purge(&self, entity_types: &[String]) -> Result<(), SinkError> {
        let targets: Vec<(PathBuf, PathBuf)> = entity_types
            .iter()
            .map(|e| (self.entity_dir(e), self.merged_file(e)))
            .collect();

        blocking(move || {
            for (dir, merged) in targets {
                match std::fs::remove_dir_all(&dir) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                match std::fs::remove_file(&merged) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        })
        .await?;

        info!(dir = %self.dir.display(), entity_types = ?entity_types, "Purged index");
        Ok(())
    }

    async fn write(&self, partition: &PartitionSpec, entities: Vec<Entity>) -> Result<(), SinkError> {
        if entities.is_empty() {
            return Ok(());
        }
        let dir = self.entity_dir(&partition.entity_type);
        let file = self.partition_file(&partition.entity_type, partition.index);
        let count = entities.len();

        blocking(move || {
            std::fs::create_dir_all(&dir)?;
            append_json_lines(&file, entities)?;
            Ok(())
        })
        .await?;

        debug!(partition_index = partition.index, count, "Chunk written");
        Ok(())
    }

    async fn optimize(&self, entity_types: &[String]) -> Result<(), SinkError> {
        for entity_type in entity_types {
            let entity_dir = self.entity_dir(entity_type);
            let merged = self.merged_file(entity_type);
            let documents = blocking(move || merge_entity(&entity_dir, &merged)).await?;
            info!(entity_type = %entity_type, documents, "Optimized index");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use massindex_common::types::PartitionBoundary;
    use serde_json::json;
    use tempfile::TempDir;

    fn partition(index: usize) -> PartitionSpec {
        PartitionSpec {
            index,
            entity_type: "Employee".to_string(),
            boundary: PartitionBoundary::unbounded(),
        }
    }

    fn entity(id: i64, name: &str) -> Entity {
        Entity {
            entity_type: "Employee".to_string(),
            id: EntityId::Int(id),
            document: json!({ "id": id, "name": name }),
        }
    }

    #[test]
    fn test_file_stem_keeps_names_in_one_segment() {
        assert_eq!(file_stem("Employee"), "Employee");
        assert_eq!(file_stem("public.company"), "public.company");
        assert_eq!(file_stem(".."), "%2E.");
        assert_eq!(file_stem("../etc"), "%2E.%2Fetc");
        assert_eq!(file_stem("a/b\\c"), "a%2Fb%5Cc");
        assert_eq!(file_stem("50%"), "50%25");
        assert_eq!(file_stem(""), "%");
    }

    #[tokio::test]
    async fn test_hostile_entity_names_stay_inside_the_index() {
        let temp = TempDir::new().unwrap();
        let index = temp.path().join("index");
        let sink = JsonLinesSink::new(&index);

        for name in ["../escaped", "nested/dir", ".."] {
            let spec = PartitionSpec {
                index: 0,
                entity_type: name.to_string(),
                boundary: PartitionBoundary::unbounded(),
            };
            sink.write(&spec, vec![entity(1, "a")]).await.unwrap();
            assert!(sink.partition_file(name, 0).starts_with(&index));
            assert!(sink.partition_file(name, 0).exists());
            assert_eq!(sink.merged_file(name).parent(), Some(index.as_path()));
        }
        assert!(!temp.path().join("escaped").exists());

        // Purging a hostile name removes only its own files
        sink.purge(&["..".to_string()]).await.unwrap();
        assert!(index.exists());
        assert!(sink.partition_file("nested/dir", 0).exists());
        assert!(!sink.partition_file("..", 0).exists());
    }

    #[tokio::test]
    async fn test_write_appends_per_partition() {
        let temp = TempDir::new().unwrap();
        let sink = JsonLinesSink::new(temp.path());

        sink.write(&partition(0), vec![entity(1, "a"), entity(2, "b")]).await.unwrap();
        sink.write(&partition(0), vec![entity(3, "c")]).await.unwrap();
        sink.write(&partition(1), vec![entity(10, "x")]).await.unwrap();

        let lines: Vec<Entity> = json_lines(sink.partition_file("Employee", 0))
            .unwrap()
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(lines.len(), 3);
        assert!(sink.partition_file("Employee", 1).exists());
    }

    #[tokio::test]
    async fn test_optimize_deduplicates_replayed_rows() {
        let temp = TempDir::new().unwrap();
        let sink = JsonLinesSink::new(temp.path());

        sink.write(&partition(0), vec![entity(1, "a"), entity(2, "b")]).await.unwrap();
        // restart replays id 2
        sink.write(&partition(0), vec![entity(2, "b2"), entity(3, "c")]).await.unwrap();
        sink.optimize(&["Employee".to_string()]).await.unwrap();

        let merged: Vec<Entity> = json_lines(sink.merged_file("Employee"))
            .unwrap()
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(merged.iter().map(|e| e.id.clone()).collect::<Vec<_>>(), vec![
            EntityId::Int(1),
            EntityId::Int(2),
            EntityId::Int(3)
        ]);
        assert_eq!(merged[1].document["name"], json!("b2"));
    }

    #[tokio::test]
    async fn test_purge_removes_entity_files() {
        let temp = TempDir::new().unwrap();
        let sink = JsonLinesSink::new(temp.path());

        sink.write(&partition(0), vec![entity(1, "a")]).await.unwrap();
        sink.optimize(&["Employee".to_string()]).await.unwrap();
        sink.purge(&["Employee".to_string(), "Company".to_string()]).await.unwrap();

        assert!(!sink.entity_dir("Employee").exists());
        assert!(!sink.merged_file("Employee").exists());
    }
}
