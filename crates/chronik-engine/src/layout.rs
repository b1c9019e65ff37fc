use std::fs;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::factory::StorageFormat;

const MERGE_DIR: &str = "merge";
const PROCESSED_DIR: &str = "processed";

/// On-disk layout of task stores for one session:
/// `{output_dir}/{random_tmp_dir}/` with `processed/` holding stores whose
/// workers declared them done and `merge/` holding stores staged for
/// fold-in. Each task's file is named `{task_identifier}.{ext}`.
///
/// The rename from `processed/` into `merge/` is the cross-process
/// synchronization point: it is atomic on one filesystem, and the
/// coordinator never reads a store that could still be renamed.
#[derive(Clone, Debug)]
pub struct TaskStorageLayout {
    root: PathBuf,
    format: StorageFormat,
}

impl TaskStorageLayout {
    /// Create a fresh scratch directory under `output_dir`.
    pub fn create(output_dir: &Path, format: StorageFormat) -> EngineResult<Self> {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let root = output_dir.join(format!("chronik-{suffix}"));
        let layout = Self { root, format };
        fs::create_dir_all(layout.merge_dir())?;
        fs::create_dir_all(layout.processed_dir())?;
        Ok(layout)
    }

    /// Reattach to an existing scratch directory.
    pub fn open(root: impl Into<PathBuf>, format: StorageFormat) -> Self {
        Self {
            root: root.into(),
            format,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> StorageFormat {
        self.format
    }

    fn merge_dir(&self) -> PathBuf {
        self.root.join(MERGE_DIR)
    }

    fn processed_dir(&self) -> PathBuf {
        self.root.join(PROCESSED_DIR)
    }

    fn file_name(&self, task: &Uuid) -> String {
        format!("{task}.{}", self.format.extension())
    }

    /// Where a worker writes the store while the task is running.
    pub fn scratch_path(&self, task: &Uuid) -> PathBuf {
        self.root.join(self.file_name(task))
    }

    pub fn processed_path(&self, task: &Uuid) -> PathBuf {
        self.processed_dir().join(self.file_name(task))
    }

    pub fn merge_path(&self, task: &Uuid) -> PathBuf {
        self.merge_dir().join(self.file_name(task))
    }

    /// Worker side: declare the store done by moving it into `processed/`.
    pub fn mark_processed(&self, task: &Uuid) -> EngineResult<PathBuf> {
        let target = self.processed_path(task);
        fs::rename(self.scratch_path(task), &target)?;
        Ok(target)
    }

    /// Coordinator side: atomically stage a processed store for merging.
    pub fn stage_for_merge(&self, task: &Uuid) -> EngineResult<PathBuf> {
        let target = self.merge_path(task);
        fs::rename(self.processed_path(task), &target)?;
        Ok(target)
    }

    /// Size of a processed store, reported as the task's storage file size.
    pub fn processed_store_size(&self, task: &Uuid) -> EngineResult<u64> {
        Ok(fs::metadata(self.processed_path(task))?.len())
    }

    /// Task identifiers with a store staged in `merge/`, in name order.
    pub fn tasks_ready_to_merge(&self) -> EngineResult<Vec<Uuid>> {
        let mut tasks = Vec::new();
        for entry in fs::read_dir(self.merge_dir())? {
            let path = entry?.path();
            let matches_extension = path
                .extension()
                .map_or(false, |ext| ext == self.format.extension());
            if !matches_extension {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match Uuid::parse_str(stem) {
                Ok(task) => tasks.push(task),
                Err(_) => {
                    tracing::warn!(path = %path.display(), "skipping non-task file in merge directory");
                }
            }
        }
        tasks.sort();
        Ok(tasks)
    }

    /// Remove the whole scratch directory. Only safe once every task store
    /// has been merged or abandoned.
    pub fn remove(&self) -> EngineResult<()> {
        fs::remove_dir_all(&self.root)?;
        Ok(())
    }
}
