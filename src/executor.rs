use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scanner::{find_associated_subtitles, subtitle_destination};

/// Applies an accepted suggestion to storage.
#[async_trait]
pub trait RenameExecutor: Send + Sync {
    /// Rename or move `old` to `new`, creating parents and pruning the emptied source directory.
    async fn rename(&self, old: &str, new: &str) -> Result<()>;
}

/// Renames on the local filesystem. Subtitles sharing the video's stem move with it.
#[derive(Debug, Default, Clone)]
pub struct LocalExecutor;

impl LocalExecutor {
    async fn move_file(old: &Path, new: &Path) -> Result<()> {
        match tokio::fs::rename(old, new).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                debug!(old = %old.display(), new = %new.display(), "cross-device move, copying");
                tokio::fs::copy(old, new)
                    .await
                    .with_context(|| format!("复制失败: {}", old.display()))?;
                tokio::fs::remove_file(old)
                    .await
                    .with_context(|| format!("删除源文件失败: {}", old.display()))
            }
            Err(e) => Err(e).with_context(|| format!("重命名失败: {} -> {}", old.display(), new.display())),
        }
    }

    async fn remove_if_empty(dir: &Path) {
        let empty = match tokio::fs::read_dir(dir).await {
            Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
            Err(_) => false,
        };
        if empty {
            match tokio::fs::remove_dir(dir).await {
                Ok(()) => info!(dir = %dir.display(), "removed empty directory"),
                Err(e) => warn!(dir = %dir.display(), error = %e, "failed to remove empty directory"),
            }
        }
    }
}

#[async_trait]
impl RenameExecutor for LocalExecutor {
    async fn rename(&self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return Ok(());
        }
        let old_path = Path::new(old);
        let new_path = Path::new(new);
        if tokio::fs::try_exists(new_path).await.unwrap_or(false) {
            bail!("目标已存在: {new}");
        }
        if let Some(parent) = new_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("创建目录失败: {}", parent.display()))?;
        }

        let subtitles = find_associated_subtitles(old_path);
        Self::move_file(old_path, new_path).await?;

        if let Some(old_stem) = old_path.file_stem().and_then(|s| s.to_str()) {
            for subtitle in subtitles {
                let Some(dest) = subtitle_destination(&subtitle, old_stem, new_path) else {
                    continue;
                };
                if let Err(e) = Self::move_file(&subtitle, &dest).await {
                    warn!(subtitle = %subtitle.display(), error = %e, "subtitle not moved");
                }
            }
        }

        if let Some(old_parent) = old_path.parent()
            && new_path.parent() != Some(old_parent)
        {
            Self::remove_if_empty(old_parent).await;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct RenameOutcome {
    pub old: String,
    pub new: String,
    pub result: Result<()>,
}

/// Run every rename with at most `permits` in flight. Outcomes come back in
/// input order; renames not started before cancellation report an error.
pub async fn execute_all(
    executor: Arc<dyn RenameExecutor>,
    pairs: Vec<(String, String)>,
    permits: usize,
    cancel: &CancellationToken,
) -> Vec<RenameOutcome> {
    let semaphore = Arc::new(Semaphore::new(permits.max(1)));
    let mut tasks = JoinSet::new();

    for (index, (old, new)) in pairs.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let executor = Arc::clone(&executor);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let permit = tokio::select! {
                _ = cancel.cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };
            let result = match permit {
                Some(_permit) if !cancel.is_cancelled() => executor.rename(&old, &new).await,
                _ => Err(anyhow::anyhow!("操作已取消")),
            };
            (index, RenameOutcome { old, new, result })
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => warn!(error = %e, "rename task panicked"),
        }
    }
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("media_renamer_exec_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_move_into_library_tree() {
        let root = scratch("move");
        let src_dir = root.join("tvs/新闻女王 S2");
        std::fs::create_dir_all(&src_dir).unwrap();
        std::fs::write(src_dir.join("X.S02E06.mp4"), b"v").unwrap();
        std::fs::write(src_dir.join("X.S02E06.zh.srt"), b"s").unwrap();

        let old = src_dir.join("X.S02E06.mp4");
        let new = root.join("tvs/新闻女王/Season 02/新闻女王 - S02E06.mp4");
        LocalExecutor
            .rename(&old.to_string_lossy(), &new.to_string_lossy())
            .await
            .unwrap();

        assert!(new.exists());
        assert!(root.join("tvs/新闻女王/Season 02/新闻女王 - S02E06.zh.srt").exists());
        assert!(!src_dir.exists(), "emptied source directory should be removed");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_refuses_to_overwrite() {
        let root = scratch("overwrite");
        std::fs::write(root.join("a.mkv"), b"a").unwrap();
        std::fs::write(root.join("b.mkv"), b"b").unwrap();
        let err = LocalExecutor
            .rename(&root.join("a.mkv").to_string_lossy(), &root.join("b.mkv").to_string_lossy())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("目标已存在"));
        assert!(root.join("a.mkv").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    /// Tracks how many renames run at once.
    #[derive(Default)]
    struct SlowExecutor {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RenameExecutor for SlowExecutor {
        async fn rename(&self, _old: &str, new: &str) -> Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if new.ends_with("bad") {
                bail!("boom");
            }
            Ok(())
        }
    }

    fn pairs(n: usize) -> Vec<(String, String)> {
        (0..n).map(|i| (format!("/old/{i}"), format!("/new/{i}"))).collect()
    }

    #[tokio::test]
    async fn test_execute_all_bounded_and_ordered() {
        let executor = Arc::new(SlowExecutor::default());
        let mut input = pairs(8);
        input[3].1 = "/new/bad".to_string();

        let outcomes = execute_all(executor.clone(), input, 2, &CancellationToken::new()).await;

        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(outcomes.len(), 8);
        assert_eq!(outcomes[0].old, "/old/0");
        assert_eq!(outcomes[7].old, "/old/7");
        assert!(outcomes[3].result.is_err());
        assert_eq!(outcomes.iter().filter(|o| o.result.is_ok()).count(), 7);
    }

    #[tokio::test]
    async fn test_execute_all_cancelled() {
        let executor = Arc::new(SlowExecutor::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcomes = execute_all(executor.clone(), pairs(3), 1, &cancel).await;
        assert!(outcomes.iter().all(|o| o.result.is_err()));
        assert_eq!(executor.peak.load(Ordering::SeqCst), 0);
    }
}
