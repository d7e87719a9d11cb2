use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "flv", "rmvb", "mov", "ts", "m2ts", "wmv", "webm"];
const SUBTITLE_EXTENSIONS: &[&str] = &["ass", "srt", "ssa", "sub", "idx", "vtt"];

const PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct FileItem {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub size: u64,
    pub raw_url: String,
    pub modified: Option<DateTime<Utc>>,
}

/// Directory listing service, local or remote. Pages are 1-based.
#[async_trait]
pub trait FileListing: Send + Sync {
    async fn list_directory(&self, path: &str, page: usize, page_size: usize) -> Result<Vec<FileItem>>;

    async fn file_info(&self, path: &str) -> Result<FileInfo>;
}

/// The local filesystem, entries ordered by name.
#[derive(Debug, Default, Clone)]
pub struct LocalListing;

#[async_trait]
impl FileListing for LocalListing {
    async fn list_directory(&self, path: &str, page: usize, page_size: usize) -> Result<Vec<FileItem>> {
        let dir = PathBuf::from(path);
        if !dir.is_dir() {
            anyhow::bail!("不是目录: {path}");
        }
        let skip = page.saturating_sub(1) * page_size;
        tokio::task::spawn_blocking(move || {
            WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .skip(skip)
                .take(page_size)
                .map(|entry| {
                    let metadata = entry.metadata().ok();
                    FileItem {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        is_dir: entry.file_type().is_dir(),
                        size: metadata.as_ref().map_or(0, |m| m.len()),
                        modified: metadata
                            .and_then(|m| m.modified().ok())
                            .map(DateTime::<Utc>::from),
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .context("目录列举任务失败")
    }

    async fn file_info(&self, path: &str) -> Result<FileInfo> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("读取文件信息失败: {path}"))?;
        let absolute = std::path::absolute(path).unwrap_or_else(|_| PathBuf::from(path));
        Ok(FileInfo {
            size: metadata.len(),
            raw_url: format!("file://{}", absolute.display()),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

pub fn is_video(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
}

fn join(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

async fn list_all(listing: &dyn FileListing, dir: &str) -> Result<Vec<FileItem>> {
    let mut items = Vec::new();
    for page in 1.. {
        let batch = listing.list_directory(dir, page, PAGE_SIZE).await?;
        let done = batch.len() < PAGE_SIZE;
        items.extend(batch);
        if done {
            break;
        }
    }
    Ok(items)
}

/// Video files under `root`, sorted. Only a failure on `root` itself is an
/// error; unreadable subdirectories are logged and skipped.
pub async fn collect_media_files(listing: &dyn FileListing, root: &str, recursive: bool) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_string()];
    let mut first = true;

    while let Some(dir) = pending.pop() {
        let items = match list_all(listing, &dir).await {
            Ok(items) => items,
            Err(e) if first => return Err(e.context(format!("无法读取目录: {dir}"))),
            Err(e) => {
                warn!(dir = %dir, error = %e, "subdirectory listing failed, skipping");
                continue;
            }
        };
        first = false;

        for item in items {
            let path = join(&dir, &item.name);
            if item.is_dir {
                if recursive {
                    pending.push(path);
                }
            } else if is_video(&item.name) {
                files.push(path);
            }
        }
    }

    files.sort();
    debug!(root, count = files.len(), "collected media files");
    Ok(files)
}

/// Subtitle files sharing the video's stem, e.g. `ep01.zh.ass` next to `ep01.mkv`.
pub fn find_associated_subtitles(video_path: &Path) -> Vec<PathBuf> {
    let mut subtitles = Vec::new();

    let Some(parent) = video_path.parent() else {
        return subtitles;
    };
    let Some(video_stem) = video_path.file_stem().and_then(|s| s.to_str()) else {
        return subtitles;
    };

    if let Ok(entries) = std::fs::read_dir(parent) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(suffix) = path
                .file_name()
                .and_then(|s| s.to_str())
                .and_then(|name| name.strip_prefix(video_stem))
            else {
                continue;
            };
            if SUBTITLE_EXTENSIONS.iter().any(|ext| suffix.ends_with(&format!(".{ext}"))) {
                subtitles.push(path);
            }
        }
    }

    subtitles.sort();
    subtitles
}

/// Where a subtitle goes once its video is renamed; the language suffix is kept.
pub fn subtitle_destination(subtitle_path: &Path, old_video_stem: &str, new_video_path: &Path) -> Option<PathBuf> {
    let subtitle_name = subtitle_path.file_name()?.to_str()?;
    let new_stem = new_video_path.file_stem()?.to_str()?;
    let suffix = subtitle_name.strip_prefix(old_video_stem)?;
    Some(new_video_path.parent()?.join(format!("{new_stem}{suffix}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("media_renamer_scan_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Listing backed by a map; directories named in `broken` fail.
    struct MapListing {
        dirs: HashMap<String, Vec<FileItem>>,
        broken: Vec<String>,
    }

    fn item(name: &str, is_dir: bool) -> FileItem {
        FileItem {
            name: name.to_string(),
            is_dir,
            size: 1,
            modified: None,
        }
    }

    #[async_trait]
    impl FileListing for MapListing {
        async fn list_directory(&self, path: &str, page: usize, _page_size: usize) -> Result<Vec<FileItem>> {
            if self.broken.iter().any(|b| b == path) {
                anyhow::bail!("permission denied: {path}");
            }
            if page > 1 {
                return Ok(Vec::new());
            }
            self.dirs
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such directory: {path}"))
        }

        async fn file_info(&self, path: &str) -> Result<FileInfo> {
            anyhow::bail!("not supported: {path}")
        }
    }

    #[test]
    fn test_is_video() {
        assert!(is_video("a.MKV"));
        assert!(is_video("第1期.mp4"));
        assert!(!is_video("a.ass"));
        assert!(!is_video("mkv"));
    }

    #[tokio::test]
    async fn test_collect_skips_broken_subdirectory() {
        let listing = MapListing {
            dirs: HashMap::from([
                (
                    "/tvs".to_string(),
                    vec![item("庆余年", true), item("坏目录", true), item("readme.txt", false)],
                ),
                ("/tvs/庆余年".to_string(), vec![item("02.mkv", false), item("01.mkv", false), item("01.ass", false)]),
            ]),
            broken: vec!["/tvs/坏目录".to_string()],
        };

        let files = collect_media_files(&listing, "/tvs", true).await.unwrap();
        assert_eq!(files, vec!["/tvs/庆余年/01.mkv".to_string(), "/tvs/庆余年/02.mkv".to_string()]);

        let flat = collect_media_files(&listing, "/tvs", false).await.unwrap();
        assert!(flat.is_empty());
    }

    #[tokio::test]
    async fn test_collect_fails_on_root() {
        let listing = MapListing {
            dirs: HashMap::new(),
            broken: vec!["/tvs".to_string()],
        };
        assert!(collect_media_files(&listing, "/tvs", true).await.is_err());
    }

    #[tokio::test]
    async fn test_local_listing_pages_by_name() {
        let dir = scratch("pages");
        for name in ["c.mkv", "a.mkv", "b.mkv"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.join("sub")).unwrap();

        let listing = LocalListing;
        let root = dir.to_string_lossy().into_owned();
        let first = listing.list_directory(&root, 1, 2).await.unwrap();
        let second = listing.list_directory(&root, 2, 2).await.unwrap();
        let names: Vec<_> = first.iter().chain(&second).map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.mkv", "b.mkv", "c.mkv", "sub"]);
        assert!(second[1].is_dir);

        let info = listing.file_info(&format!("{root}/a.mkv")).await.unwrap();
        assert_eq!(info.size, 1);
        assert!(info.raw_url.starts_with("file://"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_subtitles_follow_video() {
        let dir = scratch("subs");
        let video = dir.join("ep01.mkv");
        std::fs::write(&video, b"v").unwrap();
        std::fs::write(dir.join("ep01.zh.ass"), b"s").unwrap();
        std::fs::write(dir.join("ep01.srt"), b"s").unwrap();
        std::fs::write(dir.join("ep02.srt"), b"s").unwrap();

        let subs = find_associated_subtitles(&video);
        assert_eq!(subs.len(), 2);

        let new_video = PathBuf::from("/tvs/Show/Season 01/Show - S01E01.mkv");
        let dest = subtitle_destination(&dir.join("ep01.zh.ass"), "ep01", &new_video).unwrap();
        assert_eq!(dest, PathBuf::from("/tvs/Show/Season 01/Show - S01E01.zh.ass"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
