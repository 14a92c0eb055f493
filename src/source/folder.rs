// src/source/folder.rs
//! Notes stored as `.md` / `.txt` files under one or more root directories.
//!
//! Item id is `<root name>/<path relative to root>` with `/` separators.

use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{Item, SourceWatcher};

const EXTENSIONS: &[&str] = &["md", "txt"];

#[derive(Debug, Clone)]
struct Root {
    name: String,
    dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FolderSource {
    roots: Vec<Root>,
}

impl FolderSource {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let roots = dirs
            .into_iter()
            .map(|d| {
                let dir: PathBuf = d.into();
                let name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| "notes".to_string());
                Root { name, dir }
            })
            .collect();
        Self { roots }
    }

    /// Map an item id back to a file path. Rejects ids that would escape the root.
    fn resolve(&self, id: &str) -> Result<(&Root, PathBuf)> {
        let (root_name, rel) = id
            .split_once('/')
            .ok_or_else(|| anyhow!("malformed item id: {id}"))?;
        let root = self
            .roots
            .iter()
            .find(|r| r.name == root_name)
            .ok_or_else(|| anyhow!("unknown notes root in id: {id}"))?;
        let rel = Path::new(rel);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("item id escapes its root: {id}");
        }
        Ok((root, root.dir.join(rel)))
    }

    async fn read_item(&self, root: &Root, path: &Path) -> Result<Item> {
        let body = fs::read_to_string(path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        let modified = fs::metadata(path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);
        let rel = path
            .strip_prefix(&root.dir)
            .with_context(|| format!("{} not under {}", path.display(), root.dir.display()))?;
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Ok(Item::new(
            format!("{}/{}", root.name, rel),
            body,
            root.name.clone(),
            modified,
        ))
    }
}

fn is_note(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

async fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        let mut rd = fs::read_dir(&d)
            .await
            .with_context(|| format!("read_dir {}", d.display()))?;
        while let Some(entry) = rd.next_entry().await? {
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let ft = entry.file_type().await?;
            if hidden {
                continue;
            }
            if ft.is_dir() {
                stack.push(path);
            } else if ft.is_file() && is_note(&path) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

#[async_trait::async_trait]
impl SourceWatcher for FolderSource {
    async fn poll_changes(&self) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        for root in &self.roots {
            if !fs::try_exists(&root.dir).await.unwrap_or(false) {
                warn!(dir = %root.dir.display(), "notes directory missing");
                continue;
            }
            for path in collect_files(&root.dir).await? {
                match self.read_item(root, &path).await {
                    Ok(item) => items.push(item),
                    // One unreadable file (e.g. not UTF-8) must not hide the rest.
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable note"),
                }
            }
        }
        debug!(items = items.len(), "folder poll");
        Ok(items)
    }

    async fn fetch_item(&self, id: &str) -> Result<Option<Item>> {
        let (root, path) = self.resolve(id)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        self.read_item(root, &path).await.map(Some)
    }

    async fn write_result(&self, id: &str, text: &str) -> Result<()> {
        let (_, path) = self.resolve(id)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("no file name for {id}"))?
            .to_string_lossy()
            .into_owned();
        let tmp = path.with_file_name(format!(".{file_name}.tmp"));

        let write = async {
            let mut f = fs::File::create(&tmp).await?;
            f.write_all(text.as_bytes()).await?;
            f.sync_all().await?;
            drop(f);
            fs::rename(&tmp, &path).await
        };
        if let Err(e) = write.await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("write {}", path.display()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "folder"
    }
}
