use crate::types::{CacheKey, CatalogEntry};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// 旧キーで索引されたローカルキャッシュ
///
/// `{root}/{legacy_key}.{extension}` に音声が保存されている前提。
/// 中身は検査せず、ファイル名だけでキーを判定する。
#[derive(Clone, Debug)]
pub struct LocalCache {
    root: PathBuf,
    extension: String,
}

impl LocalCache {
    pub fn new<P: AsRef<Path>>(root: P, extension: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{}", key, self.extension))
    }

    /// 保存済みキーのスナップショットを取得
    ///
    /// 呼び出し時点のディレクトリ内容のみを反映する。
    /// ルートが存在しない場合は空集合。
    pub fn scan(&self) -> Result<BTreeSet<CacheKey>> {
        let mut keys = BTreeSet::new();

        let read_dir = match fs::read_dir(&self.root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("ローカルキャッシュが見つかりません: {:?}", self.root);
                return Ok(keys);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("キャッシュディレクトリの読み込みに失敗: {:?}", self.root))
            }
        };

        for entry in read_dir {
            let entry = entry.with_context(|| format!("ディレクトリ走査に失敗: {:?}", self.root))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.insert(CacheKey::new(stem));
            }
        }

        log::debug!("ローカルキャッシュ: {} 件 ({:?})", keys.len(), self.root);
        Ok(keys)
    }

    /// 音声バイト列を読み込む
    ///
    /// ファイルが存在しない場合は `Ok(None)`。
    pub fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("キャッシュの読み込みに失敗: {:?}", path)),
        }
    }
}

/// 移行対象を決定
///
/// カタログのうち、旧キーがローカルに存在するエントリだけを残す（カタログ順を維持）。
pub fn work_set(catalog: &[CatalogEntry], local_keys: &BTreeSet<CacheKey>) -> Vec<CatalogEntry> {
    catalog
        .iter()
        .filter(|entry| local_keys.contains(&entry.legacy_key))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(legacy: &str, current: &str) -> CatalogEntry {
        CatalogEntry {
            legacy_key: CacheKey::new(legacy),
            current_key: CacheKey::new(current),
            episode_id: "ep-1".to_string(),
            speaker: "ERIC".to_string(),
            text_preview: "text".to_string(),
        }
    }

    #[test]
    fn test_scan_lists_matching_extension_only() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("aaa.mp3"), b"a")?;
        fs::write(temp_dir.path().join("bbb.mp3"), b"b")?;
        fs::write(temp_dir.path().join("ccc.wav"), b"c")?;
        fs::write(temp_dir.path().join("notes.txt"), b"d")?;
        fs::create_dir(temp_dir.path().join("ddd.mp3"))?;

        let cache = LocalCache::new(temp_dir.path(), "mp3");
        let keys = cache.scan()?;

        let keys: Vec<&str> = keys.iter().map(CacheKey::as_str).collect();
        assert_eq!(keys, vec!["aaa", "bbb"]);
        Ok(())
    }

    #[test]
    fn test_scan_missing_root_is_empty() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let cache = LocalCache::new(temp_dir.path().join("missing"), "mp3");
        assert!(cache.scan()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_scan_is_snapshot() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("aaa.mp3"), b"a")?;

        let cache = LocalCache::new(temp_dir.path(), "mp3");
        let snapshot = cache.scan()?;

        fs::write(temp_dir.path().join("bbb.mp3"), b"b")?;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(cache.scan()?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_read() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("aaa.mp3"), b"audio")?;

        let cache = LocalCache::new(temp_dir.path(), "mp3");
        assert_eq!(cache.read(&CacheKey::new("aaa"))?, Some(b"audio".to_vec()));
        assert_eq!(cache.read(&CacheKey::new("zzz"))?, None);
        Ok(())
    }

    #[test]
    fn test_work_set_intersection() {
        let catalog = vec![entry("k3", "n3"), entry("k1", "n1"), entry("k2", "n2")];
        let local: BTreeSet<CacheKey> = ["k1", "k3", "orphan"].into_iter().map(CacheKey::new).collect();

        let work = work_set(&catalog, &local);
        let keys: Vec<&str> = work.iter().map(|e| e.legacy_key.as_str()).collect();
        assert_eq!(keys, vec!["k3", "k1"]);
    }
}
