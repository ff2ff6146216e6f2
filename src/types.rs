use serde::{Deserialize, Serialize};
use std::fmt;

/// コンテンツアドレス型キャッシュのキー
///
/// SHA-256 ダイジェストの16進文字列（小文字・64文字）。
/// ローカルキャッシュではファイル名の stem、リモートではオブジェクトキーの一部になる。
///
/// # Examples
///
/// ```
/// # use segcache_migrate::types::CacheKey;
/// let key = CacheKey::new("abc123");
/// assert_eq!(key.as_str(), "abc123");
/// assert_eq!(key.to_string(), "abc123");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ラウドネス正規化ポリシー
///
/// 現行キー方式のハッシュ入力に含まれるため、
/// 目標ラウドネスを変更すると既存のキーはすべて無効になる。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct NormalizationPolicy {
    /// 目標統合ラウドネス (LUFS)
    pub target_lufs: i32,
}

/// 音声セグメントの合成条件
///
/// テキスト・声・合成パラメータの組。同じ値からは常に同じキーが導出される。
/// 正規化ポリシーはここには含めず、キー方式 ([`crate::cache_key::KeyScheme`]) 側で扱う。
#[derive(Clone, Debug, PartialEq)]
pub struct SynthesisIdentity {
    /// 読み上げテキスト
    pub text: String,
    /// 音声ID
    pub voice_id: String,
    /// 合成モデルID
    pub model_id: String,
    pub stability: f64,
    pub similarity_boost: f64,
    pub style: f64,
}

/// セグメントカタログの1エントリ
///
/// 旧キーと新キーの対応、および表示用の出自情報を持つ。
/// 出自情報 (`episode_id`, `speaker`, `text_preview`) は表示専用。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    /// 旧方式（正規化前）のキー
    pub legacy_key: CacheKey,
    /// 現行方式（正規化後）のキー
    pub current_key: CacheKey,
    /// エピソードID
    pub episode_id: String,
    /// 話者ラベル
    pub speaker: String,
    /// テキストの先頭部分
    pub text_preview: String,
}

/// 移行結果の終端状態
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// 正規化とアップロードが完了（ドライランでは計画の検証のみ）
    Success,
    /// ローカルキャッシュに存在しない
    Skipped,
    /// 正規化またはアップロードに失敗
    Failed,
}

/// 1エントリ分の移行結果
///
/// ワークセットの各エントリにつき必ず1つ生成され、以後変更されない。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub legacy_key: CacheKey,
    pub current_key: CacheKey,
    pub episode_id: String,
    pub status: OutcomeStatus,
    /// 失敗・スキップ理由
    pub error: Option<String>,
}

impl MigrationOutcome {
    pub fn success(entry: &CatalogEntry) -> Self {
        Self::with_status(entry, OutcomeStatus::Success, None)
    }

    pub fn skipped(entry: &CatalogEntry, reason: impl Into<String>) -> Self {
        Self::with_status(entry, OutcomeStatus::Skipped, Some(reason.into()))
    }

    pub fn failed(entry: &CatalogEntry, error: impl Into<String>) -> Self {
        Self::with_status(entry, OutcomeStatus::Failed, Some(error.into()))
    }

    fn with_status(entry: &CatalogEntry, status: OutcomeStatus, error: Option<String>) -> Self {
        Self {
            legacy_key: entry.legacy_key.clone(),
            current_key: entry.current_key.clone(),
            episode_id: entry.episode_id.clone(),
            status,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn is_skipped(&self) -> bool {
        self.status == OutcomeStatus::Skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> CatalogEntry {
        CatalogEntry {
            legacy_key: CacheKey::new("old"),
            current_key: CacheKey::new("new"),
            episode_id: "ep-1".to_string(),
            speaker: "ERIC".to_string(),
            text_preview: "Hello".to_string(),
        }
    }

    #[test]
    fn test_outcome_constructors() {
        let entry = entry();

        let ok = MigrationOutcome::success(&entry);
        assert!(ok.is_success());
        assert_eq!(ok.error, None);
        assert_eq!(ok.current_key, CacheKey::new("new"));

        let skipped = MigrationOutcome::skipped(&entry, "not in local cache");
        assert!(skipped.is_skipped());
        assert!(!skipped.is_success());
        assert_eq!(skipped.error.as_deref(), Some("not in local cache"));

        let failed = MigrationOutcome::failed(&entry, "upload failed: boom");
        assert_eq!(failed.status, OutcomeStatus::Failed);
        assert_eq!(failed.episode_id, "ep-1");
    }

    #[test]
    fn test_outcome_serializes_status_in_snake_case() {
        let outcome = MigrationOutcome::skipped(&entry(), "not in local cache");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["legacy_key"], "old");
    }
}
