//! segcache-migrate - 合成音声セグメントキャッシュの移行ツール
//!
//! このクレートは、旧キー方式で保存されたローカルの音声セグメントキャッシュを、
//! ラウドネス正規化を施したうえで新キー方式のオブジェクトストアへ移行する機能を提供します。
//!
//! # 主な機能
//!
//! - **キャッシュキー導出**: 旧方式 (v1) と現行方式 (v2: 正規化ポリシー込み) の2種類
//! - **セグメントカタログ**: エピソード台本から旧キー → 新キーの対応表を作成
//! - **ローカルキャッシュ索引**: 実際に保存されている旧キーの列挙
//! - **2パス・ラウドネス正規化**: ffmpeg loudnorm の測定 → 線形補正（1パスへのフォールバック付き）
//! - **並列移行**: 上限付きワーカーで正規化とアップロードを行い、成功/失敗/スキップを集計
//!
//! # アーキテクチャ
//!
//! ```text
//! [Episodes] → [SegmentCatalog] ──┐
//!                                  ├─ ∩ → [WorkSet] → [MigrationOrchestrator]
//! [.cache/*.mp3] → [LocalCache] ──┘                          │ (×N workers)
//!                                                   ┌────────┴────────┐
//!                                                   ↓                 ↓
//!                                        [NormalizationEngine] → [RemoteStore]
//!                                                   │                 │
//!                                                (ffmpeg)        (S3 / R2)
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use segcache_migrate::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod cache_index;
pub mod cache_key;
pub mod catalog;
pub mod config;
pub mod normalize;
pub mod orchestrator;
pub mod progress;
pub mod remote_store;
pub mod script;
pub mod types;

#[cfg(test)]
mod test_support;
