use crate::types::NormalizationPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 実行前の設定エラー
///
/// 作業開始前に検出され、実行全体を中断する。
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("必要な環境変数が設定されていません: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("リモートストアが設定されていません（ドライラン以外では必須）")]
    MissingRemoteStore,

    #[error("ワーカー数は1以上を指定してください")]
    InvalidWorkers,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub loudness: LoudnessConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default = "default_speakers")]
    pub speakers: Vec<SpeakerConfig>,
}

/// パス設定
///
/// # デフォルト値
///
/// - `cache_dir`: "./.cache" (旧キーのローカルキャッシュ)
/// - `episodes_dir`: "./public" (エピソード台本の置き場所)
/// - `artifact_extension`: "mp3"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_episodes_dir")]
    pub episodes_dir: String,
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,
}

/// 音声合成パラメータ
///
/// キャッシュキーの入力になるため、既存キャッシュ生成時の値と一致させる必要がある。
///
/// # デフォルト値
///
/// - `model_id`: "eleven_turbo_v2_5"
/// - `stability`: 0.5
/// - `similarity_boost`: 0.75
/// - `style`: 0.0
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_stability")]
    pub stability: f64,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f64,
    #[serde(default = "default_style")]
    pub style: f64,
}

/// ラウドネス正規化設定
///
/// # デフォルト値
///
/// - `target_lufs`: -16 LUFS (ポッドキャスト向け)
/// - `true_peak_db`: -1.5 dBTP
/// - `loudness_range_lu`: 11 LU
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoudnessConfig {
    #[serde(default = "default_target_lufs")]
    pub target_lufs: i32,
    #[serde(default = "default_true_peak_db")]
    pub true_peak_db: f64,
    #[serde(default = "default_loudness_range_lu")]
    pub loudness_range_lu: f64,
    #[serde(default)]
    pub fallback: MeasuredFallback,
}

/// 測定値が欠けていた場合の代替値
///
/// 一般的な話し声のラウドネスを想定した値。
/// 測定結果のJSONに該当フィールドがない場合にのみ使われる。
///
/// # デフォルト値
///
/// - `input_i`: -24.0
/// - `input_tp`: -2.0
/// - `input_lra`: 7.0
/// - `input_thresh`: -34.0
/// - `target_offset`: 0.0
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MeasuredFallback {
    #[serde(default = "default_input_i")]
    pub input_i: f64,
    #[serde(default = "default_input_tp")]
    pub input_tp: f64,
    #[serde(default = "default_input_lra")]
    pub input_lra: f64,
    #[serde(default = "default_input_thresh")]
    pub input_thresh: f64,
    #[serde(default = "default_target_offset")]
    pub target_offset: f64,
}

/// 移行処理設定
///
/// # デフォルト値
///
/// - `workers`: 4 (並列ワーカー数)
/// - `ffmpeg_path`: "ffmpeg"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MigrationConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

/// リモートストア設定
///
/// 認証情報は設定ファイルには書かず、環境変数から読み込む
/// ([`crate::remote_store::RemoteCredentials::from_env`])。
///
/// # デフォルト値
///
/// - `bucket`: "strollcast-cache" (環境変数 `R2_BUCKET` が優先)
/// - `prefix`: "segments"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

/// 話者ラベルと音声IDの対応
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SpeakerConfig {
    pub label: String,
    pub voice_id: String,
}

// Default functions
fn default_cache_dir() -> String {
    "./.cache".to_string()
}

fn default_episodes_dir() -> String {
    "./public".to_string()
}

fn default_artifact_extension() -> String {
    "mp3".to_string()
}

fn default_model_id() -> String {
    "eleven_turbo_v2_5".to_string()
}

fn default_stability() -> f64 {
    0.5
}

fn default_similarity_boost() -> f64 {
    0.75
}

fn default_style() -> f64 {
    0.0
}

fn default_target_lufs() -> i32 {
    -16
}

fn default_true_peak_db() -> f64 {
    -1.5
}

fn default_loudness_range_lu() -> f64 {
    11.0
}

fn default_input_i() -> f64 {
    -24.0
}

fn default_input_tp() -> f64 {
    -2.0
}

fn default_input_lra() -> f64 {
    7.0
}

fn default_input_thresh() -> f64 {
    -34.0
}

fn default_target_offset() -> f64 {
    0.0
}

fn default_workers() -> usize {
    4
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_bucket() -> String {
    "strollcast-cache".to_string()
}

fn default_prefix() -> String {
    "segments".to_string()
}

fn default_speakers() -> Vec<SpeakerConfig> {
    vec![
        SpeakerConfig {
            label: "ERIC".to_string(),
            voice_id: "gP8LZQ3GGokV0MP5JYjg".to_string(),
        },
        SpeakerConfig {
            label: "MAYA".to_string(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            synthesis: SynthesisConfig::default(),
            loudness: LoudnessConfig::default(),
            migration: MigrationConfig::default(),
            remote: RemoteConfig::default(),
            speakers: default_speakers(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            episodes_dir: default_episodes_dir(),
            artifact_extension: default_artifact_extension(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            style: default_style(),
        }
    }
}

impl Default for LoudnessConfig {
    fn default() -> Self {
        Self {
            target_lufs: default_target_lufs(),
            true_peak_db: default_true_peak_db(),
            loudness_range_lu: default_loudness_range_lu(),
            fallback: MeasuredFallback::default(),
        }
    }
}

impl Default for MeasuredFallback {
    fn default() -> Self {
        Self {
            input_i: default_input_i(),
            input_tp: default_input_tp(),
            input_lra: default_input_lra(),
            input_thresh: default_input_thresh(),
            target_offset: default_target_offset(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            prefix: default_prefix(),
        }
    }
}

impl LoudnessConfig {
    /// 現行キー方式に渡す正規化ポリシー
    pub fn policy(&self) -> NormalizationPolicy {
        NormalizationPolicy {
            target_lufs: self.target_lufs,
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use segcache_migrate::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }
}
