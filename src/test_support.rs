//! テスト用の変換ツールとフィクスチャ

use crate::normalize::{TransformError, TransformTool};
use crate::remote_store::{MemoryStore, RemoteStore, UploadError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// ffmpeg の loudnorm が出力する統計ブロック
pub const PARSEABLE_STATS: &str = r#"[Parsed_loudnorm_0 @ 0x600000c8c000]
{
	"input_i" : "-27.61",
	"input_tp" : "-4.47",
	"input_lra" : "18.06",
	"input_thresh" : "-39.20",
	"output_i" : "-16.58",
	"output_tp" : "-1.50",
	"output_lra" : "14.78",
	"output_thresh" : "-27.71",
	"normalization_type" : "dynamic",
	"target_offset" : "0.58"
}
"#;

/// 途中で途切れた統計ブロック
pub const MALFORMED_STATS: &str = r#"[Parsed_loudnorm_0 @ 0x600000c8c000]
{
	"input_i" : "-27.61",
	"input_tp" :
}
"#;

/// 入力内容に応じて振る舞いを変える偽の変換ツール
///
/// - `stats:ok` を含む: 正常な統計を返す
/// - `stats:malformed` を含む: 壊れた統計を返す
/// - `apply:fail` を含む: 適用パスが異常終了
/// - `apply:empty` を含む: 空の出力を書き出す
///
/// 正常時はフィルタ式そのものを出力として書き出す。
#[derive(Clone, Default)]
pub struct FakeTool {
    measure_calls: Arc<AtomicUsize>,
    apply_calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    last_input: Arc<Mutex<Option<PathBuf>>>,
}

impl FakeTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measure_calls(&self) -> usize {
        self.measure_calls.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// 同時に実行された適用パスの最大数
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<PathBuf> {
        self.last_input.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransformTool for FakeTool {
    async fn measure(&self, input: &Path, _filter: &str) -> Result<String, TransformError> {
        self.measure_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = Some(input.to_path_buf());

        let content = tokio::fs::read_to_string(input).await?;
        let diagnostics = if content.contains("stats:ok") {
            PARSEABLE_STATS
        } else if content.contains("stats:malformed") {
            MALFORMED_STATS
        } else {
            "Input #0, mp3, from 'input.mp3':"
        };
        Ok(diagnostics.to_string())
    }

    async fn apply(&self, input: &Path, filter: &str, output: &Path) -> Result<(), TransformError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let content = tokio::fs::read_to_string(input).await?;
        if content.contains("apply:fail") {
            return Err(TransformError::ToolFailed {
                program: "fake-ffmpeg".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "Invalid data found when processing input".to_string(),
            });
        }

        let body = if content.contains("apply:empty") {
            Vec::new()
        } else {
            filter.as_bytes().to_vec()
        };
        tokio::fs::write(output, body).await?;
        Ok(())
    }
}

/// 特定のキーだけアップロードに失敗するストア
pub struct FlakyStore {
    inner: MemoryStore,
    failing: String,
}

impl FlakyStore {
    /// キーに `pattern` を含む場合に失敗する
    pub fn failing_on(pattern: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            failing: pattern.to_string(),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), UploadError> {
        if key.contains(&self.failing) {
            return Err(UploadError {
                key: key.to_string(),
                message: "503 Service Unavailable".to_string(),
            });
        }
        self.inner.put(key, bytes, content_type).await
    }
}
