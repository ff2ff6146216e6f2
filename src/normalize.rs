use crate::config::{LoudnessConfig, MeasuredFallback};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io;
use std::path::Path;
use tokio::process::Command;

/// 正規化処理のエラー
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("一時ファイルの入出力に失敗: {0}")]
    Io(#[from] io::Error),

    #[error("{program} の起動に失敗: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} が異常終了 ({status}): {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("変換結果が空です")]
    EmptyOutput,
}

/// loudnorm の測定結果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoudnormStats {
    /// 統合ラウドネス (LUFS)
    pub input_i: f64,
    /// トゥルーピーク (dBTP)
    pub input_tp: f64,
    /// ラウドネスレンジ (LU)
    pub input_lra: f64,
    /// ゲート閾値 (LUFS)
    pub input_thresh: f64,
    /// 目標オフセット (LU)
    pub target_offset: f64,
}

/// 適用パスの構成
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ApplyPass {
    /// 測定値を使った線形補正（精度が高い）
    TwoPass(LoudnormStats),
    /// 目標値のみを使った1パス補正（測定結果が得られなかった場合）
    SinglePass,
}

impl ApplyPass {
    /// 適用パスのフィルタ式
    pub fn filter(&self, loudness: &LoudnessConfig) -> String {
        let base = target_filter(loudness);
        match self {
            ApplyPass::TwoPass(stats) => format!(
                "{}:measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:offset={}:linear=true",
                base,
                stats.input_i,
                stats.input_tp,
                stats.input_lra,
                stats.input_thresh,
                stats.target_offset
            ),
            ApplyPass::SinglePass => base,
        }
    }
}

/// 測定パスのフィルタ式
pub fn measure_filter(loudness: &LoudnessConfig) -> String {
    format!("{}:print_format=json", target_filter(loudness))
}

fn target_filter(loudness: &LoudnessConfig) -> String {
    format!(
        "loudnorm=I={}:TP={}:LRA={}",
        loudness.target_lufs, loudness.true_peak_db, loudness.loudness_range_lu
    )
}

/// 測定パスの診断出力から loudnorm の統計を取り出す
///
/// 出力中の最後の `{` から最後の `}` までを JSON として解釈する。
/// ブロックがない・JSONとして不正・空オブジェクトの場合は `None`。
/// 個別のフィールドが欠けている（または数値として読めない）場合は `fallback` の値で補う。
pub fn parse_loudnorm_stats(diagnostics: &str, fallback: &MeasuredFallback) -> Option<LoudnormStats> {
    let start = diagnostics.rfind('{')?;
    let end = diagnostics.rfind('}')?;
    if end <= start {
        return None;
    }

    let map: Map<String, Value> = serde_json::from_str(&diagnostics[start..=end]).ok()?;
    if map.is_empty() {
        return None;
    }

    Some(LoudnormStats {
        input_i: stat_field(&map, "input_i", fallback.input_i),
        input_tp: stat_field(&map, "input_tp", fallback.input_tp),
        input_lra: stat_field(&map, "input_lra", fallback.input_lra),
        input_thresh: stat_field(&map, "input_thresh", fallback.input_thresh),
        target_offset: stat_field(&map, "target_offset", fallback.target_offset),
    })
}

// ffmpeg は数値を文字列として出力する
fn stat_field(map: &Map<String, Value>, name: &str, default: f64) -> f64 {
    match map.get(name) {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        _ => default,
    }
}

/// 外部の変換ツール（測定と適用の2つの呼び出しのみを使う）
#[async_trait]
pub trait TransformTool: Send + Sync {
    /// 測定パスを実行し、診断出力を返す
    ///
    /// 終了コードは問わない。統計が得られなければ呼び出し側が1パスに切り替える。
    async fn measure(&self, input: &Path, filter: &str) -> Result<String, TransformError>;

    /// 適用パスを実行し、`output` にエンコード済み音声を書き出す
    async fn apply(&self, input: &Path, filter: &str, output: &Path) -> Result<(), TransformError>;
}

/// ffmpeg による変換ツール
pub struct FfmpegTool {
    program: String,
}

impl FfmpegTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(["-hide_banner", "-nostdin"]).kill_on_drop(true);
        command
    }

    fn launch_error(&self, source: io::Error) -> TransformError {
        TransformError::Launch {
            program: self.program.clone(),
            source,
        }
    }
}

#[async_trait]
impl TransformTool for FfmpegTool {
    async fn measure(&self, input: &Path, filter: &str) -> Result<String, TransformError> {
        let output = self
            .command()
            .arg("-i")
            .arg(input)
            .args(["-af", filter, "-f", "null", "-"])
            .output()
            .await
            .map_err(|e| self.launch_error(e))?;

        if !output.status.success() {
            log::debug!("測定パスが異常終了: {}", output.status);
        }
        Ok(String::from_utf8_lossy(&output.stderr).into_owned())
    }

    async fn apply(&self, input: &Path, filter: &str, output: &Path) -> Result<(), TransformError> {
        let result = self
            .command()
            .args(["-y", "-i"])
            .arg(input)
            .args(["-af", filter, "-c:a", "libmp3lame", "-q:a", "2"])
            .arg(output)
            .output()
            .await
            .map_err(|e| self.launch_error(e))?;

        if result.status.success() {
            Ok(())
        } else {
            Err(TransformError::ToolFailed {
                program: self.program.clone(),
                status: result.status.to_string(),
                stderr: stderr_tail(&result.stderr),
            })
        }
    }
}

// 診断用に末尾の数行だけ残す
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(3)..].join(" | ")
}

/// 2パス・ラウドネス正規化エンジン
///
/// 測定パスで統計を取得し、得られた場合は測定値をフィードバックする線形補正、
/// 得られなかった場合は目標値のみの1パス補正を適用する。
/// 中間ファイルは呼び出しごとの一時ディレクトリに置き、どの経路でも削除される。
pub struct NormalizationEngine {
    loudness: LoudnessConfig,
    tool: Box<dyn TransformTool>,
    extension: String,
}

impl NormalizationEngine {
    pub fn new(loudness: LoudnessConfig, tool: Box<dyn TransformTool>, extension: impl Into<String>) -> Self {
        Self {
            loudness,
            tool,
            extension: extension.into(),
        }
    }

    pub fn loudness(&self) -> &LoudnessConfig {
        &self.loudness
    }

    /// 診断出力から適用パスを決定
    pub fn decide(&self, diagnostics: &str) -> ApplyPass {
        match parse_loudnorm_stats(diagnostics, &self.loudness.fallback) {
            Some(stats) => ApplyPass::TwoPass(stats),
            None => ApplyPass::SinglePass,
        }
    }

    /// 測定パスだけを実行して適用パスを決定
    pub async fn plan(&self, raw: &[u8]) -> Result<ApplyPass, TransformError> {
        let scratch = tempfile::Builder::new().prefix("segcache-").tempdir()?;
        let input = scratch.path().join(format!("input.{}", self.extension));
        tokio::fs::write(&input, raw).await?;

        self.measure(&input).await
    }

    /// 音声を目標ラウドネスに正規化
    pub async fn normalize(&self, raw: &[u8]) -> Result<Vec<u8>, TransformError> {
        let scratch = tempfile::Builder::new().prefix("segcache-").tempdir()?;
        let input = scratch.path().join(format!("input.{}", self.extension));
        let output = scratch.path().join(format!("output.{}", self.extension));
        tokio::fs::write(&input, raw).await?;

        let pass = self.measure(&input).await?;
        if pass == ApplyPass::SinglePass {
            log::warn!("ラウドネス測定結果を解析できませんでした。1パスで正規化します");
        }

        self.tool
            .apply(&input, &pass.filter(&self.loudness), &output)
            .await?;

        let bytes = match tokio::fs::read(&output).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(TransformError::EmptyOutput),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Err(TransformError::EmptyOutput);
        }

        Ok(bytes)
    }

    async fn measure(&self, input: &Path) -> Result<ApplyPass, TransformError> {
        let diagnostics = self
            .tool
            .measure(input, &measure_filter(&self.loudness))
            .await?;
        let pass = self.decide(&diagnostics);
        log::debug!("適用パス: {:?}", pass);
        Ok(pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeTool, MALFORMED_STATS, PARSEABLE_STATS};

    fn engine(tool: FakeTool) -> NormalizationEngine {
        NormalizationEngine::new(LoudnessConfig::default(), Box::new(tool), "mp3")
    }

    #[test]
    fn test_parse_ffmpeg_output() {
        let stats = parse_loudnorm_stats(PARSEABLE_STATS, &MeasuredFallback::default()).unwrap();
        assert_eq!(
            stats,
            LoudnormStats {
                input_i: -27.61,
                input_tp: -4.47,
                input_lra: 18.06,
                input_thresh: -39.2,
                target_offset: 0.58,
            }
        );
    }

    #[test]
    fn test_parse_missing_fields_use_fallback() {
        let stats = parse_loudnorm_stats(
            r#"[Parsed_loudnorm_0] { "input_i" : "-20.5", "input_tp" : "oops" }"#,
            &MeasuredFallback::default(),
        )
        .unwrap();
        assert_eq!(stats.input_i, -20.5);
        assert_eq!(stats.input_tp, -2.0);
        assert_eq!(stats.input_lra, 7.0);
        assert_eq!(stats.input_thresh, -34.0);
        assert_eq!(stats.target_offset, 0.0);

        let tuned = MeasuredFallback {
            input_lra: 5.0,
            ..MeasuredFallback::default()
        };
        let stats = parse_loudnorm_stats(r#"{"input_i": -19}"#, &tuned).unwrap();
        assert_eq!(stats.input_i, -19.0);
        assert_eq!(stats.input_lra, 5.0);
    }

    #[test]
    fn test_parse_unusable_output() {
        let fallback = MeasuredFallback::default();
        assert_eq!(parse_loudnorm_stats("", &fallback), None);
        assert_eq!(parse_loudnorm_stats("no statistics here", &fallback), None);
        assert_eq!(parse_loudnorm_stats(MALFORMED_STATS, &fallback), None);
        assert_eq!(parse_loudnorm_stats("} reversed {", &fallback), None);
        assert_eq!(parse_loudnorm_stats("stats: {}", &fallback), None);
    }

    #[test]
    fn test_filters() {
        let loudness = LoudnessConfig::default();
        assert_eq!(
            measure_filter(&loudness),
            "loudnorm=I=-16:TP=-1.5:LRA=11:print_format=json"
        );
        assert_eq!(ApplyPass::SinglePass.filter(&loudness), "loudnorm=I=-16:TP=-1.5:LRA=11");

        let stats = parse_loudnorm_stats(PARSEABLE_STATS, &loudness.fallback).unwrap();
        assert_eq!(
            ApplyPass::TwoPass(stats).filter(&loudness),
            "loudnorm=I=-16:TP=-1.5:LRA=11:measured_I=-27.61:measured_TP=-4.47:measured_LRA=18.06:measured_thresh=-39.2:offset=0.58:linear=true"
        );
    }

    #[tokio::test]
    async fn test_normalize_two_pass() {
        let tool = FakeTool::new();
        let engine = engine(tool.clone());

        let output = engine.normalize(b"stats:ok").await.unwrap();

        let filter = String::from_utf8(output).unwrap();
        assert!(filter.contains("measured_I=-27.61"));
        assert!(filter.ends_with("linear=true"));
        assert_eq!(tool.measure_calls(), 1);
        assert_eq!(tool.apply_calls(), 1);
    }

    #[tokio::test]
    async fn test_normalize_falls_back_to_single_pass() {
        let tool = FakeTool::new();
        let engine = engine(tool.clone());

        let output = engine.normalize(b"stats:malformed").await.unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "loudnorm=I=-16:TP=-1.5:LRA=11");
        assert_eq!(tool.apply_calls(), 1);
    }

    #[tokio::test]
    async fn test_plan_is_deterministic() {
        let tool = FakeTool::new();
        let engine = engine(tool);

        let first = engine.plan(b"stats:ok").await.unwrap();
        let second = engine.plan(b"stats:ok").await.unwrap();
        assert_eq!(first, second);
        assert!(matches!(first, ApplyPass::TwoPass(_)));

        assert_eq!(engine.plan(b"stats:malformed").await.unwrap(), ApplyPass::SinglePass);
    }

    #[tokio::test]
    async fn test_apply_failure_is_transform_error_and_cleans_up() {
        let tool = FakeTool::new();
        let engine = engine(tool.clone());

        let err = engine.normalize(b"stats:ok apply:fail").await.unwrap_err();
        assert!(matches!(err, TransformError::ToolFailed { .. }));

        let scratch = tool.last_input().unwrap();
        assert!(!scratch.exists());
        assert!(!scratch.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_scratch_removed_after_success() {
        let tool = FakeTool::new();
        let engine = engine(tool.clone());

        engine.normalize(b"stats:ok").await.unwrap();
        let scratch = tool.last_input().unwrap();
        assert!(!scratch.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_empty_output_is_error() {
        let tool = FakeTool::new();
        let engine = engine(tool);

        let err = engine.normalize(b"stats:ok apply:empty").await.unwrap_err();
        assert!(matches!(err, TransformError::EmptyOutput));
    }

    #[tokio::test]
    async fn test_ffmpeg_launch_failure() {
        let tool = FfmpegTool::new("/nonexistent/segcache-ffmpeg");
        let err = tool
            .measure(Path::new("input.mp3"), "loudnorm")
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::Launch { .. }));
    }

    #[test]
    fn test_stderr_tail() {
        assert_eq!(stderr_tail(b"a\n\nb\nc\nd\n"), "b | c | d");
        assert_eq!(stderr_tail(b""), "");
    }
}
