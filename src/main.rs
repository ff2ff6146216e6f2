use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use segcache_migrate::cache_index::{self, LocalCache};
use segcache_migrate::catalog::{self, SegmentCatalog, VoiceTable};
use segcache_migrate::config::{Config, ConfigurationError};
use segcache_migrate::normalize::{FfmpegTool, NormalizationEngine};
use segcache_migrate::orchestrator::{MigrationOptions, MigrationOrchestrator};
use segcache_migrate::progress::{failure_line, render_progress};
use segcache_migrate::remote_store::{RemoteCredentials, RemoteStore, S3RemoteStore};
use segcache_migrate::script::ScriptParser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// ローカルの音声セグメントキャッシュを正規化しながらリモートストアへ移行する
#[derive(Parser, Debug)]
#[command(name = "segcache-migrate", version, about)]
struct Args {
    /// 設定ファイルのパス
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// 変換とアップロードを行わず、移行計画だけを確認する
    #[arg(long)]
    dry_run: bool,

    /// 指定したエピソードのセグメントだけを移行する
    #[arg(long, value_name = "EPISODE_ID")]
    episode: Option<String>,

    /// 並列ワーカー数（設定ファイルの値を上書き）
    #[arg(short, long)]
    workers: Option<usize>,

    /// 全エントリの結果を JSON で書き出す
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// デフォルト設定ファイルを生成して終了する
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = "config.toml")]
    generate_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // ロガーを初期化
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .filter_module("aws_config", log::LevelFilter::Warn)
        .filter_module("aws_smithy_runtime", log::LevelFilter::Warn)
        .filter_module("aws_sdk_s3", log::LevelFilter::Warn)
        .init();

    let args = Args::parse();

    // 設定ファイル生成モード
    if let Some(path) = &args.generate_config {
        Config::write_default(path)?;
        println!("設定ファイルを生成しました: {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::load_or_default(&args.config)?;
    if let Some(workers) = args.workers {
        config.migration.workers = workers;
    }
    log::debug!("設定: {:?}", config);

    println!("{}", "=".repeat(60));
    println!("キャッシュ移行: ローカル → リモート（正規化 {} LUFS）", config.loudness.target_lufs);
    println!("{}", "=".repeat(60));

    // 認証情報の確認（ドライラン以外では必須）
    let store: Option<Arc<dyn RemoteStore>> = if args.dry_run {
        println!("\n[ドライラン - アップロードは行いません]");
        None
    } else {
        match RemoteCredentials::from_env(&config.remote) {
            Ok(credentials) => Some(Arc::new(S3RemoteStore::connect(&credentials).await)),
            Err(e) => {
                report_configuration_error(&e);
                return Ok(ExitCode::FAILURE);
            }
        }
    };

    // 台本からカタログを作成
    println!("\n[1/3] エピソード台本を解析中...");
    let parser = ScriptParser::new()?;
    let episodes = parser.discover_episodes(&config.paths.episodes_dir)?;
    let segment_catalog = SegmentCatalog::new(
        VoiceTable::from(config.speakers.as_slice()),
        config.synthesis.clone(),
        config.loudness.policy(),
    );
    let entries = segment_catalog.build(&episodes, args.episode.as_deref());
    println!("      台本中のセグメント: {} 件", entries.len());

    // ローカルキャッシュとの突き合わせ
    let cache = LocalCache::new(&config.paths.cache_dir, config.paths.artifact_extension.clone());
    let local_keys = cache.scan()?;
    let work_set = cache_index::work_set(&entries, &local_keys);
    println!("      ローカルキャッシュに存在: {} 件", work_set.len());

    if work_set.is_empty() {
        println!("\n      移行対象はありません");
        return Ok(ExitCode::SUCCESS);
    }

    println!("\n      エピソード別セグメント数:");
    for (episode_id, count) in catalog::group_by_episode(&work_set) {
        println!("        {}: {}", episode_id, count);
    }

    // Ctrl+C ハンドラを設定
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました。処理中のセグメントの完了を待ちます...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    let engine = NormalizationEngine::new(
        config.loudness.clone(),
        Box::new(FfmpegTool::new(config.migration.ffmpeg_path.clone())),
        config.paths.artifact_extension.clone(),
    );
    let orchestrator = MigrationOrchestrator::new(
        cache,
        Arc::new(engine),
        store,
        config.remote.prefix.clone(),
        config.paths.artifact_extension.clone(),
    );

    println!(
        "\n[2/3] 正規化とアップロード中（ワーカー数: {}）...",
        config.migration.workers
    );
    let options = MigrationOptions {
        concurrency: config.migration.workers,
        dry_run: args.dry_run,
    };
    let result = orchestrator
        .run(work_set, options, running, |outcome, done, total| {
            if !outcome.is_success() && !outcome.is_skipped() {
                eprintln!("\n      {}", failure_line(outcome));
            }
            eprint!("\r      {}", render_progress(done, total));
            let _ = std::io::stderr().flush();
        })
        .await;
    eprintln!();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            report_configuration_error(&e);
            return Ok(ExitCode::FAILURE);
        }
    };

    // 集計
    println!("\n[3/3] 移行完了");
    println!("{}", "=".repeat(60));
    println!("      移行:     {}", report.success);
    println!("      失敗:     {}", report.failed);
    println!("      スキップ: {}", report.skipped);
    if report.cancelled > 0 {
        println!("      未処理:   {}（停止要求）", report.cancelled);
    }
    let elapsed = report.finished_at - report.started_at;
    println!("      所要時間: {:.1} 秒", elapsed.num_milliseconds() as f64 / 1000.0);

    if report.has_failures() {
        println!("\n      失敗したセグメント:");
        for outcome in report.failures() {
            println!("        {}", failure_line(outcome));
        }
    }

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report).context("レポートのシリアライズに失敗")?;
        std::fs::write(path, json)
            .with_context(|| format!("レポートの書き込みに失敗: {:?}", path))?;
        println!("\n      レポートを書き出しました: {}", path.display());
    }

    if args.dry_run {
        println!("\n[ドライラン] アップロードは行っていません。--dry-run を外すと移行します。");
    }

    if report.has_failures() || report.cancelled > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn report_configuration_error(error: &ConfigurationError) {
    log::error!("{}", error);
    if let ConfigurationError::MissingEnv(_) = error {
        eprintln!("\n必要な環境変数:");
        eprintln!(
            "  {:<21} - https://<account_id>.r2.cloudflarestorage.com",
            RemoteCredentials::ENDPOINT_VAR
        );
        eprintln!("  {:<21} - R2 API トークンのアクセスキー", RemoteCredentials::ACCESS_KEY_VAR);
        eprintln!("  {:<21} - R2 API トークンのシークレット", RemoteCredentials::SECRET_KEY_VAR);
        eprintln!("  {:<21} - バケット名（省略可）", RemoteCredentials::BUCKET_VAR);
    }
}
