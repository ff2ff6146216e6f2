use crate::cache_index::LocalCache;
use crate::config::ConfigurationError;
use crate::normalize::NormalizationEngine;
use crate::remote_store::{segment_object_key, RemoteStore, AUDIO_MPEG};
use crate::types::{CatalogEntry, MigrationOutcome, OutcomeStatus};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

/// ローカルに音声がない場合のスキップ理由
pub const NOT_IN_LOCAL_CACHE: &str = "not in local cache";

/// 実行オプション
#[derive(Clone, Copy, Debug)]
pub struct MigrationOptions {
    /// 同時に処理するエントリ数の上限
    pub concurrency: usize,
    /// 変換とアップロードを行わず、計画だけを検証する
    pub dry_run: bool,
}

/// 実行結果の集計
#[derive(Clone, Debug, Serialize)]
pub struct MigrationReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub dry_run: bool,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    /// 停止要求により着手しなかったエントリ数
    pub cancelled: usize,
    /// 完了順の結果
    pub outcomes: Vec<MigrationOutcome>,
}

impl MigrationReport {
    fn new(total: usize, dry_run: bool) -> Self {
        let now = Local::now();
        Self {
            started_at: now,
            finished_at: now,
            dry_run,
            total,
            success: 0,
            failed: 0,
            skipped: 0,
            cancelled: 0,
            outcomes: Vec::with_capacity(total),
        }
    }

    fn record(&mut self, outcome: MigrationOutcome) {
        match outcome.status {
            OutcomeStatus::Success => self.success += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
            OutcomeStatus::Failed => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    /// 完了したエントリ数
    pub fn completed(&self) -> usize {
        self.outcomes.len()
    }

    /// 失敗したエントリ
    pub fn failures(&self) -> impl Iterator<Item = &MigrationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// 1エントリ分の処理（読み込み → 正規化 → アップロード）
struct Worker {
    cache: LocalCache,
    engine: Arc<NormalizationEngine>,
    store: Option<Arc<dyn RemoteStore>>,
    object_prefix: String,
    extension: String,
}

impl Worker {
    async fn migrate(self: Arc<Self>, entry: CatalogEntry, dry_run: bool) -> MigrationOutcome {
        // スキャン後に外部から削除されている可能性がある
        let raw = match self.cache.read(&entry.legacy_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return MigrationOutcome::skipped(&entry, NOT_IN_LOCAL_CACHE),
            Err(e) => return MigrationOutcome::failed(&entry, format!("local read failed: {:#}", e)),
        };

        if dry_run {
            return MigrationOutcome::success(&entry);
        }

        let normalized = match self.engine.normalize(&raw).await {
            Ok(normalized) => normalized,
            Err(e) => return MigrationOutcome::failed(&entry, format!("normalization failed: {}", e)),
        };

        let Some(store) = &self.store else {
            return MigrationOutcome::failed(&entry, "upload failed: remote store not configured");
        };

        let key = segment_object_key(&self.object_prefix, &entry.current_key, &self.extension);
        match store.put(&key, normalized, AUDIO_MPEG).await {
            Ok(()) => MigrationOutcome::success(&entry),
            Err(e) => MigrationOutcome::failed(&entry, format!("upload failed: {}", e)),
        }
    }
}

/// 移行処理のオーケストレータ
///
/// ワークセットの各エントリを上限付きで並列に処理し、完了順に結果を集計する。
/// エントリ同士は独立しており、1件の失敗が他のエントリを止めることはない。
pub struct MigrationOrchestrator {
    worker: Arc<Worker>,
}

impl MigrationOrchestrator {
    pub fn new(
        cache: LocalCache,
        engine: Arc<NormalizationEngine>,
        store: Option<Arc<dyn RemoteStore>>,
        object_prefix: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                cache,
                engine,
                store,
                object_prefix: object_prefix.into(),
                extension: extension.into(),
            }),
        }
    }

    /// ワークセットを移行
    ///
    /// `running` が `false` になると新しいエントリの着手をやめ、処理中のものだけを完了させる。
    /// `on_progress` は結果が届くたびに `(結果, 完了数, 総数)` で呼ばれる。
    ///
    /// # Errors
    ///
    /// ワーカー数が0、またはドライラン以外でリモートストアがない場合、
    /// どのエントリにも着手せずに [`ConfigurationError`] を返す。
    pub async fn run<F>(
        &self,
        work_set: Vec<CatalogEntry>,
        options: MigrationOptions,
        running: Arc<AtomicBool>,
        mut on_progress: F,
    ) -> Result<MigrationReport, ConfigurationError>
    where
        F: FnMut(&MigrationOutcome, usize, usize),
    {
        if options.concurrency == 0 {
            return Err(ConfigurationError::InvalidWorkers);
        }
        if !options.dry_run && self.worker.store.is_none() {
            return Err(ConfigurationError::MissingRemoteStore);
        }

        let total = work_set.len();
        let mut report = MigrationReport::new(total, options.dry_run);
        let mut pending = work_set.into_iter();
        let mut tasks: JoinSet<MigrationOutcome> = JoinSet::new();
        let mut dispatched = 0usize;

        log::info!(
            "移行を開始: {} 件 (ワーカー数: {}, ドライラン: {})",
            total,
            options.concurrency,
            options.dry_run
        );

        loop {
            while tasks.len() < options.concurrency && running.load(Ordering::SeqCst) {
                let Some(entry) = pending.next() else {
                    break;
                };
                let worker = Arc::clone(&self.worker);
                let dry_run = options.dry_run;

                tasks.spawn(async move {
                    // ワーカーのパニックも失敗として1件に数える
                    match tokio::spawn(worker.migrate(entry.clone(), dry_run)).await {
                        Ok(outcome) => outcome,
                        Err(e) => MigrationOutcome::failed(&entry, format!("worker aborted: {}", e)),
                    }
                });
                dispatched += 1;
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("ワーカータスクの回収に失敗: {}", e);
                    continue;
                }
            };

            if outcome.status == OutcomeStatus::Failed {
                log::warn!(
                    "移行失敗: {} ({}) - {}",
                    outcome.episode_id,
                    outcome.legacy_key,
                    outcome.error.as_deref().unwrap_or("")
                );
            }

            report.record(outcome);
            if let Some(last) = report.outcomes.last() {
                on_progress(last, report.completed(), total);
            }
        }

        report.cancelled = total - dispatched;
        report.finished_at = Local::now();

        if report.cancelled > 0 {
            log::warn!("停止要求により {} 件を未処理のまま終了しました", report.cancelled);
        }
        log::info!(
            "移行完了: 成功 {} / 失敗 {} / スキップ {}",
            report.success,
            report.failed,
            report.skipped
        );

        Ok(report)
    }
}
