use crate::types::MigrationOutcome;

/// プログレスバーの幅（文字数）
const BAR_WIDTH: usize = 20;

/// 進捗表示の1行
///
/// # Examples
///
/// ```
/// # use segcache_migrate::progress::render_progress;
/// assert_eq!(render_progress(1, 4), "[#####---------------] 25% (1/4)");
/// ```
pub fn render_progress(done: usize, total: usize) -> String {
    let pct = if total == 0 { 100 } else { done * 100 / total };
    let filled = (pct * BAR_WIDTH / 100).min(BAR_WIDTH);
    format!(
        "[{}{}] {}% ({}/{})",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        pct,
        done,
        total
    )
}

/// 失敗エントリの診断行
pub fn failure_line(outcome: &MigrationOutcome) -> String {
    format!(
        "失敗: {} [{}] - {}",
        outcome.episode_id,
        outcome.legacy_key,
        outcome.error.as_deref().unwrap_or("不明なエラー")
    )
}
