use crate::cache_key::KeyScheme;
use crate::config::{SpeakerConfig, SynthesisConfig};
use crate::script::Episode;
use crate::types::{CacheKey, CatalogEntry, NormalizationPolicy, SynthesisIdentity};
use std::collections::{BTreeMap, HashMap};

/// プレビューに含める最大文字数
const PREVIEW_CHARS: usize = 50;

/// 話者ラベル → 音声ID の対応表
#[derive(Clone, Debug, Default)]
pub struct VoiceTable {
    voices: HashMap<String, String>,
}

impl VoiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, voice_id: impl Into<String>) {
        self.voices.insert(label.into(), voice_id.into());
    }

    pub fn voice_for(&self, label: &str) -> Option<&str> {
        self.voices.get(label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

impl From<&[SpeakerConfig]> for VoiceTable {
    fn from(speakers: &[SpeakerConfig]) -> Self {
        let mut table = VoiceTable::new();
        for speaker in speakers {
            table.insert(speaker.label.clone(), speaker.voice_id.clone());
        }
        table
    }
}

/// セグメントカタログ
///
/// エピソードの発話ごとに旧キーと新キーを計算する。
/// 設定はすべて構築時に受け取り、以後変更しない。
pub struct SegmentCatalog {
    voices: VoiceTable,
    synthesis: SynthesisConfig,
    legacy: KeyScheme,
    current: KeyScheme,
}

impl SegmentCatalog {
    pub fn new(voices: VoiceTable, synthesis: SynthesisConfig, policy: NormalizationPolicy) -> Self {
        Self {
            voices,
            synthesis,
            legacy: KeyScheme::legacy(),
            current: KeyScheme::current(policy),
        }
    }

    /// 話者ラベルとテキストから合成条件を組み立てる
    ///
    /// 未登録の話者ラベルは `None`。
    pub fn identity_for(&self, speaker: &str, text: &str) -> Option<SynthesisIdentity> {
        let voice_id = self.voices.voice_for(speaker)?;
        Some(SynthesisIdentity {
            text: text.to_string(),
            voice_id: voice_id.to_string(),
            model_id: self.synthesis.model_id.clone(),
            stability: self.synthesis.stability,
            similarity_boost: self.synthesis.similarity_boost,
            style: self.synthesis.style,
        })
    }

    /// カタログを構築
    ///
    /// `filter` を指定した場合はそのエピソードIDのみ対象にする。
    /// 未登録の話者の発話は黙って除外する。
    /// 同じ旧キーを持つ発話は1エントリにまとめ、順序は最初の出現位置、
    /// 出自情報は最後の出現で上書きする。
    pub fn build(&self, episodes: &[Episode], filter: Option<&str>) -> Vec<CatalogEntry> {
        let mut entries: Vec<CatalogEntry> = Vec::new();
        let mut index: HashMap<CacheKey, usize> = HashMap::new();
        let mut excluded = 0usize;

        for episode in episodes {
            if filter.is_some_and(|id| id != episode.id) {
                continue;
            }

            for segment in &episode.segments {
                let Some(identity) = self.identity_for(&segment.speaker, &segment.text) else {
                    excluded += 1;
                    continue;
                };

                let entry = CatalogEntry {
                    legacy_key: self.legacy.derive_key(&identity),
                    current_key: self.current.derive_key(&identity),
                    episode_id: episode.id.clone(),
                    speaker: segment.speaker.clone(),
                    text_preview: preview(&segment.text),
                };

                match index.get(&entry.legacy_key) {
                    Some(&pos) => entries[pos] = entry,
                    None => {
                        index.insert(entry.legacy_key.clone(), entries.len());
                        entries.push(entry);
                    }
                }
            }
        }

        if excluded > 0 {
            log::debug!("未登録の話者による発話を {} 件除外しました", excluded);
        }

        entries
    }
}

/// エピソードごとのエントリ数
pub fn group_by_episode(entries: &[CatalogEntry]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for entry in entries {
        *counts.entry(entry.episode_id.clone()).or_insert(0) += 1;
    }
    counts
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
