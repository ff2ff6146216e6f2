use anyhow::{Context, Result};
use regex_lite::Regex;
use std::fs;
use std::path::Path;

/// 台本ファイル名
pub const SCRIPT_FILE_NAME: &str = "script.md";

/// 台本の1発話
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptSegment {
    /// 話者ラベル（例: "ERIC"）
    pub speaker: String,
    /// 整形済みの読み上げテキスト
    pub text: String,
}

/// エピソード（台本を発話単位に分解したもの）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Episode {
    /// エピソードID（ディレクトリ名）
    pub id: String,
    pub segments: Vec<ScriptSegment>,
}

/// Markdown 台本のパーサ
///
/// `**LABEL:** テキスト` 形式の行だけを発話として取り出し、
/// 演出指示 (`**[...]**`, `[...]`) と強調記号を取り除く。
pub struct ScriptParser {
    speaker_line: Regex,
    bold_direction: Regex,
    bracket_note: Regex,
}

impl ScriptParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            speaker_line: Regex::new(r"^\*\*([A-Z]+):\*\*\s*(.*)")
                .context("話者行の正規表現のコンパイルに失敗")?,
            bold_direction: Regex::new(r"\*\*\[.*?\]\*\*")
                .context("演出指示の正規表現のコンパイルに失敗")?,
            bracket_note: Regex::new(r"\[.*?\]").context("注記の正規表現のコンパイルに失敗")?,
        })
    }

    /// 台本テキストを発話列に分解
    ///
    /// 話者ラベルの妥当性はここでは判定しない（カタログ構築時に絞り込む）。
    /// 整形後に空になった発話は捨てる。
    pub fn parse(&self, content: &str) -> Vec<ScriptSegment> {
        let mut segments = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some(caps) = self.speaker_line.captures(line) else {
                continue;
            };
            let speaker = &caps[1];
            let raw_text = caps.get(2).map_or("", |m| m.as_str());

            let text = self.bold_direction.replace_all(raw_text, "");
            let text = self.bracket_note.replace_all(&text, "");
            let text = text.replace("**", "").replace('*', "");
            let text = text.trim();

            if !text.is_empty() {
                segments.push(ScriptSegment {
                    speaker: speaker.to_string(),
                    text: text.to_string(),
                });
            }
        }

        segments
    }

    /// エピソードディレクトリを走査して台本を読み込む
    ///
    /// `root` 直下のディレクトリのうち `script.md` を持つものをエピソードとみなす。
    /// `api` ディレクトリは除外。結果はディレクトリ名順。
    /// `root` が存在しない場合は空を返す。
    pub fn discover_episodes<P: AsRef<Path>>(&self, root: P) -> Result<Vec<Episode>> {
        let root = root.as_ref();
        if !root.exists() {
            log::warn!("エピソードディレクトリが見つかりません: {:?}", root);
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        for entry in fs::read_dir(root)
            .with_context(|| format!("エピソードディレクトリの読み込みに失敗: {:?}", root))?
        {
            let entry = entry.with_context(|| format!("ディレクトリ走査に失敗: {:?}", root))?;
            if entry.path().is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let mut episodes = Vec::new();
        for dir in dirs {
            let Some(id) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if id == "api" {
                continue;
            }

            let script_path = dir.join(SCRIPT_FILE_NAME);
            if !script_path.exists() {
                log::debug!("台本なし: {:?}", dir);
                continue;
            }

            let content = fs::read_to_string(&script_path)
                .with_context(|| format!("台本の読み込みに失敗: {:?}", script_path))?;
            episodes.push(Episode {
                id: id.to_string(),
                segments: self.parse(&content),
            });
        }

        Ok(episodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SCRIPT: &str = r#"
# Episode 12: PyTorch FSDP

**ERIC:** Welcome back to Strollcast.

**MAYA:** **[laughs]** Thanks, Eric. Today we're reading *the* FSDP paper [ref 3].

**NARRATOR:** Not a real host.

**ERIC:** [pause]

Some prose that isn't dialogue.
**eric:** lowercase labels are ignored
"#;

    #[test]
    fn test_parse_extracts_speaker_lines() {
        let parser = ScriptParser::new().unwrap();
        let segments = parser.parse(SCRIPT);

        assert_eq!(
            segments,
            vec![
                ScriptSegment {
                    speaker: "ERIC".to_string(),
                    text: "Welcome back to Strollcast.".to_string(),
                },
                ScriptSegment {
                    speaker: "MAYA".to_string(),
                    text: "Thanks, Eric. Today we're reading the FSDP paper .".to_string(),
                },
                ScriptSegment {
                    speaker: "NARRATOR".to_string(),
                    text: "Not a real host.".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_empty() {
        let parser = ScriptParser::new().unwrap();
        assert!(parser.parse("").is_empty());
        assert!(parser.parse("\n\n   \n").is_empty());
    }

    #[test]
    fn test_discover_episodes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::create_dir(root.join("b-episode"))?;
        fs::write(root.join("b-episode").join(SCRIPT_FILE_NAME), "**ERIC:** Second.\n")?;
        fs::create_dir(root.join("a-episode"))?;
        fs::write(root.join("a-episode").join(SCRIPT_FILE_NAME), "**MAYA:** First.\n")?;
        fs::create_dir(root.join("api"))?;
        fs::write(root.join("api").join(SCRIPT_FILE_NAME), "**ERIC:** Ignored.\n")?;
        fs::create_dir(root.join("no-script"))?;
        fs::write(root.join("stray.md"), "**ERIC:** Not a directory.\n")?;

        let parser = ScriptParser::new()?;
        let episodes = parser.discover_episodes(root)?;

        let ids: Vec<&str> = episodes.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a-episode", "b-episode"]);
        assert_eq!(episodes[0].segments[0].text, "First.");
        assert_eq!(episodes[1].segments[0].speaker, "ERIC");

        Ok(())
    }

    #[test]
    fn test_discover_missing_root() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let parser = ScriptParser::new()?;
        let episodes = parser.discover_episodes(temp_dir.path().join("missing"))?;
        assert!(episodes.is_empty());
        Ok(())
    }
}
