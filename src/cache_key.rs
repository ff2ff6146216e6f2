use crate::types::{CacheKey, NormalizationPolicy, SynthesisIdentity};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io;

/// キャッシュキーの導出方式
///
/// 旧方式と現行方式を別々の名前付き方式として持つ。
/// 両者の違いは、正規化ポリシーをハッシュ入力に含めるかどうかだけ。
///
/// # Examples
///
/// ```
/// # use segcache_migrate::cache_key::KeyScheme;
/// # use segcache_migrate::types::{NormalizationPolicy, SynthesisIdentity};
/// let identity = SynthesisIdentity {
///     text: "Hello".to_string(),
///     voice_id: "voice".to_string(),
///     model_id: "model".to_string(),
///     stability: 0.5,
///     similarity_boost: 0.75,
///     style: 0.0,
/// };
/// let legacy = KeyScheme::legacy().derive_key(&identity);
/// let current = KeyScheme::current(NormalizationPolicy { target_lufs: -16 }).derive_key(&identity);
/// assert_ne!(legacy, current);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyScheme {
    /// v1: 正規化導入前のキー
    Legacy,
    /// v2: 正規化ポリシーを含むキー
    Current(NormalizationPolicy),
}

impl KeyScheme {
    pub fn legacy() -> Self {
        KeyScheme::Legacy
    }

    pub fn current(policy: NormalizationPolicy) -> Self {
        KeyScheme::Current(policy)
    }

    /// 方式のバージョン番号
    pub fn version(&self) -> u32 {
        match self {
            KeyScheme::Legacy => 1,
            KeyScheme::Current(_) => 2,
        }
    }

    /// 合成条件からキャッシュキーを導出
    ///
    /// I/O を伴わない純粋関数。空テキストなども検証せずにそのまま扱う。
    pub fn derive_key(&self, identity: &SynthesisIdentity) -> CacheKey {
        let encoded = self.canonical_encoding(identity);
        CacheKey::new(format!("{:x}", Sha256::digest(encoded.as_bytes())))
    }

    /// ハッシュ入力となる正規化済みJSON
    ///
    /// キーは辞書順、区切りは `", "` と `": "`、ASCII 以外は `\uXXXX` でエスケープ。
    /// 既存のローカルキャッシュのファイル名と一致させるため、この形式は変更しないこと。
    pub fn canonical_encoding(&self, identity: &SynthesisIdentity) -> String {
        let fields = self.canonical_fields(identity);

        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter);
        // Vec<u8> への書き込みと文字列キーのマップは失敗しない
        fields
            .serialize(&mut ser)
            .expect("in-memory JSON serialization is infallible");

        // フォーマッタは ASCII のみを出力する
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn canonical_fields(&self, identity: &SynthesisIdentity) -> BTreeMap<&'static str, Value> {
        let mut fields = BTreeMap::new();
        fields.insert("text", Value::from(identity.text.as_str()));
        fields.insert("voice_id", Value::from(identity.voice_id.as_str()));
        fields.insert("model_id", Value::from(identity.model_id.as_str()));
        fields.insert("stability", Value::from(identity.stability));
        fields.insert("similarity_boost", Value::from(identity.similarity_boost));
        fields.insert("style", Value::from(identity.style));

        // ポリシーの有無そのものを入力に含める（値が同じでも旧キーとは衝突しない）
        if let KeyScheme::Current(policy) = self {
            fields.insert("normalized", Value::Bool(true));
            fields.insert("lufs", Value::from(policy.target_lufs));
        }

        fields
    }
}

/// 正規化済みJSON用のフォーマッタ
struct CanonicalFormatter;

impl serde_json::ser::Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        for ch in fragment.chars() {
            if (' '..='~').contains(&ch) {
                writer.write_all(&[ch as u8])?;
            } else {
                // BMP 外はサロゲートペア
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}
