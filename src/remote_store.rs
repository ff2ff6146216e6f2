use crate::config::{ConfigurationError, RemoteConfig};
use crate::types::CacheKey;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_smithy_types::error::display::DisplayErrorContext;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// セグメント音声の Content-Type
pub const AUDIO_MPEG: &str = "audio/mpeg";

/// アップロードのエラー
///
/// 実行全体は止めず、該当エントリの失敗として記録する（再実行で回復できる）。
#[derive(Debug, thiserror::Error)]
#[error("{key} のアップロードに失敗: {message}")]
pub struct UploadError {
    pub key: String,
    pub message: String,
}

/// 移行先のオブジェクトストア
///
/// `put` は同じ引数で複数回呼んでもよい（上書きで冪等）。
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), UploadError>;
}

/// 新キーに対応するリモートのオブジェクトキー
///
/// # Examples
///
/// ```
/// # use segcache_migrate::remote_store::segment_object_key;
/// # use segcache_migrate::types::CacheKey;
/// let key = segment_object_key("segments", &CacheKey::new("abc"), "mp3");
/// assert_eq!(key, "segments/abc.mp3");
/// ```
pub fn segment_object_key(prefix: &str, current_key: &CacheKey, extension: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{}.{}", current_key, extension)
    } else {
        format!("{}/{}.{}", prefix, current_key, extension)
    }
}

/// S3 互換ストアの認証情報
#[derive(Clone)]
pub struct RemoteCredentials {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
}

impl std::fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &"***")
            .field("secret_access_key", &"***")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl RemoteCredentials {
    pub const ENDPOINT_VAR: &'static str = "R2_ENDPOINT";
    pub const ACCESS_KEY_VAR: &'static str = "R2_ACCESS_KEY_ID";
    pub const SECRET_KEY_VAR: &'static str = "R2_SECRET_ACCESS_KEY";
    pub const BUCKET_VAR: &'static str = "R2_BUCKET";

    /// 環境変数から読み込む
    ///
    /// # Errors
    ///
    /// 必須の変数が未設定（または空）の場合、不足している変数名をすべて含む
    /// [`ConfigurationError::MissingEnv`] を返す。
    pub fn from_env(remote: &RemoteConfig) -> Result<Self, ConfigurationError> {
        Self::from_lookup(remote, |name| std::env::var(name).ok())
    }

    /// 任意の参照関数から読み込む
    pub fn from_lookup<F>(remote: &RemoteConfig, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let endpoint = get(Self::ENDPOINT_VAR);
        let access_key_id = get(Self::ACCESS_KEY_VAR);
        let secret_access_key = get(Self::SECRET_KEY_VAR);

        match (endpoint, access_key_id, secret_access_key) {
            (Some(endpoint), Some(access_key_id), Some(secret_access_key)) => Ok(Self {
                endpoint,
                access_key_id,
                secret_access_key,
                bucket: get(Self::BUCKET_VAR).unwrap_or_else(|| remote.bucket.clone()),
            }),
            (endpoint, access_key_id, secret_access_key) => {
                let missing = [
                    (Self::ENDPOINT_VAR, endpoint.is_none()),
                    (Self::ACCESS_KEY_VAR, access_key_id.is_none()),
                    (Self::SECRET_KEY_VAR, secret_access_key.is_none()),
                ]
                .into_iter()
                .filter(|(_, missing)| *missing)
                .map(|(name, _)| name.to_string())
                .collect();
                Err(ConfigurationError::MissingEnv(missing))
            }
        }
    }
}

/// S3 互換オブジェクトストア（Cloudflare R2 など）
pub struct S3RemoteStore {
    client: S3Client,
    bucket: String,
}

impl S3RemoteStore {
    /// クライアントを作成
    ///
    /// R2 はリージョンを持たないため `auto` を指定し、パス形式でアクセスする。
    pub async fn connect(credentials: &RemoteCredentials) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(credentials.endpoint.clone())
            .credentials_provider(Credentials::new(
                credentials.access_key_id.clone(),
                credentials.secret_access_key.clone(),
                None,
                None,
                "segcache-env",
            ))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        log::info!(
            "リモートストアに接続: {} (バケット: {})",
            credentials.endpoint,
            credentials.bucket
        );

        Self {
            client: S3Client::from_conf(s3_config),
            bucket: credentials.bucket.clone(),
        }
    }
}

#[async_trait]
impl RemoteStore for S3RemoteStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), UploadError> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| UploadError {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        log::debug!("アップロード完了: {} ({} バイト)", key, size);
        Ok(())
    }
}

/// 保存されたオブジェクト
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// メモリ上のオブジェクトストア
///
/// 同じキーへの `put` は上書き。
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    put_count: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// 保存されているオブジェクト数
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `put` が呼ばれた回数（成功分のみ）
    pub fn put_count(&self) -> usize {
        self.put_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), UploadError> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                StoredObject {
                    bytes,
                    content_type: content_type.to_string(),
                },
            );
        self.put_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
