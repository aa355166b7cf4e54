//! キャッシュ設定

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::util::wildcard_compare;

/// デフォルト値関数
fn default_storage_handlers() -> Vec<String> {
    vec!["memory".to_string(), "file".to_string()]
}

fn default_cache_file_path() -> PathBuf {
    PathBuf::from("/tmp/cproxy-cache/")
}

fn default_cache_max_size() -> HashMap<String, HashMap<String, u64>> {
    let mut sizes = HashMap::new();
    sizes.insert(
        "public".to_string(),
        HashMap::from([
            ("memory".to_string(), 50 * 1024 * 1024), // 50MB
            ("file".to_string(), 500 * 1024 * 1024),  // 500MB
        ]),
    );
    sizes.insert(
        "private".to_string(),
        HashMap::from([
            ("memory".to_string(), 10 * 1024 * 1024), // 10MB
            ("file".to_string(), 100 * 1024 * 1024),  // 100MB
        ]),
    );
    sizes
}

fn default_response_max_size() -> u64 {
    1024 * 1024 // 1MB
}

fn default_clean_interval() -> u64 {
    300 // 5分
}

fn default_invalidate_headers() -> Vec<String> {
    vec![
        "X-Location-Id".to_string(),
        "X-User-Hash".to_string(),
        "X-Installion-Id".to_string(),
        "X-Site-Name".to_string(),
        "Xkey".to_string(),
    ]
}

fn default_vary_cookies() -> Vec<String> {
    vec!["eZSESSID*".to_string(), "PHPSESSID*".to_string()]
}

fn default_true() -> bool {
    true
}

/// キャッシュ設定
///
/// ホストから渡されるJSON設定をデシリアライズします。
/// 未指定のキーはデフォルト値が使用されます。
#[derive(Deserialize, Clone, Debug)]
pub struct CacheConfig {
    /// 使用するストレージハンドラー名のリスト（優先順）
    ///
    /// デフォルト: ["memory", "file"]
    #[serde(default = "default_storage_handlers")]
    pub cache_storage_handlers: Vec<String>,

    /// ファイルストレージのベースディレクトリ
    ///
    /// デフォルト: /tmp/cproxy-cache/
    #[serde(default = "default_cache_file_path")]
    pub cache_file_path: PathBuf,

    /// キャッシュ種別（public/private）×ストレージ毎の最大サイズ（バイト）
    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: HashMap<String, HashMap<String, u64>>,

    /// キャッシュ可能なレスポンスの最大サイズ（バイト）
    ///
    /// デフォルト: 1MB
    #[serde(default = "default_response_max_size")]
    pub response_max_size: u64,

    /// クリーンアップ実行間隔（秒）
    ///
    /// デフォルト: 300秒（5分）
    #[serde(default = "default_clean_interval")]
    pub clean_interval: u64,

    /// キャッシュキーに含めるヘッダー名パターン（ワイルドカード）
    #[serde(default)]
    pub vary_headers: Vec<String>,

    /// BAN/PURGE判定に使用するヘッダー名のリスト
    #[serde(default = "default_invalidate_headers")]
    pub invalidate_headers: Vec<String>,

    /// プライベートレスポンス（cache-control: private）をキャッシュするか
    ///
    /// デフォルト: true
    #[serde(default = "default_true", rename = "enable_private_cache")]
    pub cache_private: bool,

    /// プライベートキーに含めるCookie名パターン（ワイルドカード）
    ///
    /// デフォルト: ["eZSESSID*", "PHPSESSID*"]
    #[serde(default = "default_vary_cookies")]
    pub vary_cookies: Vec<String>,

    /// ESIタグを処理するか
    ///
    /// デフォルト: true
    #[serde(default = "default_true", rename = "enable_esi")]
    pub use_esi: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_storage_handlers: default_storage_handlers(),
            cache_file_path: default_cache_file_path(),
            cache_max_size: default_cache_max_size(),
            response_max_size: default_response_max_size(),
            clean_interval: default_clean_interval(),
            vary_headers: Vec::new(),
            invalidate_headers: default_invalidate_headers(),
            cache_private: true,
            vary_cookies: default_vary_cookies(),
            use_esi: true,
        }
    }
}

impl CacheConfig {
    /// 指定バケット（種別×ストレージ）の最大サイズを取得
    ///
    /// 未設定のバケットは 0（即時エビクション対象）として扱います。
    pub fn max_size(&self, class: &str, backend: &str) -> u64 {
        self.cache_max_size
            .get(class)
            .and_then(|sizes| sizes.get(backend))
            .copied()
            .unwrap_or(0)
    }

    /// ヘッダー名がvary_headersパターンのいずれかに一致するか
    pub fn matches_vary_header(&self, name: &str) -> bool {
        self.vary_headers
            .iter()
            .any(|pattern| wildcard_compare(name, pattern))
    }

    /// Cookie名がvary_cookiesパターンのいずれかに一致するか
    pub fn matches_vary_cookie(&self, name: &str) -> bool {
        self.vary_cookies
            .iter()
            .any(|pattern| wildcard_compare(name, pattern))
    }
}
