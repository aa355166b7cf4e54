//! # エラー定義
//!
//! キャッシュ拡張全体で使用するエラー型を提供します。
//! キャッシュ不可（not cacheable）はエラーではなく `Ok(None)` として
//! 扱われるため、ここには含まれません。

use std::fmt;
use std::io;

/// キャッシュエラー
#[derive(Debug)]
pub enum CacheError {
    /// ストレージハンドラーが未設定または不明
    StorageUnavailable(String),
    /// ストレージI/Oエラー
    Io(io::Error),
    /// パースエラー（Cache-Control、HTTPレスポンス、設定）
    Parse(String),
    /// ESIサブリクエストの失敗
    SubRequest(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StorageUnavailable(msg) => write!(f, "storage unavailable: {}", msg),
            Self::Io(e) => write!(f, "storage I/O error: {}", e),
            Self::Parse(msg) => write!(f, "parse error: {}", msg),
            Self::SubRequest(msg) => write!(f, "sub-request error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl CacheError {
    /// ストレージ未設定エラーを作成
    pub fn storage_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    /// パースエラーを作成
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    /// サブリクエストエラーを作成
    pub fn sub_request<S: Into<String>>(msg: S) -> Self {
        Self::SubRequest(msg.into())
    }
}

/// キャッシュ処理結果
pub type CacheResult<T> = Result<T, CacheError>;
