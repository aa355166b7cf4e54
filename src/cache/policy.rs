//! キャッシュポリシー
//!
//! Cache-Controlヘッダーの解析を行います。

use crate::error::{CacheError, CacheResult};

/// Cache-Control ディレクティブ
#[derive(Debug, Clone, Default)]
pub struct CacheControl {
    /// max-age（秒）
    pub max_age: Option<u64>,
    /// s-maxage（秒、プロキシ用）
    pub s_maxage: Option<u64>,
    /// no-cache フラグ
    pub no_cache: bool,
    /// no-store フラグ
    pub no_store: bool,
    /// private フラグ
    pub private: bool,
    /// public フラグ
    pub public: bool,
}

impl CacheControl {
    /// Cache-Controlヘッダー値をパース
    ///
    /// 未知のディレクティブは無視します。既知の数値ディレクティブの値が
    /// 数値として解釈できない場合はパースエラーを返します。
    pub fn parse(value: &str) -> CacheResult<Self> {
        let mut cc = Self::default();

        for directive in value.split(',') {
            let directive = directive.trim().to_lowercase();

            if directive.is_empty() {
                continue;
            }

            if directive == "no-cache" {
                cc.no_cache = true;
            } else if directive == "no-store" {
                cc.no_store = true;
            } else if directive == "private" {
                cc.private = true;
            } else if directive == "public" {
                cc.public = true;
            } else if let Some(value) = directive.strip_prefix("max-age=") {
                cc.max_age = Some(value.parse().map_err(|_| {
                    CacheError::parse(format!("invalid max-age value '{}'", value))
                })?);
            } else if let Some(value) = directive.strip_prefix("s-maxage=") {
                cc.s_maxage = Some(value.parse().map_err(|_| {
                    CacheError::parse(format!("invalid s-maxage value '{}'", value))
                })?);
            }
        }

        Ok(cc)
    }

    /// 有効なmax-age（秒）を取得
    ///
    /// s-maxageが正の場合はs-maxageを優先します。
    /// どちらも無い場合は 0（キャッシュ不可）。
    pub fn effective_max_age(&self) -> u64 {
        match self.s_maxage {
            Some(s) if s > 0 => s,
            _ => self.max_age.unwrap_or(0),
        }
    }
}
