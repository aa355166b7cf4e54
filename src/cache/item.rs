//! キャッシュアイテム
//!
//! キャッシュされたレスポンス1件のメタデータとストレージハンドルを
//! 保持します。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ftlog::info;

use crate::error::{CacheError, CacheResult};
use crate::http::Response;

use super::config::CacheConfig;
use super::esi::{parse_esi, EsiTag};
use super::key::{private_key, public_key};
use super::policy::CacheControl;
use super::storage::Storage;

/// キャッシュ種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemClass {
    /// 誰にでも提供可能なキャッシュ
    Public,
    /// クライアント属性でキーされたキャッシュ
    Private,
}

impl ItemClass {
    /// 種別名を取得
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

/// キャッシュアイテム
#[derive(Debug, Clone)]
pub struct Item {
    /// キャッシュ種別
    pub class: ItemClass,
    /// 種別に対応するフィンガープリント
    pub key: String,
    /// リクエストURLパス（ログ用）
    pub path: String,
    /// ヒット数
    pub hits: u64,
    /// 格納済みバイト数
    pub size: u64,
    /// 作成時刻
    pub created_at: Instant,
    /// 最終ヒット時刻
    pub last_hit: Instant,
    /// 有効期限（秒）
    pub max_age_secs: u64,
    /// BAN/PURGE判定用ヘッダーのスナップショット
    ///
    /// 設定された各ヘッダー名に対し、作成時点のオリジンレスポンスの
    /// 値リスト（存在しなければ空）を保持します。
    pub invalidate_headers: HashMap<String, Vec<String>>,
    /// 解析済みESIタグ（解析順）
    pub esi_tags: Vec<EsiTag>,
    /// 現在バイト列を保持しているストレージ
    pub storage: Storage,
}

impl Item {
    /// オリジンレスポンスからアイテムを作成する
    ///
    /// キャッシュ可否の判定は呼び出し側（ハンドラー）で済んでいる前提。
    /// ESIタグを取り除いた縮約レスポンスを最初のストレージハンドラーに
    /// 格納します。
    pub fn from_response(
        resp: &Response,
        cache_control: &CacheControl,
        max_age_secs: u64,
        config: &CacheConfig,
    ) -> CacheResult<Self> {
        let req = resp
            .request
            .as_ref()
            .ok_or_else(|| CacheError::parse("response has no originating request"))?;

        // 種別とキーを決定
        let class = if cache_control.private && config.cache_private {
            ItemClass::Private
        } else {
            ItemClass::Public
        };
        let key = match class {
            ItemClass::Public => public_key(req, config),
            ItemClass::Private => private_key(req, config),
        };

        // BAN/PURGE用ヘッダーのスナップショット
        let mut invalidate_headers = HashMap::new();
        for header_name in &config.invalidate_headers {
            let values: Vec<String> = resp
                .headers
                .get_all(header_name)
                .map(String::from)
                .collect();
            invalidate_headers.insert(header_name.clone(), values);
        }

        // 最初のストレージハンドラーを使用
        let first_handler = config
            .cache_storage_handlers
            .first()
            .ok_or_else(|| CacheError::storage_unavailable("no storage handler configured"))?;
        let mut storage = Storage::from_name(first_handler, &key, config)?;

        // ESIタグを取り除いた縮約レスポンスを格納
        let (reduced_body, esi_tags) = parse_esi(&resp.body);
        let reduced = Response {
            status: resp.status,
            reason: resp.reason.clone(),
            headers: resp.headers.clone(),
            body: reduced_body,
            request: None,
        };
        storage.store_response(&reduced)?;
        let size = storage.size()?;

        let now = Instant::now();
        let item = Self {
            class,
            key,
            path: req.path.clone(),
            hits: 0,
            size,
            created_at: now,
            last_hit: now,
            max_age_secs,
            invalidate_headers,
            esi_tags,
            storage,
        };
        item.log_action("create", "-");
        Ok(item)
    }

    /// 有効期限切れかどうか
    #[inline]
    pub fn has_expired(&self) -> bool {
        self.created_at.elapsed() >= Duration::from_secs(self.max_age_secs)
    }

    /// ストレージからレスポンスを取り出す
    pub fn fetch_response(&self) -> CacheResult<Response> {
        self.storage.fetch_response()
    }

    /// バイト列を別のストレージハンドラーへ移動する
    ///
    /// 移動元からフェッチ → 移動先へ格納 → 移動元を削除 → ハンドルと
    /// サイズを更新します。
    pub fn move_storage(&mut self, name: &str, config: &CacheConfig) -> CacheResult<()> {
        self.log_action("move", &format!("move storage to '{}'", name));
        let mut new_storage = Storage::from_name(name, &self.key, config)?;
        let resp = self.storage.fetch_response()?;
        new_storage.store_response(&resp)?;
        self.storage.delete()?;
        self.size = new_storage.size()?;
        self.storage = new_storage;
        Ok(())
    }

    /// アイテムの保持するバイト列を破棄する
    pub fn clear(&mut self) {
        let _ = self.storage.delete();
        self.size = 0;
    }

    /// アイテムに対する操作をログ出力する
    pub fn log_action(&self, action: &str, desc: &str) {
        info!(
            "CACHE :: {} :: {} - {} :: {}",
            action.to_uppercase(),
            self.key,
            self.path,
            desc
        );
    }
}
