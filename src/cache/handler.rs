//! キャッシュハンドラー
//!
//! リクエスト/レスポンスの振り分けを行うフロントドアです。
//!
//! - GET: ヒットなら格納済みレスポンスを実体化してESI展開後に返す
//! - BAN/PURGE: ローカル発でなければ405、許可されれば無効化を実行
//! - レスポンス側: キャッシュ可能なら格納し、MISSマーカー付きで返す
//!
//! インデックスはDashMapで共有され、ヒット計上はシャードロック内の
//! `get_mut`、クリーンアップと無効化は収集してから削除する方式です。
//! クリーンアップのインターバル判定とパスは同一のMutexガード下で
//! 実行されるため、同時に複数のクリーンが走ることはありません。

use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ftlog::{info, warn};

use crate::error::CacheResult;
use crate::http::{Request, Response};

use super::config::CacheConfig;
use super::esi::{expand_esi, EsiTag};
use super::invalidate::{extract_targets, item_matches};
use super::item::{Item, ItemClass};
use super::key::{private_key, public_key};
use super::policy::CacheControl;
use super::storage::Storage;

/// ホストが提供するサブリクエストコールバック
///
/// `Ok(None)` は「このタグをスキップ」を意味します。
pub type SubRequestFn = Arc<dyn Fn(&Request) -> CacheResult<Option<Response>> + Send + Sync>;

/// BAN/PURGEを許可するリモートアドレス（ローカル発の目印）
const LOCAL_SENTINEL: &str = ":0";

/// インデックスのキー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    /// キャッシュ種別
    pub class: ItemClass,
    /// フィンガープリント
    pub key: String,
}

/// フェッチ結果のスナップショット
///
/// シャードロックの外でI/Oを行うため、安価なストレージハンドルと
/// メタデータだけを持ち出します。
#[derive(Debug, Clone)]
pub struct ItemSnapshot {
    /// インデックスキー
    pub key: ItemKey,
    /// 計上後のヒット数
    pub hits: u64,
    /// ストレージハンドル
    pub storage: Storage,
    /// 解析済みESIタグ
    pub esi_tags: Vec<EsiTag>,
    /// リクエストURLパス（ログ用）
    pub path: String,
}

/// キャッシュ統計情報
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// エントリ数
    pub entries: usize,
    /// メモリストレージの合計バイト数
    pub memory_usage: u64,
    /// ファイルストレージの合計バイト数
    pub file_usage: u64,
    /// キャッシュヒット数
    pub hits: u64,
    /// キャッシュミス数
    pub misses: u64,
}

/// キャッシュハンドラー
///
/// 複数のホストスレッドから同時に呼び出される共有サービスです。
pub struct CacheHandler {
    /// 設定
    config: CacheConfig,
    /// アイテムインデックス
    items: DashMap<ItemKey, Item>,
    /// 最終クリーン時刻（ガードはクリーンパス全体を保護する）
    last_clean: Mutex<Instant>,
    /// サブリクエストコールバック
    sub_request: SubRequestFn,
    /// ヒット数
    hits: AtomicU64,
    /// ミス数
    misses: AtomicU64,
}

impl CacheHandler {
    /// 新しいハンドラーを作成
    ///
    /// キャッシュディレクトリを初期化（削除して作り直し）します。
    pub fn new(config: CacheConfig, sub_request: SubRequestFn) -> CacheResult<Self> {
        let handler = Self {
            config,
            items: DashMap::new(),
            last_clean: Mutex::new(Instant::now()),
            sub_request,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        handler.clear()?;
        Ok(handler)
    }

    /// 設定を取得
    #[inline]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// キーからアイテムをフェッチしヒットを計上する
    ///
    /// 有効期限切れのアイテムはスキップします（削除はクリーンで行う）。
    fn fetch_by_key(&self, class: ItemClass, key: String) -> Option<ItemSnapshot> {
        if key.is_empty() {
            return None;
        }
        let item_key = ItemKey { class, key };
        let mut entry = self.items.get_mut(&item_key)?;
        if entry.has_expired() {
            return None;
        }
        entry.hits += 1;
        entry.last_hit = Instant::now();
        Some(ItemSnapshot {
            key: item_key,
            hits: entry.hits,
            storage: entry.storage.clone(),
            esi_tags: entry.esi_tags.clone(),
            path: entry.path.clone(),
        })
    }

    /// キーからアイテムを覗き見る
    ///
    /// ヒット計上を行わない読み取り専用の検索。期限切れはスキップ。
    fn peek_by_key(&self, class: ItemClass, key: String) -> Option<ItemSnapshot> {
        if key.is_empty() {
            return None;
        }
        let item_key = ItemKey { class, key };
        let entry = self.items.get(&item_key)?;
        if entry.has_expired() {
            return None;
        }
        Some(ItemSnapshot {
            key: item_key,
            hits: entry.hits,
            storage: entry.storage.clone(),
            esi_tags: entry.esi_tags.clone(),
            path: entry.path.clone(),
        })
    }

    /// リクエストに対応するアイテムを覗き見る
    ///
    /// 格納時の重複チェック用。hits / last_hit はGET処理のフェッチ
    /// だけが更新します。
    fn peek(&self, req: &Request) -> Option<ItemSnapshot> {
        self.peek_by_key(ItemClass::Private, private_key(req, &self.config))
            .or_else(|| self.peek_by_key(ItemClass::Public, public_key(req, &self.config)))
    }

    /// リクエストからアイテムをフェッチする
    ///
    /// プライベートキーを先に試し、パブリックキーへフォールバックします。
    pub fn fetch(&self, req: &Request) -> Option<ItemSnapshot> {
        let snapshot = self
            .fetch_by_key(ItemClass::Private, private_key(req, &self.config))
            .or_else(|| self.fetch_by_key(ItemClass::Public, public_key(req, &self.config)));
        match &snapshot {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        snapshot
    }

    /// レスポンスをキャッシュ可能なら格納する
    ///
    /// キャッシュ不可の場合は `Ok(None)`。同一キーのアイテムが既に
    /// あれば上書きせず再利用します。
    pub fn store(&self, resp: &Response) -> CacheResult<Option<ItemSnapshot>> {
        let req = match &resp.request {
            Some(r) => Arc::clone(r),
            None => return Ok(None),
        };

        // GETの2xxレスポンスのみ対象
        if req.method != "GET" || !(200..300).contains(&resp.status) {
            return Ok(None);
        }

        let cache_control = CacheControl::parse(resp.headers.get("Cache-Control").unwrap_or(""))?;
        if cache_control.no_store || cache_control.no_cache {
            return Ok(None);
        }
        if cache_control.private && !self.config.cache_private {
            return Ok(None);
        }

        // サイズ上限（Content-Length不明なら許可）
        if let Some(length) = resp.content_length() {
            if length > self.config.response_max_size {
                return Ok(None);
            }
        }

        let max_age = cache_control.effective_max_age();
        if max_age == 0 {
            return Ok(None);
        }

        // 既存アイテムがあれば再利用（ヒット計上なし）
        if let Some(existing) = self.peek(&req) {
            return Ok(Some(existing));
        }

        let item = Item::from_response(resp, &cache_control, max_age, &self.config)?;
        let item_key = ItemKey {
            class: item.class,
            key: item.key.clone(),
        };

        // 同一キーの同時格納は先勝ち。敗者のストレージは破棄するが、
        // ファイルはキーが同じで内容も等価なため削除しない。
        match self.items.entry(item_key) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                Ok(Some(ItemSnapshot {
                    key: entry.key().clone(),
                    hits: existing.hits,
                    storage: existing.storage.clone(),
                    esi_tags: existing.esi_tags.clone(),
                    path: existing.path.clone(),
                }))
            }
            Entry::Vacant(entry) => {
                let snapshot = ItemSnapshot {
                    key: entry.key().clone(),
                    hits: item.hits,
                    storage: item.storage.clone(),
                    esi_tags: item.esi_tags.clone(),
                    path: item.path.clone(),
                };
                entry.insert(item);
                Ok(Some(snapshot))
            }
        }
    }

    /// 受信リクエストを処理する
    ///
    /// `Ok(None)` は「オリジンへパススルー」を意味します。
    pub fn on_request(&self, req: &mut Request) -> CacheResult<Option<Response>> {
        // ESI対応を上流へ通知
        if self.config.use_esi {
            req.headers.add("Surrogate-Capability", "content=ESI/1.0");
        }

        match req.method.as_str() {
            "BAN" | "PURGE" => {
                let mut resp = Response::new(200);
                resp.headers.set("Content-Type", "text/plain");
                resp.request = Some(Arc::new(req.clone()));
                // ローカル発のみ許可
                if req.remote_addr != LOCAL_SENTINEL {
                    resp.status = 405;
                    resp.reason = "Not Allowed".to_string();
                    return Ok(Some(resp));
                }
                self.invalidate(req);
                Ok(Some(resp))
            }
            "GET" => {
                self.maybe_clean();

                let snapshot = match self.fetch(req) {
                    Some(s) => s,
                    None => return Ok(None),
                };

                let mut resp = match snapshot.storage.fetch_response() {
                    Ok(r) => r,
                    Err(e) => {
                        // 破損アイテムは取り除いてミス扱いにする
                        warn!(
                            "CACHE :: FETCH FAILED :: {} - {} :: {}",
                            snapshot.key.key, snapshot.path, e
                        );
                        if let Some((_, mut item)) = self.items.remove(&snapshot.key) {
                            item.clear();
                        }
                        return Ok(None);
                    }
                };

                resp.request = Some(Arc::new(req.clone()));
                resp.headers.set("X-Cache", "HIT");
                resp.headers.set("X-Cache-Count", &snapshot.hits.to_string());
                info!(
                    "CACHE :: FETCH :: {} - {} :: COUNT = {}",
                    snapshot.key.key, snapshot.path, snapshot.hits
                );

                Ok(Some(expand_esi(resp, &snapshot.esi_tags, &self.sub_request)?))
            }
            _ => Ok(None),
        }
    }

    /// 送出レスポンスを処理する
    ///
    /// キャッシュ不可ならレスポンスをそのまま返します。格納できた場合は
    /// 格納済みレスポンスを実体化し、MISSマーカーを付けてESI展開します。
    pub fn on_response(&self, resp: Response) -> CacheResult<Response> {
        if resp.request.is_none() {
            return Ok(resp);
        }

        let snapshot = match self.store(&resp)? {
            Some(s) => s,
            None => return Ok(resp),
        };

        let mut stored = snapshot.storage.fetch_response()?;
        stored.request = resp.request;
        stored.headers.set("X-Cache", "MISS");
        stored.headers.set("X-Cache-Count", "0");

        expand_esi(stored, &snapshot.esi_tags, &self.sub_request)
    }

    /// 一致するアイテムを全て削除する
    ///
    /// 一致が見つかるたびに走査を最初からやり直し、一致が無くなるまで
    /// 繰り返します。
    pub fn invalidate(&self, req: &Request) {
        let targets = extract_targets(req, &self.config);
        if targets.is_empty() {
            return;
        }
        loop {
            let matched = self
                .items
                .iter()
                .find(|entry| item_matches(entry.value(), &targets))
                .map(|entry| entry.key().clone());
            match matched {
                Some(key) => {
                    if let Some((_, mut item)) = self.items.remove(&key) {
                        item.log_action("invalidate", "REASON = header match");
                        item.clear();
                    }
                }
                None => break,
            }
        }
    }

    /// インターバルが経過していればクリーンを実行する
    pub fn maybe_clean(&self) {
        let mut last_clean = self.last_clean.lock().unwrap();
        if last_clean.elapsed() < Duration::from_secs(self.config.clean_interval) {
            return;
        }
        self.clean_locked();
        *last_clean = Instant::now();
    }

    /// インターバルに関係なくクリーンを実行する
    pub fn clean_now(&self) {
        let mut last_clean = self.last_clean.lock().unwrap();
        self.clean_locked();
        *last_clean = Instant::now();
    }

    /// クリーンパス本体
    ///
    /// 1. 期限切れアイテムの除去
    /// 2. 種別×ストレージの各バケットのサイズ制限の強制。超過中は
    ///    全アイテム中で最終ヒットが最古のものを選び、次のストレージが
    ///    あればそちらへ移動した上でインデックスから除去する。
    ///    移動済みのバイト列はディスクに残る。最終ストレージでの除去は
    ///    バイト列ごと削除する。
    fn clean_locked(&self) {
        info!("CACHE :: CLEAN");

        // 期限切れ掃引
        self.items.retain(|_, item| {
            if item.has_expired() {
                item.log_action("invalidate", "REASON = max age expired");
                item.clear();
                false
            } else {
                true
            }
        });

        // バケットごとのサイズ制限
        let handlers = self.config.cache_storage_handlers.clone();
        for class in [ItemClass::Public, ItemClass::Private] {
            for (backend_index, backend) in handlers.iter().enumerate() {
                let mut bucket_size: u64 = self
                    .items
                    .iter()
                    .filter(|entry| {
                        entry.class == class && entry.storage.type_name() == backend.as_str()
                    })
                    .map(|entry| entry.size)
                    .sum();
                let max_size = self.config.max_size(class.as_str(), backend);

                while bucket_size > max_size {
                    // 全アイテム中で最終ヒットが最古のものを選ぶ
                    let oldest = self
                        .items
                        .iter()
                        .min_by_key(|entry| entry.value().last_hit)
                        .map(|entry| (entry.key().clone(), entry.value().size));
                    let Some((key, prior_size)) = oldest else {
                        break;
                    };

                    let is_last_tier = backend_index + 1 >= handlers.len();
                    if !is_last_tier {
                        if let Some(mut entry) = self.items.get_mut(&key) {
                            let next = &handlers[backend_index + 1];
                            if let Err(e) = entry.move_storage(next, &self.config) {
                                warn!("CACHE :: MOVE FAILED :: {} :: {}", key.key, e);
                            }
                        }
                    }

                    if let Some((_, mut item)) = self.items.remove(&key) {
                        if is_last_tier {
                            item.clear();
                        }
                        item.log_action("invalidate", "REASON = cache size limit");
                    }

                    bucket_size = bucket_size.saturating_sub(prior_size);
                }
            }
        }
    }

    /// 全アイテムとキャッシュディレクトリを破棄して作り直す
    pub fn clear(&self) -> CacheResult<()> {
        let path = &self.config.cache_file_path;
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        fs::create_dir_all(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o770))?;
        }
        self.items.clear();
        *self.last_clean.lock().unwrap() = Instant::now();
        Ok(())
    }

    /// 統計情報を取得
    pub fn stats(&self) -> CacheStats {
        let mut memory_usage = 0;
        let mut file_usage = 0;
        for entry in self.items.iter() {
            match &entry.storage {
                Storage::Memory { .. } => memory_usage += entry.size,
                Storage::File { .. } => file_usage += entry.size,
            }
        }
        CacheStats {
            entries: self.items.len(),
            memory_usage,
            file_usage,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
