//! ホストアダプター
//!
//! ホストプロキシのライフサイクルイベントをキャッシュ操作へ変換します。
//! ホストはロード時にサブリクエストコールバックと任意のJSON設定を渡し、
//! 以降はリクエスト/レスポンスごとに `on_request` / `on_response` を
//! 呼び出します。

use std::sync::OnceLock;

use ftlog::info;

use crate::cache::{CacheConfig, CacheHandler, SubRequestFn};
use crate::error::{CacheError, CacheResult};
use crate::http::{Request, Response};

/// 拡張の名前
pub const EXTENSION_NAME: &str = "kasumi";

/// 拡張本体
///
/// ロガーはここで初期化を試み、ホスト側で既に初期化済みであれば
/// そのまま相乗りします。
pub struct Extension {
    handler: CacheHandler,
    _log_guard: Option<ftlog::LoggerGuard>,
}

impl Extension {
    /// 拡張をロードする
    ///
    /// `raw_config` が渡されればJSONとしてパースし、無ければ
    /// デフォルト設定を使用します。
    pub fn load(sub_request: SubRequestFn, raw_config: Option<&[u8]>) -> CacheResult<Self> {
        let log_guard = ftlog::Builder::new().try_init().ok();

        let config = match raw_config {
            Some(raw) if !raw.is_empty() => serde_json::from_slice(raw)
                .map_err(|e| CacheError::parse(format!("invalid config: {}", e)))?,
            _ => CacheConfig::default(),
        };

        info!(
            "CACHE :: Init {} v{}",
            EXTENSION_NAME,
            env!("CARGO_PKG_VERSION")
        );

        Ok(Self {
            handler: CacheHandler::new(config, sub_request)?,
            _log_guard: log_guard,
        })
    }

    /// 受信リクエストイベント
    ///
    /// `Ok(None)` は「オリジンへパススルー」。
    pub fn on_request(&self, req: &mut Request) -> CacheResult<Option<Response>> {
        self.handler.on_request(req)
    }

    /// 送出レスポンスイベント
    pub fn on_response(&self, resp: Response) -> CacheResult<Response> {
        self.handler.on_response(resp)
    }

    /// 拡張をアンロードする
    ///
    /// 全アイテムとストレージを破棄します。
    pub fn unload(&self) {
        let _ = self.handler.clear();
    }

    /// キャッシュハンドラーへの参照を取得
    pub fn handler(&self) -> &CacheHandler {
        &self.handler
    }
}

/// プロセス全体で共有する拡張インスタンス
///
/// 拡張を一度だけロードするホスト向けのスロット。
static EXTENSION: OnceLock<Extension> = OnceLock::new();

/// グローバルな拡張インスタンスを初期化する
pub fn init_extension(sub_request: SubRequestFn, raw_config: Option<&[u8]>) -> CacheResult<()> {
    let extension = Extension::load(sub_request, raw_config)?;
    EXTENSION.set(extension).ok();
    Ok(())
}

/// グローバルな拡張インスタンスを取得する
pub fn extension() -> Option<&'static Extension> {
    EXTENSION.get()
}
