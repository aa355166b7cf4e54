//! # kasumi
//!
//! HTTPリバースプロキシ向けキャッシュ拡張。
//!
//! ホストプロキシを流れるリクエスト/レスポンスに割り込み、キャッシュ
//! 可能なGETレスポンスを階層化ストレージ（メモリ/ファイル）から提供
//! します。管理用のBAN/PURGEリクエストによるヘッダーベース無効化と、
//! `<esi:include>` タグのサブリクエスト展開（ESI合成）をサポートします。
//!
//! トランスポート、設定の読み込み元、サブリクエストの実送信はホスト側の
//! 責務です。拡張は [`adapter::Extension`] 経由でライフサイクルイベントを
//! 受け取ります。

pub mod adapter;
pub mod cache;
pub mod error;
pub mod http;
pub mod util;

pub use adapter::{extension, init_extension, Extension, EXTENSION_NAME};
pub use cache::{CacheConfig, CacheHandler, CacheStats, SubRequestFn};
pub use error::{CacheError, CacheResult};
pub use http::{CancelToken, Headers, Request, Response};
