//! # プロキシキャッシュモジュール
//!
//! ホストプロキシを流れるGETレスポンスを階層化ストレージにキャッシュし、
//! BAN/PURGEによる無効化とESI合成を提供します。
//!
//! ## 特徴
//!
//! - **二重キー**: パブリック/プライベートのMD5フィンガープリント
//! - **階層化ストレージ**: メモリ → ファイルの降格付きサイズ制限
//! - **ヘッダーベース無効化**: ワイルドカード/正規表現によるBAN/PURGE
//! - **ESI合成**: 格納時に解析、ヒットごとにサブリクエストで展開
//!
//! ## アーキテクチャ
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  CacheHandler                           │
//! │  ├─ DashMap<ItemKey, Item>              │← アイテムインデックス
//! │  │    └─ Storage (memory / file)        │← gzip済みレスポンス
//! │  ├─ Invalidator (BAN/PURGE)             │
//! │  └─ ESI parse / expand                  │
//! └─────────────────────────────────────────┘
//! ```

mod config;
mod esi;
mod handler;
mod invalidate;
mod item;
mod key;
mod policy;
mod storage;

pub use config::CacheConfig;
pub use esi::{expand_esi, parse_esi, EsiTag};
pub use handler::{CacheHandler, CacheStats, ItemKey, ItemSnapshot, SubRequestFn};
pub use item::{Item, ItemClass};
pub use key::{private_key, public_key};
pub use policy::CacheControl;
pub use storage::{Storage, FILE_EXTENSION, STORAGE_FILE, STORAGE_MEMORY};
