//! キャッシュストレージ
//!
//! キャッシュアイテムのバイト列を保持するストレージバリアントを提供します。
//! どちらのバリアントもgzip圧縮したHTTPワイヤフォーマットのレスポンスを
//! 1件保持します。
//!
//! - **Memory**: インメモリバイトバッファ（gzipデフォルトレベル）
//! - **File**: `<cache_file_path>/<key>.ccache` のファイル（gzip best-speed）

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{CacheError, CacheResult};
use crate::http::{response_from_bytes, response_to_bytes, Response};

use super::config::CacheConfig;

/// メモリストレージのハンドラー名
pub const STORAGE_MEMORY: &str = "memory";

/// ファイルストレージのハンドラー名
pub const STORAGE_FILE: &str = "file";

/// キャッシュファイルの拡張子
pub const FILE_EXTENSION: &str = ".ccache";

/// キャッシュストレージ
///
/// クローンは安価です（メモリはArc共有、ファイルはパスのみ）。
#[derive(Debug, Clone)]
pub enum Storage {
    /// インメモリストレージ
    Memory {
        /// gzip圧縮済みのシリアライズ済みレスポンス
        data: Arc<[u8]>,
    },
    /// ファイルストレージ
    File {
        /// キャッシュファイルのパス
        path: PathBuf,
    },
}

impl Storage {
    /// ハンドラー名からストレージを作成し、アイテムのキーに束縛する
    ///
    /// 不明なハンドラー名はエラー。
    pub fn from_name(name: &str, key: &str, config: &CacheConfig) -> CacheResult<Self> {
        match name {
            STORAGE_MEMORY => Ok(Self::Memory {
                data: Arc::from(Vec::new().into_boxed_slice()),
            }),
            STORAGE_FILE => {
                if key.is_empty() {
                    return Err(CacheError::storage_unavailable(
                        "cannot use file storage without cache key",
                    ));
                }
                Ok(Self::File {
                    path: config
                        .cache_file_path
                        .join(format!("{}{}", key, FILE_EXTENSION)),
                })
            }
            other => Err(CacheError::storage_unavailable(format!(
                "unknown storage handler '{}'",
                other
            ))),
        }
    }

    /// ストレージハンドラー名を取得
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Memory { .. } => STORAGE_MEMORY,
            Self::File { .. } => STORAGE_FILE,
        }
    }

    /// レスポンスをシリアライズ・gzip圧縮して永続化
    pub fn store_response(&mut self, resp: &Response) -> CacheResult<()> {
        let raw = response_to_bytes(resp);
        match self {
            Self::Memory { data } => {
                let mut encoder = GzEncoder::new(
                    Vec::with_capacity(raw.len() / 2),
                    Compression::default(),
                );
                encoder.write_all(&raw)?;
                let compressed = encoder.finish()?;
                *data = Arc::from(compressed.into_boxed_slice());
                Ok(())
            }
            Self::File { path } => {
                let file = fs::File::create(path)?;
                let mut encoder = GzEncoder::new(file, Compression::fast());
                encoder.write_all(&raw)?;
                encoder.finish()?;
                Ok(())
            }
        }
    }

    /// 永続化済みバイト列からレスポンスを再構築
    ///
    /// 呼び出しごとに独立した所有レスポンスを返します。
    pub fn fetch_response(&self) -> CacheResult<Response> {
        let raw = match self {
            Self::Memory { data } => {
                let mut decoder = GzDecoder::new(&data[..]);
                let mut buf = Vec::new();
                decoder.read_to_end(&mut buf)?;
                buf
            }
            Self::File { path } => {
                let file = fs::File::open(path)?;
                let mut decoder = GzDecoder::new(file);
                let mut buf = Vec::new();
                decoder.read_to_end(&mut buf)?;
                buf
            }
        };
        response_from_bytes(&raw)
    }

    /// 格納済みバイト数を取得
    pub fn size(&self) -> CacheResult<u64> {
        match self {
            Self::Memory { data } => Ok(data.len() as u64),
            Self::File { path } => Ok(fs::metadata(path)?.len()),
        }
    }

    /// 格納済みバイト列を削除
    ///
    /// ファイルが既に存在しない場合は成功として扱います。
    pub fn delete(&mut self) -> CacheResult<()> {
        match self {
            Self::Memory { data } => {
                *data = Arc::from(Vec::new().into_boxed_slice());
                Ok(())
            }
            Self::File { path } => match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }
}
