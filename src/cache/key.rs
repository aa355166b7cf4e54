//! キャッシュキー
//!
//! リクエストからパブリック/プライベートのフィンガープリントを導出します。
//! キーはMD5ダイジェストの16進表現（32文字）で、設定が同じ限り
//! プロセス再起動をまたいで安定です。

use std::fmt::Write;

use md5::{Digest, Md5};

use crate::http::Request;

use super::config::CacheConfig;

/// パブリックキーを生成
///
/// ダイジェスト対象: メソッド、URLパス、正規化クエリ文字列、
/// vary_headersパターンに一致するヘッダー（名前と全ての値を順番通り）。
pub fn public_key(req: &Request, config: &CacheConfig) -> String {
    let mut hasher = Md5::new();
    hasher.update(req.method.as_bytes());
    hasher.update(req.path.as_bytes());
    hasher.update(req.canonical_query().as_bytes());

    // ヘッダー名ごとに一度だけ、出現順で処理する
    let mut seen: Vec<&str> = Vec::new();
    for (name, _) in req.headers.iter() {
        if seen.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            continue;
        }
        seen.push(name);
        if !config.matches_vary_header(name) {
            continue;
        }
        hasher.update(name.as_bytes());
        for value in req.headers.get_all(name) {
            hasher.update(value.as_bytes());
        }
    }

    hex_digest(&hasher.finalize())
}

/// プライベートキーを生成
///
/// ダイジェスト対象: パブリックキー、リモートアドレス、User-Agent、
/// vary_cookiesパターンに一致するCookie（名前と値）。
pub fn private_key(req: &Request, config: &CacheConfig) -> String {
    let mut hasher = Md5::new();
    hasher.update(public_key(req, config).as_bytes());
    hasher.update(req.remote_addr.as_bytes());
    hasher.update(req.user_agent().as_bytes());

    for (name, value) in req.cookies() {
        if !config.matches_vary_cookie(&name) {
            continue;
        }
        hasher.update(name.as_bytes());
        hasher.update(value.as_bytes());
    }

    hex_digest(&hasher.finalize())
}

/// ダイジェストを16進文字列に変換
fn hex_digest(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
