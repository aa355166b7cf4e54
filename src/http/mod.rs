//! # HTTPモデル
//!
//! ホストプロキシとの間で受け渡すリクエスト/レスポンスの所有型を提供します。
//!
//! - **Headers**: 挿入順を保持する大文字小文字非依存のヘッダーマルチマップ
//! - **Request**: メソッド、URL、ヘッダー、リモートアドレス、キャンセルトークン
//! - **Response**: ステータス、ヘッダー、実体化済みボディ、発生元リクエスト
//!
//! ボディはストリームではなく `Vec<u8>` として実体化されます。

mod wire;

pub use wire::{response_from_bytes, response_to_bytes};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use url::form_urlencoded;

/// キャンセルトークン
///
/// 親リクエストとESI子リクエストで共有されるキャンセルフラグ。
/// `clone` はフラグを共有するため、親のキャンセルは子にも伝播します。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// 新しいトークンを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// キャンセルを通知
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// キャンセル済みかどうか
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// HTTPヘッダーのマルチマップ
///
/// 名前の比較は大文字小文字非依存、挿入順を保持します。
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// 空のヘッダーマップを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// 最初の値を取得
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 名前に一致する全ての値を挿入順で取得
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 既存の値を全て置き換える
    pub fn set(&mut self, name: &str, value: &str) {
        self.remove(name);
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// 値を追加（既存は保持）
    pub fn add(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// 名前に一致する値を全て削除
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// 全エントリを挿入順で走査
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// エントリ数
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 空かどうか
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// HTTPリクエスト
#[derive(Debug, Clone)]
pub struct Request {
    /// メソッド（GET、BAN、PURGE など）
    pub method: String,
    /// スキーム（http / https）
    pub scheme: String,
    /// ホスト名
    pub host: String,
    /// URLパス
    pub path: String,
    /// 生のクエリ文字列（`?` は含まない）
    pub query: String,
    /// リクエストヘッダー
    pub headers: Headers,
    /// リモートアドレス（`host:port` 形式）
    pub remote_addr: String,
    /// キャンセルトークン
    cancel: CancelToken,
}

impl Request {
    /// 新しいリクエストを作成
    ///
    /// `target` は `path` または `path?query` 形式。
    pub fn new(method: &str, scheme: &str, host: &str, target: &str) -> Self {
        Self::new_with_cancel(method, scheme, host, target, CancelToken::new())
    }

    /// 既存のキャンセルトークンを共有するリクエストを作成
    ///
    /// ESI子リクエストのように親のキャンセルスコープを引き継ぐ場合に
    /// 使用します。親のキャンセルはこのリクエストにも伝播します。
    pub fn new_with_cancel(
        method: &str,
        scheme: &str,
        host: &str,
        target: &str,
        cancel: CancelToken,
    ) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (target, ""),
        };
        Self {
            method: method.to_string(),
            scheme: scheme.to_string(),
            host: host.to_string(),
            path: path.to_string(),
            query: query.to_string(),
            headers: Headers::new(),
            remote_addr: String::new(),
            cancel,
        }
    }

    /// User-Agentヘッダー値（なければ空文字列）
    pub fn user_agent(&self) -> &str {
        self.headers.get("User-Agent").unwrap_or("")
    }

    /// Cookieヘッダーを解析して（名前, 値）のリストを返す
    ///
    /// 複数のCookieヘッダーを出現順に連結します。
    pub fn cookies(&self) -> Vec<(String, String)> {
        let mut cookies = Vec::new();
        for header_value in self.headers.get_all("Cookie") {
            for pair in header_value.split(';') {
                let pair = pair.trim();
                if pair.is_empty() {
                    continue;
                }
                match pair.split_once('=') {
                    Some((name, value)) => cookies.push((name.to_string(), value.to_string())),
                    None => cookies.push((pair.to_string(), String::new())),
                }
            }
        }
        cookies
    }

    /// 正規化したクエリ文字列
    ///
    /// キーでソートし直した上でパーセントエンコードし直します。
    /// 同一キーの値の順序は保持されます。
    pub fn canonical_query(&self) -> String {
        if self.query.is_empty() {
            return String::new();
        }
        let mut pairs: Vec<(String, String)> = form_urlencoded::parse(self.query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in &pairs {
            serializer.append_pair(k, v);
        }
        serializer.finish()
    }

    /// キャンセルトークンを取得（クローンはフラグを共有）
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// キャンセル済みかどうか
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// HTTPレスポンス
#[derive(Debug, Clone)]
pub struct Response {
    /// ステータスコード
    pub status: u16,
    /// ステータス行の理由句
    pub reason: String,
    /// レスポンスヘッダー
    pub headers: Headers,
    /// 実体化済みボディ
    pub body: Vec<u8>,
    /// 発生元リクエスト
    pub request: Option<Arc<Request>>,
}

impl Response {
    /// 空ボディのレスポンスを作成
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            headers: Headers::new(),
            body: Vec::new(),
            request: None,
        }
    }

    /// Content-Lengthヘッダー値
    ///
    /// 欠落または数値として解釈できない場合は `None`（サイズ不明）。
    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("Content-Length")?.trim().parse().ok()
    }
}

/// ステータスコードに対応する理由句
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");

        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(headers.get("X-Missing"), None);
    }

    #[test]
    fn test_headers_multi_value() {
        let mut headers = Headers::new();
        headers.add("X-Tag", "a");
        headers.add("X-Tag", "b");
        headers.add("Other", "c");

        let values: Vec<&str> = headers.get_all("X-Tag").collect();
        assert_eq!(values, vec!["a", "b"]);

        // getは最初の値を返す
        assert_eq!(headers.get("X-Tag"), Some("a"));
    }

    #[test]
    fn test_headers_set_replaces() {
        let mut headers = Headers::new();
        headers.add("X-Cache", "MISS");
        headers.add("X-Cache", "MISS");
        headers.set("X-Cache", "HIT");

        let values: Vec<&str> = headers.get_all("X-Cache").collect();
        assert_eq!(values, vec!["HIT"]);
    }

    #[test]
    fn test_request_target_split() {
        let req = Request::new("GET", "http", "example.com", "/api/items?page=2");
        assert_eq!(req.path, "/api/items");
        assert_eq!(req.query, "page=2");

        let req = Request::new("GET", "http", "example.com", "/plain");
        assert_eq!(req.path, "/plain");
        assert_eq!(req.query, "");
    }

    #[test]
    fn test_cookies() {
        let mut req = Request::new("GET", "http", "example.com", "/");
        req.headers.add("Cookie", "eZSESSID=abc; other=z");

        let cookies = req.cookies();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0], ("eZSESSID".to_string(), "abc".to_string()));
        assert_eq!(cookies[1], ("other".to_string(), "z".to_string()));
    }

    #[test]
    fn test_canonical_query_sorted() {
        let req = Request::new("GET", "http", "example.com", "/p?b=2&a=1");
        assert_eq!(req.canonical_query(), "a=1&b=2");

        // 同一キーの値順は保持される
        let req = Request::new("GET", "http", "example.com", "/p?k=2&k=1");
        assert_eq!(req.canonical_query(), "k=2&k=1");
    }

    #[test]
    fn test_new_with_cancel_shares_token() {
        let token = CancelToken::new();
        let req = Request::new_with_cancel("GET", "http", "example.com", "/f", token.clone());

        assert!(!req.is_cancelled());
        token.cancel();
        assert!(req.is_cancelled());

        // newは独立したトークンを持つ
        let other = Request::new("GET", "http", "example.com", "/f");
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_cancel_token_shared() {
        let req = Request::new("GET", "http", "example.com", "/");
        let token = req.cancel_token();

        assert!(!req.is_cancelled());
        token.cancel();
        assert!(req.is_cancelled());

        // クローンもキャンセル状態を共有
        let cloned = req.clone();
        assert!(cloned.is_cancelled());
    }

    #[test]
    fn test_content_length() {
        let mut resp = Response::new(200);
        assert_eq!(resp.content_length(), None);

        resp.headers.set("Content-Length", "123");
        assert_eq!(resp.content_length(), Some(123));

        resp.headers.set("Content-Length", "abc");
        assert_eq!(resp.content_length(), None);
    }
}
