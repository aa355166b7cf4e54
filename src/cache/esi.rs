//! ESIエンジン
//!
//! `<esi:include src="…">` タグの解析と展開を行います。
//!
//! 解析はアイテム作成時に一度だけ実行され、タグを取り除いた縮約ボディと
//! タグ位置のリストを生成します。展開はヒットのたびに実行され、ホストの
//! サブリクエストコールバック経由で取得した子レスポンスのボディを
//! 記録済み位置に挿入します。解析と展開を分離することで、サブリクエスト
//! 自体も独立してキャッシュ可能になります。
//!
//! 子レスポンス内のタグは展開しません（再帰なし）。

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::error::{CacheError, CacheResult};
use crate::http::{response_from_bytes, response_to_bytes, Request, Response};

use super::handler::SubRequestFn;

/// ESIタグの正規表現（非貪欲）
static ESI_TAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<esi:include.*?src="(.*?)".*?>"#).unwrap());

/// 解析済みESIタグ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsiTag {
    /// サブリクエスト先のURL（絶対パスとして扱う）
    pub url: String,
    /// 縮約ボディ内でのバイトオフセット
    pub position: usize,
}

/// レスポンスボディからESIタグを解析する
///
/// タグを取り除いた縮約ボディと、縮約ボディ基準のオフセットを持つ
/// タグリストを返します。`src` が空のタグはスロットを作らず、
/// ボディにもそのまま残します。
pub fn parse_esi(body: &[u8]) -> (Vec<u8>, Vec<EsiTag>) {
    let mut reduced = Vec::with_capacity(body.len());
    let mut tags = Vec::new();
    let mut copied_until = 0;
    let mut removed = 0;

    for caps in ESI_TAG_REGEX.captures_iter(body) {
        let whole = caps.get(0).expect("group 0 always present");
        let src = caps.get(1).map(|m| m.as_bytes()).unwrap_or(b"");
        if src.is_empty() {
            continue;
        }
        reduced.extend_from_slice(&body[copied_until..whole.start()]);
        tags.push(EsiTag {
            url: String::from_utf8_lossy(src).into_owned(),
            position: whole.start() - removed,
        });
        removed += whole.len();
        copied_until = whole.end();
    }
    reduced.extend_from_slice(&body[copied_until..]);

    (reduced, tags)
}

/// 記録済みタグをサブレスポンスのボディで展開する
///
/// タグごとに親リクエストからスキームとホスト、ヘッダー、キャンセル
/// スコープを引き継いだ子GETリクエストを合成し、ホストのコールバックで
/// サブレスポンスを取得します。`None` のサブレスポンスはスキップ。
/// 挿入は解析順で、挿入位置はそれまでに挿入したボディ長だけ後ろに
/// ずれます。最終バイト列は再パースして新しいレスポンスとして返します。
pub fn expand_esi(
    mut resp: Response,
    tags: &[EsiTag],
    sub_request: &SubRequestFn,
) -> CacheResult<Response> {
    if tags.is_empty() {
        return Ok(resp);
    }

    let parent = resp
        .request
        .clone()
        .ok_or_else(|| CacheError::sub_request("response has no originating request"))?;

    let mut body = std::mem::take(&mut resp.body);
    let mut shift = 0;

    for tag in tags {
        if parent.is_cancelled() {
            return Err(CacheError::sub_request("parent request cancelled"));
        }
        let child = child_request(&parent, &tag.url);
        let sub_resp = match sub_request(&child)? {
            Some(r) => r,
            None => continue,
        };
        let insert_at = (tag.position + shift).min(body.len());
        shift += sub_resp.body.len();
        body.splice(insert_at..insert_at, sub_resp.body);
    }

    resp.body = body;

    // 最終バイト列から新しいレスポンスを組み立て直す
    let raw = response_to_bytes(&resp);
    let mut fresh = response_from_bytes(&raw)?;
    fresh.request = resp.request;
    Ok(fresh)
}

/// ESIタグから子リクエストを合成する
///
/// キャンセルトークンは親と共有され、親のキャンセルは発行済みの
/// 子リクエストにも伝播します。
fn child_request(parent: &Arc<Request>, src: &str) -> Request {
    let mut child = Request::new_with_cancel(
        "GET",
        &parent.scheme,
        &parent.host,
        src,
        parent.cancel_token(),
    );
    child.headers = parent.headers.clone();
    child.remote_addr = parent.remote_addr.clone();
    child
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn stub_callback(
        bodies: Vec<Option<&'static [u8]>>,
    ) -> (SubRequestFn, Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
        let paths = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let paths_clone = Arc::clone(&paths);
        let count_clone = Arc::clone(&count);
        let callback: SubRequestFn = Arc::new(move |req: &Request| {
            let index = count_clone.fetch_add(1, Ordering::SeqCst);
            paths_clone.lock().unwrap().push(req.path.clone());
            Ok(bodies.get(index).copied().flatten().map(|body| {
                let mut resp = Response::new(200);
                resp.body = body.to_vec();
                resp
            }))
        });
        (callback, paths, count)
    }

    fn response_with_tags(body: &[u8], tags: &[EsiTag]) -> (Response, Vec<EsiTag>) {
        let mut resp = Response::new(200);
        resp.headers.add("Content-Type", "text/html");
        resp.body = body.to_vec();
        resp.request = Some(Arc::new(Request::new("GET", "http", "example.com", "/c")));
        (resp, tags.to_vec())
    }

    #[test]
    fn test_parse_single_tag() {
        let body = br#"A<esi:include src="/f"/>B"#;
        let (reduced, tags) = parse_esi(body);

        assert_eq!(reduced, b"AB");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].url, "/f");
        assert_eq!(tags[0].position, 1);
    }

    #[test]
    fn test_parse_multiple_tags_offsets() {
        let body = br#"xx<esi:include src="/a"/>yy<esi:include src="/b"/>zz"#;
        let (reduced, tags) = parse_esi(body);

        assert_eq!(reduced, b"xxyyzz");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0], EsiTag { url: "/a".to_string(), position: 2 });
        // 2つ目のオフセットは1つ目のタグ除去分だけ前にずれる
        assert_eq!(tags[1], EsiTag { url: "/b".to_string(), position: 4 });
    }

    #[test]
    fn test_parse_empty_src_left_in_place() {
        let body = br#"A<esi:include src=""/>B"#;
        let (reduced, tags) = parse_esi(body);

        assert!(tags.is_empty());
        assert_eq!(reduced, body);
    }

    #[test]
    fn test_parse_no_tags() {
        let (reduced, tags) = parse_esi(b"plain body");
        assert_eq!(reduced, b"plain body");
        assert!(tags.is_empty());
    }

    #[test]
    fn test_parse_non_greedy() {
        // 同一行に複数タグがあっても1つずつマッチする
        let body = br#"<esi:include src="/a"/><esi:include src="/b"/>"#;
        let (reduced, tags) = parse_esi(body);

        assert!(reduced.is_empty());
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].url, "/a");
        assert_eq!(tags[1].url, "/b");
    }

    #[test]
    fn test_expand_single() {
        let (resp, tags) = response_with_tags(b"AB", &[EsiTag { url: "/f".to_string(), position: 1 }]);
        let (callback, paths, _) = stub_callback(vec![Some(b"MID")]);

        let expanded = expand_esi(resp, &tags, &callback).unwrap();

        assert_eq!(expanded.body, b"AMIDB");
        assert_eq!(expanded.headers.get("Content-Length"), Some("5"));
        assert_eq!(paths.lock().unwrap().as_slice(), ["/f"]);
    }

    #[test]
    fn test_expand_in_parse_order_with_shift() {
        let (resp, tags) = response_with_tags(
            b"xxyyzz",
            &[
                EsiTag { url: "/a".to_string(), position: 2 },
                EsiTag { url: "/b".to_string(), position: 4 },
            ],
        );
        let (callback, paths, _) = stub_callback(vec![Some(b"11"), Some(b"222")]);

        let expanded = expand_esi(resp, &tags, &callback).unwrap();

        assert_eq!(expanded.body, b"xx11yy222zz");
        assert_eq!(paths.lock().unwrap().as_slice(), ["/a", "/b"]);
    }

    #[test]
    fn test_expand_none_sub_response_skipped() {
        let (resp, tags) = response_with_tags(
            b"xxyyzz",
            &[
                EsiTag { url: "/a".to_string(), position: 2 },
                EsiTag { url: "/b".to_string(), position: 4 },
            ],
        );
        let (callback, _, count) = stub_callback(vec![None, Some(b"22")]);

        let expanded = expand_esi(resp, &tags, &callback).unwrap();

        assert_eq!(expanded.body, b"xxyy22zz");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_expand_cancelled_parent() {
        let mut resp = Response::new(200);
        resp.body = b"AB".to_vec();
        let req = Request::new("GET", "http", "example.com", "/c");
        req.cancel_token().cancel();
        resp.request = Some(Arc::new(req));

        let (callback, _, count) = stub_callback(vec![Some(b"MID")]);
        let tags = vec![EsiTag { url: "/f".to_string(), position: 1 }];

        let result = expand_esi(resp, &tags, &callback);
        assert!(matches!(result, Err(CacheError::SubRequest(_))));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_child_shares_parent_cancel_scope() {
        let mut resp = Response::new(200);
        resp.body = b"AB".to_vec();
        let req = Request::new("GET", "http", "example.com", "/c");
        let parent_token = req.cancel_token();
        resp.request = Some(Arc::new(req));

        let child_tokens = Arc::new(Mutex::new(Vec::new()));
        let child_tokens_clone = Arc::clone(&child_tokens);
        let callback: SubRequestFn = Arc::new(move |child: &Request| {
            child_tokens_clone.lock().unwrap().push(child.cancel_token());
            Ok(None)
        });

        let tags = vec![EsiTag { url: "/f".to_string(), position: 1 }];
        expand_esi(resp, &tags, &callback).unwrap();

        // 子のトークンは親とフラグを共有する
        let child_tokens = child_tokens.lock().unwrap();
        assert_eq!(child_tokens.len(), 1);
        assert!(!child_tokens[0].is_cancelled());
        parent_token.cancel();
        assert!(child_tokens[0].is_cancelled());
    }

    #[test]
    fn test_cancel_mid_expansion_stops_remaining_children() {
        let mut resp = Response::new(200);
        resp.body = b"xxyyzz".to_vec();
        resp.request = Some(Arc::new(Request::new("GET", "http", "example.com", "/c")));

        // 1つ目のサブリクエスト処理中に（共有トークン経由で）キャンセル
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let callback: SubRequestFn = Arc::new(move |child: &Request| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            child.cancel_token().cancel();
            let mut sub = Response::new(200);
            sub.body = b"11".to_vec();
            Ok(Some(sub))
        });

        let tags = vec![
            EsiTag { url: "/a".to_string(), position: 2 },
            EsiTag { url: "/b".to_string(), position: 4 },
        ];

        // 2つ目のタグは発行されずエラーになる
        let result = expand_esi(resp, &tags, &callback);
        assert!(matches!(result, Err(CacheError::SubRequest(_))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expand_child_request_composition() {
        let mut resp = Response::new(200);
        resp.body = b"AB".to_vec();
        let mut req = Request::new("GET", "https", "shop.example.com", "/c");
        req.headers.add("Accept-Language", "ja");
        resp.request = Some(Arc::new(req));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let callback: SubRequestFn = Arc::new(move |child: &Request| {
            seen_clone.lock().unwrap().push((
                child.method.clone(),
                child.scheme.clone(),
                child.host.clone(),
                child.path.clone(),
                child.headers.get("Accept-Language").map(String::from),
            ));
            Ok(None)
        });

        let tags = vec![EsiTag { url: "/fragment".to_string(), position: 1 }];
        expand_esi(resp, &tags, &callback).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (method, scheme, host, path, lang) = &seen[0];
        assert_eq!(method, "GET");
        assert_eq!(scheme, "https");
        assert_eq!(host, "shop.example.com");
        assert_eq!(path, "/fragment");
        assert_eq!(lang.as_deref(), Some("ja"));
    }

    #[test]
    fn test_expand_sub_request_error_surfaces() {
        let (resp, tags) = response_with_tags(b"AB", &[EsiTag { url: "/f".to_string(), position: 1 }]);
        let callback: SubRequestFn =
            Arc::new(|_| Err(CacheError::sub_request("backend unreachable")));

        assert!(expand_esi(resp, &tags, &callback).is_err());
    }
}
