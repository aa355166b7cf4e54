//! HTTP/1.1ワイヤフォーマット変換
//!
//! レスポンスをストレージに永続化するためのバイト列化と、
//! 永続化済みバイト列からの再パースを提供します。

use crate::error::{CacheError, CacheResult};

use super::{reason_phrase, Headers, Response};

/// パース時に受け付ける最大ヘッダー数
const MAX_HEADERS: usize = 64;

/// レスポンスをHTTP/1.1ワイヤフォーマットのバイト列に変換
///
/// Content-Lengthは実際のボディ長から書き直されます。
pub fn response_to_bytes(resp: &Response) -> Vec<u8> {
    let mut out = Vec::with_capacity(resp.body.len() + 256);
    let reason = if resp.reason.is_empty() {
        reason_phrase(resp.status)
    } else {
        &resp.reason
    };
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", resp.status, reason).as_bytes());
    for (name, value) in resp.headers.iter() {
        if name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n", resp.body.len()).as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&resp.body);
    out
}

/// ワイヤフォーマットのバイト列からレスポンスを再構築
pub fn response_from_bytes(bytes: &[u8]) -> CacheResult<Response> {
    let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut header_buf);

    let header_len = match parsed.parse(bytes) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            return Err(CacheError::parse("incomplete http response"));
        }
        Err(e) => return Err(CacheError::parse(format!("invalid http response: {}", e))),
    };

    let status = parsed
        .code
        .ok_or_else(|| CacheError::parse("missing status code"))?;
    let reason = parsed.reason.unwrap_or("").to_string();

    let mut headers = Headers::new();
    for header in parsed.headers.iter() {
        let value = std::str::from_utf8(header.value)
            .map_err(|_| CacheError::parse("non-utf8 header value"))?;
        headers.add(header.name, value);
    }

    Ok(Response {
        status,
        reason,
        headers,
        body: bytes[header_len..].to_vec(),
        request: None,
    })
}
