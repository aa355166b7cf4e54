//! BAN/PURGEマッチャー
//!
//! 管理リクエストのヘッダーとキャッシュアイテムのスナップショットを
//! 照合します。

use std::collections::HashMap;

use regex::Regex;

use crate::http::Request;
use crate::util::wildcard_compare;

use super::config::CacheConfig;
use super::item::Item;

/// BAN/PURGEリクエストから対象ヘッダー値を抽出する
///
/// 設定された各ヘッダー名についてリクエストの値を読み取ります。
/// `Xkey` はリクエストに無ければ `Key` ヘッダーへフォールバック。
/// 空の値は対象に含めません。
pub fn extract_targets(req: &Request, config: &CacheConfig) -> HashMap<String, String> {
    let mut targets = HashMap::new();
    for header_name in &config.invalidate_headers {
        let mut value = req.headers.get(header_name).unwrap_or("");
        if header_name == "Xkey" && value.is_empty() {
            value = req.headers.get("Key").unwrap_or("");
        }
        if !value.is_empty() {
            targets.insert(header_name.clone(), value.to_string());
        }
    }
    targets
}

/// アイテムが対象ヘッダー全てに一致するか判定する
///
/// 対象が空なら何にも一致しません。対象の各ヘッダーについて、アイテムの
/// スナップショット値の少なくとも1つが一致する必要があります。
pub fn item_matches(item: &Item, targets: &HashMap<String, String>) -> bool {
    if targets.is_empty() {
        return false;
    }
    targets.iter().all(|(header_name, request_value)| {
        item.invalidate_headers
            .get(header_name)
            .is_some_and(|cached_values| {
                cached_values
                    .iter()
                    .any(|cached| value_matches(header_name, request_value, cached))
            })
    })
}

/// 単一ヘッダー値の一致判定
///
/// `Xkey` は部分文字列一致、それ以外はワイルドカード比較または
/// リクエスト値を正規表現としてコンパイルした照合。正規表現の
/// コンパイル失敗は不一致として扱います。
fn value_matches(header_name: &str, request_value: &str, cached_value: &str) -> bool {
    if header_name == "Xkey" {
        return cached_value.contains(request_value);
    }
    if wildcard_compare(cached_value, request_value) {
        return true;
    }
    match Regex::new(request_value) {
        Ok(regex) => regex.is_match(cached_value),
        Err(_) => false,
    }
}
