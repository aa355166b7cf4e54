//! ユーティリティ

use regex::Regex;

/// ワイルドカード比較
///
/// パターン中の `*` を任意の部分文字列として `original` と比較します。
/// パターンは正規表現にエスケープした上で `\*` を `.*` に置換し、
/// 末尾のみ `$` でアンカーしてマッチングします。
/// コンパイルに失敗した場合は不一致として扱います。
pub fn wildcard_compare(original: &str, pattern: &str) -> bool {
    let escaped = regex::escape(pattern).replace("\\*", ".*");
    match Regex::new(&format!("{}$", escaped)) {
        Ok(regex) => regex.is_match(original),
        Err(_) => false,
    }
}
