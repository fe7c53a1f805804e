//! 富友接口的报文编码：自由文本字段和整个返回报文都是 GBK，
//! 请求体是两次 URL 编码后的 XML，返回体需要 URL 解码一次。

use encoding_rs::GBK;
use percent_encoding::percent_decode;

use crate::error::{FuiouError, Result};

const LEGACY_ENCODING_NAMES: [&str; 3] = ["gbk", "GBK", "GB2312"];

/// UTF-8 -> GBK，遇到 GBK 无法表示的字符时报错
pub fn to_legacy(text: &str) -> Result<Vec<u8>> {
    let (bytes, _, had_errors) = GBK.encode(text);
    if had_errors {
        return Err(FuiouError::Encoding(format!(
            "text cannot be represented in GBK: {:?}",
            text
        )));
    }
    Ok(bytes.into_owned())
}

/// GBK -> UTF-8
pub fn from_legacy(bytes: &[u8]) -> Result<String> {
    GBK.decode_without_bom_handling_and_without_replacement(bytes)
        .map(|s| s.into_owned())
        .ok_or_else(|| FuiouError::Encoding("malformed GBK byte sequence".to_string()))
}

/// 字节转码之后，把 XML 声明里的 encoding 改成 UTF-8
pub fn normalize_xml_declaration(text: &str) -> String {
    let head = text.trim_start_matches('\u{feff}');
    let offset = text.len() - head.len() + (head.len() - head.trim_start().len());
    if !text[offset..].starts_with("<?xml") {
        return text.to_string();
    }
    let end = match text[offset..].find("?>") {
        Some(i) => offset + i,
        None => return text.to_string(),
    };
    let prolog = &text[offset..end];
    for name in LEGACY_ENCODING_NAMES {
        for quote in ['"', '\''] {
            let attr = format!("encoding={quote}{name}{quote}");
            if let Some(pos) = prolog.find(&attr) {
                let at = offset + pos;
                let mut out = String::with_capacity(text.len());
                out.push_str(&text[..at]);
                out.push_str(&format!("encoding={quote}UTF-8{quote}"));
                out.push_str(&text[at + attr.len()..]);
                return out;
            }
        }
    }
    text.to_string()
}

/// application/x-www-form-urlencoded 编码，空格编码成 `+`
pub fn url_encode(bytes: &[u8]) -> String {
    url::form_urlencoded::byte_serialize(bytes).collect()
}

/// URL 解码一次，`+` 视为空格，结果保持原始字节
pub fn url_decode(bytes: &[u8]) -> Vec<u8> {
    let plus_as_space: Vec<u8> = bytes
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    percent_decode(&plus_as_space).collect()
}
