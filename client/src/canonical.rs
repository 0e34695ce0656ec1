//! 规范化模块职责：
//! 1. 从完整 URL 提取 path + query（丢弃 scheme/host/fragment）。
//! 2. 将 query 参数按键名字典序稳定排序并重新序列化。
//! 3. 统一请求体的规范化文本，保证签名字节与发送字节一致。

use url::{Url, form_urlencoded};

/// 请求体载荷。
#[derive(Debug, Clone)]
pub enum Payload {
    /// 无请求体。
    Empty,
    /// 已是字符串的请求体，原样透传。
    Raw(String),
    /// JSON 请求体；发送前固化为规范化文本。
    Json(serde_json::Value),
}

/// 提取 path + query 并完成排序规范化。
pub fn canonical_path(full_url: &str) -> String {
    normalize_path_with_query(&extract_path_with_query(full_url))
}

/// 从完整 URL 提取 path + query；解析失败时退回手工扫描。
pub(crate) fn extract_path_with_query(full_url: &str) -> String {
    if let Ok(url) = Url::parse(full_url) {
        let mut out = url.path().to_string();
        if let Some(query) = url.query() {
            out.push('?');
            out.push_str(query);
        }
        return out;
    }

    // 手工扫描：跳过 scheme 与 host，截掉 fragment。
    let start = match full_url.find("://") {
        Some(scheme_index) => full_url[scheme_index + 3..]
            .find('/')
            .map(|offset| scheme_index + 3 + offset),
        None => Some(0),
    };
    let path_with_query = match start {
        Some(index) => full_url[index..].to_string(),
        None => {
            if full_url.starts_with('/') {
                full_url.to_string()
            } else {
                format!("/{full_url}")
            }
        }
    };
    match path_with_query.find('#') {
        Some(hash_index) => path_with_query[..hash_index].to_string(),
        None => path_with_query,
    }
}

/// 规范化 path + query：补齐前导 `/`，query 按键名稳定排序后重编码。
///
/// 重复键保持各值的相对顺序，但按键聚合；规范化是幂等的。
pub(crate) fn normalize_path_with_query(path_with_query: &str) -> String {
    let (pathname, query) = match path_with_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_with_query, None),
    };
    let normalized_pathname = if pathname.starts_with('/') {
        pathname.to_string()
    } else {
        format!("/{pathname}")
    };

    let Some(query) = query.filter(|value| !value.is_empty()) else {
        return normalized_pathname;
    };

    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    // 稳定排序：同键各值保持加入顺序。
    pairs.sort_by(|left, right| left.0.cmp(&right.0));

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, value);
    }
    let normalized_query = serializer.finish();

    if normalized_query.is_empty() {
        normalized_pathname
    } else {
        format!("{normalized_pathname}?{normalized_query}")
    }
}

/// 请求体规范化文本：无体为空串，字符串透传，JSON 固化为紧凑文本。
pub(crate) fn canonical_body(payload: &Payload) -> String {
    match payload {
        Payload::Empty => String::new(),
        Payload::Raw(raw) => raw.clone(),
        // serde_json::Value 序列化不会失败。
        Payload::Json(value) => serde_json::to_string(value).unwrap_or_default(),
    }
}
