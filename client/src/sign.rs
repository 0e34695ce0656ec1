//! 请求签名模块职责：
//! 1. 将六个签名字段用 `\n` 连接为规范化字符串。
//! 2. 用共享密钥计算 HMAC-SHA256，输出标准 base64。
//! 3. 规范化规则即线上契约，服务端按同样规则重建后验签。

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// 组装签名规范化字符串：方法大写，六字段换行连接。
pub(crate) fn canonical_string(
    method: &str,
    canonical_path: &str,
    body: &str,
    device_id: &str,
    timestamp: u64,
    nonce: &str,
) -> String {
    format!(
        "{}\n{canonical_path}\n{body}\n{device_id}\n{timestamp}\n{nonce}",
        method.to_uppercase()
    )
}

/// 计算请求签名：HMAC-SHA256(secret, canonical) 的标准 base64。
pub fn sign(
    secret: &str,
    method: &str,
    canonical_path: &str,
    body: &str,
    device_id: &str,
    timestamp: u64,
    nonce: &str,
) -> Result<String, ApiError> {
    let canonical = canonical_string(method, canonical_path, body, device_id, timestamp, nonce);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ApiError::Config("invalid signing key".to_string()))?;
    mac.update(canonical.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}
