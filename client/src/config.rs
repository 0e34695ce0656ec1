//! 配置模块职责：
//! 1. 读取签名客户端所需的环境变量并提供默认值。
//! 2. 在构造期完成共享密钥与 base URL 的强校验（缺失即失败，不等到首个请求）。
//! 3. 提供超时、重试等固定策略参数的统一出口。

use std::time::Duration;

use url::Url;

use crate::error::ApiError;

/// 后端 base URL 环境变量。
const BASE_URL_ENV: &str = "BACKEND_BASE_URL";
/// 请求签名共享密钥环境变量（必填）。
const SHARED_SECRET_ENV: &str = "API_SHARED_SECRET";
/// 可选应用标识环境变量。
const APP_ID_ENV: &str = "APP_ID";
/// 可选部署保护 bypass 令牌环境变量。
const BYPASS_TOKEN_ENV: &str = "DEPLOY_BYPASS_TOKEN";

/// 默认后端地址（开发态本机）。
const DEFAULT_BASE_URL: &str = "http://localhost:3000";
/// 单次网络尝试超时（毫秒）。
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// 无响应失败的最大重试次数。
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// 重试固定间隔（毫秒）。
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
/// nonce 随机字节数。
const DEFAULT_NONCE_BYTE_LEN: usize = 16;

/// 签名客户端运行时配置。
#[derive(Debug, Clone)]
pub struct Config {
    /// 后端 base URL（含 scheme 与 host）。
    pub base_url: Url,
    /// 请求签名共享密钥。
    pub shared_secret: String,
    /// 可选应用标识，写入 `X-App-Id`。
    pub app_id: Option<String>,
    /// 可选部署保护 bypass 令牌。
    pub bypass_token: Option<String>,
    /// 单次网络尝试超时。
    pub timeout: Duration,
    /// 无响应失败的重试预算。
    pub retry_attempts: u32,
    /// 重试固定间隔。
    pub retry_delay: Duration,
    /// nonce 随机字节数。
    pub nonce_byte_len: usize,
}

impl Config {
    /// 从环境变量构建配置；密钥缺失或 base URL 非法即返回配置错误。
    pub fn from_env() -> Result<Self, ApiError> {
        let shared_secret = trimmed_env(SHARED_SECRET_ENV).ok_or_else(|| {
            ApiError::Config(format!("missing {SHARED_SECRET_ENV} for request signing"))
        })?;

        let raw_base = trimmed_env(BASE_URL_ENV).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut config = Self::with_base_url(&raw_base, shared_secret)?;
        config.app_id = trimmed_env(APP_ID_ENV);
        config.bypass_token = trimmed_env(BYPASS_TOKEN_ENV);
        Ok(config)
    }

    /// 使用显式 base URL 构建配置，不读取任何环境变量；
    /// 可选头部默认关闭，由调用方按需赋值。
    pub fn with_base_url(raw_base: &str, shared_secret: String) -> Result<Self, ApiError> {
        if shared_secret.is_empty() {
            return Err(ApiError::Config(
                "shared signing secret must not be empty".to_string(),
            ));
        }
        let base_url = Url::parse(raw_base)
            .map_err(|err| ApiError::Config(format!("invalid base url {raw_base}: {err}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ApiError::Config(format!(
                "unsupported base url scheme: {}",
                base_url.scheme()
            )));
        }

        Ok(Self {
            base_url,
            shared_secret,
            app_id: None,
            bypass_token: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            nonce_byte_len: DEFAULT_NONCE_BYTE_LEN,
        })
    }
}

/// 读取环境变量并去掉首尾空白；空字符串视为未设置。
fn trimmed_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::error::ApiError;

    #[test]
    fn explicit_base_url_and_secret_build_config() {
        let cfg = Config::with_base_url("https://api.example.com", "secret".to_string())
            .expect("config should build");
        assert_eq!(cfg.base_url.as_str(), "https://api.example.com/");
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.timeout.as_millis(), 30_000);
        assert_eq!(cfg.nonce_byte_len, 16);
    }

    #[test]
    fn explicit_constructor_leaves_optional_headers_unset() {
        let cfg = Config::with_base_url("https://api.example.com", "secret".to_string())
            .expect("config should build");
        assert_eq!(cfg.app_id, None);
        assert_eq!(cfg.bypass_token, None);
    }

    #[test]
    fn empty_secret_is_a_config_error() {
        let err = Config::with_base_url("https://api.example.com", String::new())
            .expect_err("empty secret must fail");
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let err = Config::with_base_url("ftp://api.example.com", "secret".to_string())
            .expect_err("ftp scheme must fail");
        assert!(matches!(err, ApiError::Config(_)));
    }
}
