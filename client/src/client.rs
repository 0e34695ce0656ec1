//! 签名客户端模块职责：
//! 1. 对每个出站请求按固定顺序套用签名管线（规范化 → 签名 → 头部注入）。
//! 2. 处理 401：single-flight 刷新、排队重放、令牌持久化与清理。
//! 3. 对"未收到响应"的失败执行固定间隔重试，预算耗尽后如实上抛。

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use crate::canonical::{Payload, canonical_body, canonical_path};
use crate::config::Config;
use crate::error::ApiError;
use crate::identity::{DeviceIdentity, random_hex};
use crate::refresh::{RefreshCoordinator, RefreshRole};
use crate::sign::sign;
use crate::store::{ACCESS_TOKEN_KEY, FileSecureStore, REFRESH_TOKEN_KEY, SecureStore};
use crate::transport::{HttpTransport, Method, OutboundRequest, RawResponse, Transport};

/// 刷新端点路径。
const REFRESH_PATH: &str = "/auth/refresh";

/// 刷新端点响应体。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokens {
    /// 新签发的访问令牌。
    access_token: String,
    /// 轮换后的刷新令牌（服务端可选返回）。
    refresh_token: Option<String>,
}

/// 签名 API 客户端。
pub struct ApiClient<T: Transport> {
    /// 运行时配置。
    config: Config,
    /// 传输实现。
    transport: T,
    /// 安全存储（令牌与设备 ID）。
    store: Arc<dyn SecureStore>,
    /// 设备身份管理器。
    identity: DeviceIdentity,
    /// 单飞刷新协调器。
    refresh: RefreshCoordinator,
}

impl ApiClient<HttpTransport> {
    /// 从环境变量构造默认客户端；密钥缺失在此处即失败。
    pub fn from_env() -> Result<Self, ApiError> {
        Self::new(Config::from_env()?)
    }

    /// 用给定配置构造默认客户端（reqwest 传输 + 文件安全存储）。
    pub fn new(config: Config) -> Result<Self, ApiError> {
        let transport = HttpTransport::new()
            .map_err(|err| ApiError::Config(format!("build transport failed: {err}")))?;
        Ok(Self::with_parts(
            config,
            transport,
            Arc::new(FileSecureStore::load_default()),
        ))
    }
}

impl<T: Transport> ApiClient<T> {
    /// 注入传输与存储的构造入口，测试与定制场景使用。
    pub fn with_parts(config: Config, transport: T, store: Arc<dyn SecureStore>) -> Self {
        let identity = DeviceIdentity::new(Arc::clone(&store));
        Self {
            config,
            transport,
            store,
            identity,
            refresh: RefreshCoordinator::new(),
        }
    }

    /// GET 请求；query 参数随 URL 发送并参与签名规范化。
    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<RawResponse, ApiError> {
        self.request(Method::Get, path, query, Payload::Empty).await
    }

    /// POST 请求。
    pub async fn post(&self, path: &str, payload: Payload) -> Result<RawResponse, ApiError> {
        self.request(Method::Post, path, &[], payload).await
    }

    /// PUT 请求。
    pub async fn put(&self, path: &str, payload: Payload) -> Result<RawResponse, ApiError> {
        self.request(Method::Put, path, &[], payload).await
    }

    /// PATCH 请求。
    pub async fn patch(&self, path: &str, payload: Payload) -> Result<RawResponse, ApiError> {
        self.request(Method::Patch, path, &[], payload).await
    }

    /// DELETE 请求。
    pub async fn delete(&self, path: &str) -> Result<RawResponse, ApiError> {
        self.request(Method::Delete, path, &[], Payload::Empty)
            .await
    }

    /// 通用请求入口：拼接 URL 后交给执行循环。
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        payload: Payload,
    ) -> Result<RawResponse, ApiError> {
        let mut url = self
            .config
            .base_url
            .join(path)
            .map_err(|err| ApiError::Config(format!("invalid request path {path}: {err}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().copied());
        }
        self.execute(method, url, payload).await
    }

    /// 持久化访问/刷新令牌。
    pub fn set_auth_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), ApiError> {
        self.store
            .set(ACCESS_TOKEN_KEY, access_token)
            .map_err(ApiError::Storage)?;
        if let Some(refresh_token) = refresh_token {
            self.store
                .set(REFRESH_TOKEN_KEY, refresh_token)
                .map_err(ApiError::Storage)?;
        }
        Ok(())
    }

    /// 删除两个令牌。
    pub fn clear_auth_tokens(&self) -> Result<(), ApiError> {
        self.store
            .delete(ACCESS_TOKEN_KEY)
            .map_err(ApiError::Storage)?;
        self.store
            .delete(REFRESH_TOKEN_KEY)
            .map_err(ApiError::Storage)
    }

    /// 是否存在已存储的访问令牌。
    pub fn is_authenticated(&self) -> Result<bool, ApiError> {
        Ok(self
            .store
            .get(ACCESS_TOKEN_KEY)
            .map_err(ApiError::Storage)?
            .is_some())
    }

    /// 执行循环：每次尝试重新取号（时间戳/nonce）并重签。
    ///
    /// 规范化体在进入循环前固化一次，保证签名字节与发送字节一致；
    /// 401 至多触发一次刷新重放，无响应失败至多重试固定预算次。
    async fn execute(
        &self,
        method: Method,
        url: Url,
        payload: Payload,
    ) -> Result<RawResponse, ApiError> {
        let body = canonical_body(&payload);
        let signed_path = canonical_path(url.as_str());
        let mut retry_count: u32 = 0;
        let mut auth_retried = false;

        loop {
            let request = self.prepare(method, &url, &signed_path, &body)?;
            match self.transport.send(&request, self.config.timeout).await {
                Ok(response) if response.status == 401 && !auth_retried => {
                    auth_retried = true;
                    match self.refresh.begin().await {
                        RefreshRole::Leader => {
                            info!("received 401, starting token refresh");
                            match self.run_refresh().await {
                                Ok(()) => {
                                    self.refresh.finish(Ok(())).await;
                                    continue;
                                }
                                Err(err) => {
                                    warn!("token refresh failed: {err}");
                                    let shared = Arc::new(err);
                                    self.refresh.finish(Err(Arc::clone(&shared))).await;
                                    return Err(ApiError::from_shared_refresh(&shared));
                                }
                            }
                        }
                        RefreshRole::Follower(receiver) => match receiver.await {
                            Ok(Ok(())) => continue,
                            Ok(Err(shared)) => {
                                return Err(ApiError::from_shared_refresh(&shared));
                            }
                            Err(_) => {
                                return Err(ApiError::AuthExpired {
                                    reason: "refresh coordinator dropped".to_string(),
                                });
                            }
                        },
                    }
                }
                Ok(response) if response.status >= 400 => {
                    return Err(ApiError::Upstream {
                        status: response.status,
                        body: response.body,
                    });
                }
                Ok(response) => return Ok(response),
                Err(err) => {
                    if retry_count < self.config.retry_attempts {
                        retry_count += 1;
                        debug!(
                            "no response received, retrying attempt {} of {}: {err}",
                            retry_count, self.config.retry_attempts
                        );
                        tokio::time::sleep(self.config.retry_delay).await;
                        continue;
                    }
                    return Err(ApiError::Network {
                        attempts: retry_count + 1,
                        source: err,
                    });
                }
            }
        }
    }

    /// 单次出站请求装配：头部顺序与签名材料严格按契约生成。
    fn prepare(
        &self,
        method: Method,
        url: &Url,
        signed_path: &str,
        body: &str,
    ) -> Result<OutboundRequest, ApiError> {
        let device_id = self.identity.device_id();
        let timestamp = epoch_secs();
        let nonce = random_hex(self.config.nonce_byte_len);
        let signature = sign(
            &self.config.shared_secret,
            method.as_str(),
            signed_path,
            body,
            &device_id,
            timestamp,
            &nonce,
        )?;

        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-Device-Id".to_string(), device_id),
            ("X-Timestamp".to_string(), timestamp.to_string()),
            ("X-Nonce".to_string(), nonce),
            ("X-Signature".to_string(), signature),
        ];
        if let Some(app_id) = &self.config.app_id {
            headers.push(("X-App-Id".to_string(), app_id.clone()));
        }
        if let Some(bypass_token) = &self.config.bypass_token {
            headers.push((
                "x-vercel-protection-bypass".to_string(),
                bypass_token.clone(),
            ));
        }
        // 无令牌的请求仍然签名发送（未认证请求）。
        if let Some(token) = self
            .store
            .get(ACCESS_TOKEN_KEY)
            .map_err(ApiError::Storage)?
        {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        Ok(OutboundRequest {
            method,
            url: url.as_str().to_string(),
            headers,
            body: if body.is_empty() {
                None
            } else {
                Some(body.to_string())
            },
        })
    }

    /// 执行刷新调用：签名后直送传输层，绕开 401 处理避免自递归。
    ///
    /// 无响应失败与普通请求一样享有固定间隔的重试预算；
    /// 预算耗尽或其余失败路径（无刷新令牌、错误状态、解码失败）都会
    /// 清空两个令牌后返回 AuthExpired。
    async fn run_refresh(&self) -> Result<(), ApiError> {
        let refresh_token = self
            .store
            .get(REFRESH_TOKEN_KEY)
            .map_err(ApiError::Storage)?;
        let Some(refresh_token) = refresh_token else {
            self.clear_auth_tokens()?;
            return Err(ApiError::AuthExpired {
                reason: "no refresh token in store".to_string(),
            });
        };

        let url = self
            .config
            .base_url
            .join(REFRESH_PATH)
            .map_err(|err| ApiError::Config(format!("invalid refresh path: {err}")))?;
        let payload = Payload::Json(json!({ "refreshToken": refresh_token }));
        let body = canonical_body(&payload);
        let signed_path = canonical_path(url.as_str());

        let mut retry_count: u32 = 0;
        let outcome = loop {
            // 每次尝试重新取号并重签，不复用过期签名材料。
            let request = self.prepare(Method::Post, &url, &signed_path, &body)?;
            match self.transport.send(&request, self.config.timeout).await {
                Ok(response) => break Ok(response),
                Err(err) => {
                    if retry_count < self.config.retry_attempts {
                        retry_count += 1;
                        debug!(
                            "refresh got no response, retrying attempt {} of {}: {err}",
                            retry_count, self.config.retry_attempts
                        );
                        tokio::time::sleep(self.config.retry_delay).await;
                        continue;
                    }
                    break Err(err);
                }
            }
        };
        let failure = match outcome {
            Ok(response) if (200..300).contains(&response.status) => {
                match response.json::<RefreshTokens>() {
                    Ok(tokens) => {
                        self.store
                            .set(ACCESS_TOKEN_KEY, &tokens.access_token)
                            .map_err(ApiError::Storage)?;
                        if let Some(rotated) = tokens.refresh_token {
                            self.store
                                .set(REFRESH_TOKEN_KEY, &rotated)
                                .map_err(ApiError::Storage)?;
                        }
                        info!("access token refreshed");
                        return Ok(());
                    }
                    Err(err) => format!("decode refresh response failed: {err}"),
                }
            }
            Ok(response) => format!("refresh endpoint returned status {}", response.status),
            Err(err) => format!("refresh request failed: {err}"),
        };

        self.clear_auth_tokens()?;
        Err(ApiError::AuthExpired { reason: failure })
    }
}

/// 当前秒级时间戳。
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
