//! 客户端错误分类定义。

use std::sync::Arc;

/// 签名客户端对外错误分类。
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 配置错误（致命，不重试，构造期触发）。
    #[error("configuration error: {0}")]
    Config(String),

    /// 认证过期：401 且无可用 refresh token，或刷新调用失败。
    #[error("authentication expired: {reason}")]
    AuthExpired {
        /// 失败原因描述。
        reason: String,
    },

    /// 网络失败：重试预算耗尽仍未收到任何响应。
    #[error("no response after {attempts} attempts: {source}")]
    Network {
        /// 已执行的网络尝试总次数。
        attempts: u32,
        /// 最后一次底层传输错误。
        #[source]
        source: anyhow::Error,
    },

    /// 上游错误：收到了响应但状态码为业务外错误（401 刷新路径除外）。
    #[error("upstream returned status {status}")]
    Upstream {
        /// HTTP 状态码。
        status: u16,
        /// 响应体文本（用于上层诊断）。
        body: String,
    },

    /// 令牌读写等安全存储故障（设备 ID 的存储故障只告警不在此列）。
    #[error("secure store failure: {0}")]
    Storage(#[source] anyhow::Error),
}

impl ApiError {
    /// 将共享的刷新失败结果转为排队请求各自的 AuthExpired。
    pub(crate) fn from_shared_refresh(err: &Arc<ApiError>) -> ApiError {
        match err.as_ref() {
            ApiError::AuthExpired { reason } => ApiError::AuthExpired {
                reason: reason.clone(),
            },
            other => ApiError::AuthExpired {
                reason: format!("token refresh failed: {other}"),
            },
        }
    }
}
