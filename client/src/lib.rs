//! 签名 API 客户端职责：
//! 1. 对每个出站请求做规范化 + HMAC-SHA256 签名，携带设备身份与防重放材料。
//! 2. 管理每次安装唯一的设备 ID：惰性生成、内存缓存、安全存储持久化。
//! 3. 将并发 401 收敛为单次令牌刷新，排队请求刷新落定后按序重放。
//! 4. 对未收到响应的请求执行固定预算的定间隔重试。

mod canonical;
mod client;
mod config;
mod error;
mod identity;
mod refresh;
mod sign;
mod store;
mod transport;

pub use canonical::{Payload, canonical_path};
pub use client::ApiClient;
pub use config::Config;
pub use error::ApiError;
pub use identity::DeviceIdentity;
pub use sign::sign;
pub use store::{
    ACCESS_TOKEN_KEY, DEVICE_ID_KEY, FileSecureStore, MemorySecureStore, REFRESH_TOKEN_KEY,
    SecureStore,
};
pub use transport::{HttpTransport, Method, OutboundRequest, RawResponse, Transport};
