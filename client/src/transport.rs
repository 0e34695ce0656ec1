//! 传输层模块职责：
//! 1. 定义与具体 HTTP 库解耦的传输接口，供测试替身注入。
//! 2. 区分"未收到任何响应"（网络/超时失败）与"收到错误状态响应"。
//! 3. 提供基于 reqwest 的默认实现，单次尝试受固定超时约束。

use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;

/// HTTP 方法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// 返回大写方法名。
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// 出站请求：签名管线产出的最终形态。
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP 方法。
    pub method: Method,
    /// 完整请求 URL。
    pub url: String,
    /// 头部键值对（接收方按大小写不敏感处理）。
    pub headers: Vec<(String, String)>,
    /// 请求体；签名后不得再变形。
    pub body: Option<String>,
}

impl OutboundRequest {
    /// 读取指定头部的值（大小写不敏感）。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// 原始响应。
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP 状态码。
    pub status: u16,
    /// 响应头键值对。
    pub headers: Vec<(String, String)>,
    /// 响应体文本。
    pub body: String,
}

impl RawResponse {
    /// 将响应体按 JSON 解码。
    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_str(&self.body).context("decode response body failed")
    }
}

/// 传输接口。`Err` 仅表示未收到任何响应；
/// 错误状态码一律以 `Ok(RawResponse)` 返回，由上层分类处理。
pub trait Transport: Send + Sync {
    /// 发送请求并等待响应，单次尝试受 `timeout` 约束。
    fn send(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> impl Future<Output = anyhow::Result<RawResponse>> + Send;
}

/// 基于 reqwest 的默认传输实现。
pub struct HttpTransport {
    /// 底层 HTTP 客户端。
    client: reqwest::Client,
}

impl HttpTransport {
    /// 构造默认传输。
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("build http client failed")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    /// 发送请求；连接失败、超时、响应体中断均视为未收到响应。
    fn send(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> impl Future<Output = anyhow::Result<RawResponse>> + Send {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url).timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        async move {
            let response = builder.send().await.context("request transport failed")?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let body = response
                .text()
                .await
                .context("read response body failed")?;
            Ok(RawResponse {
                status,
                headers,
                body,
            })
        }
    }
}
