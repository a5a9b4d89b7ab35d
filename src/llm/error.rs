//! 模型调用错误
//!
//! LlmError 是单次请求的失败，按 kind 分为可重试（限流、超时、5xx、网络）与致命（鉴权、额度、模型不存在、请求非法）；
//! ModelError 是整条模型链耗尽后的聚合错误，逐模型列出失败原因。

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 单次请求失败的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    RateLimited,
    Timeout,
    ServerError,
    Network,
    Auth,
    ModelNotFound,
    InvalidRequest,
    /// 额度或账单问题，重试无意义
    QuotaExceeded,
    Other,
}

impl LlmErrorKind {
    /// 可重试的瞬时错误
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Timeout | Self::ServerError | Self::Network
        )
    }
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimited => "rate limited",
            Self::Timeout => "timeout",
            Self::ServerError => "server error",
            Self::Network => "network error",
            Self::Auth => "authentication failed",
            Self::ModelNotFound => "model not found",
            Self::InvalidRequest => "invalid request",
            Self::QuotaExceeded => "quota exceeded",
            Self::Other => "error",
        };
        f.write_str(s)
    }
}

/// 单次模型请求错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    /// 服务端建议的重试间隔（限流时）
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(LlmErrorKind::RateLimited, message)
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Timeout, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Auth, message)
    }

    pub fn model_not_found(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ModelNotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidRequest, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// 由 OpenAI 错误对象的 type / code 分类；两者都缺失时退回到文本推断
    pub fn from_api_error(
        error_type: Option<&str>,
        code: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let tags = [code, error_type];
        let tagged = |names: &[&str]| tags.iter().flatten().any(|t| names.contains(t));

        let kind = if tagged(&["insufficient_quota", "billing_hard_limit_reached", "billing_not_active"]) {
            LlmErrorKind::QuotaExceeded
        } else if tagged(&["model_not_found"]) {
            LlmErrorKind::ModelNotFound
        } else if tagged(&["invalid_api_key", "authentication_error", "permission_error", "permission_denied"]) {
            LlmErrorKind::Auth
        } else if tagged(&["context_length_exceeded", "invalid_request_error", "invalid_value"]) {
            LlmErrorKind::InvalidRequest
        } else if tagged(&["rate_limit_exceeded", "rate_limit_error", "requests", "tokens"]) {
            LlmErrorKind::RateLimited
        } else if tagged(&["server_error", "api_error", "overloaded_error", "service_unavailable"]) {
            LlmErrorKind::ServerError
        } else {
            return Self::from_message(message);
        };
        Self::new(kind, message)
    }

    /// 由错误文本推断分类
    ///
    /// 先认明确的错误标记（额度、模型不存在、请求非法、鉴权），再认状态码；
    /// 状态码只在 `status` / `HTTP` / `error code` 之后或位于开头时才算数，消息里的 token 数等数字不参与判断。
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        let kind = if has(&["insufficient_quota", "exceeded your current quota", "billing"]) {
            LlmErrorKind::QuotaExceeded
        } else if has(&["model_not_found", "model not found", "does not exist", "unknown model", "no such model"]) {
            LlmErrorKind::ModelNotFound
        } else if has(&["context_length_exceeded", "invalid_request", "invalid request", "context length", "maximum context"]) {
            LlmErrorKind::InvalidRequest
        } else if has(&["invalid api key", "incorrect api key", "invalid_api_key", "unauthorized", "authentication", "permission denied"]) {
            LlmErrorKind::Auth
        } else if has(&["rate limit", "rate_limit", "too many requests"]) {
            LlmErrorKind::RateLimited
        } else if has(&["timed out", "timeout", "deadline"]) {
            LlmErrorKind::Timeout
        } else if let Some(kind) = status_code(&lower).and_then(kind_for_status) {
            kind
        } else if has(&["internal server error", "bad gateway", "service unavailable", "overloaded"]) {
            LlmErrorKind::ServerError
        } else if has(&["connection", "dns", "reset by peer", "broken pipe", "error sending request", "network"]) {
            LlmErrorKind::Network
        } else {
            LlmErrorKind::Other
        };
        Self::new(kind, message)
    }
}

static STATUS_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 提取 HTTP 状态码：开头的三位数，或紧跟在 status / http / error code 之后的三位数
fn status_code(lower: &str) -> Option<u16> {
    let re = STATUS_RE
        .get_or_init(|| {
            Regex::new(r"(?:^|status(?:\s+code)?|http(?:/\d(?:\.\d)?)?|error\s+code)[\s:=]*([1-5]\d\d)\b").ok()
        })
        .as_ref()?;
    re.captures(lower.trim_start())?.get(1)?.as_str().parse().ok()
}

pub(crate) fn kind_for_status(status: u16) -> Option<LlmErrorKind> {
    let kind = match status {
        429 => LlmErrorKind::RateLimited,
        401 | 403 => LlmErrorKind::Auth,
        404 => LlmErrorKind::ModelNotFound,
        408 => LlmErrorKind::Timeout,
        400 | 413 | 422 => LlmErrorKind::InvalidRequest,
        500..=599 => LlmErrorKind::ServerError,
        _ => return None,
    };
    Some(kind)
}

/// 模型链中某个模型的最终失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFailure {
    pub model: String,
    pub attempts: u32,
    pub error: LlmError,
}

impl fmt::Display for ModelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} attempt{}): {}",
            self.model,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.error
        )
    }
}

/// 模型链耗尽
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("all {} model(s) in the chain failed: {}", .0.len(), join_failures(.0))]
    ChainExhausted(Vec<ModelFailure>),
}

impl ModelError {
    pub fn failures(&self) -> &[ModelFailure] {
        match self {
            Self::ChainExhausted(failures) => failures,
        }
    }
}

fn join_failures(failures: &[ModelFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
