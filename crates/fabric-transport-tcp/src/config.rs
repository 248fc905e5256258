//! 传输层配置。
//!
//! 配置可以直接构造，也可以通过 [`TransportConfig::from_toml_str`] 从 TOML 文本加载，
//! 缺省字段取默认值：
//!
//! ```toml
//! staging_buffer_size = 512
//! iov_limit = 4
//! max_shared_contexts = 64
//! nodelay = true
//!
//! [pool]
//! chunk_count = 1024
//! max_count = 0      # 0 表示不设上限
//! ```

use fabric_buffer::PoolConfig;
use serde::Deserialize;
use thiserror::Error;

/// 配置加载或校验失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse transport configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid transport configuration: `{field}` must be greater than zero")]
    Zero { field: &'static str },
}

/// 接收条目池的增长参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub chunk_count: usize,
    pub max_count: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            chunk_count: fabric_buffer::DEFAULT_CHUNK_COUNT,
            max_count: 0,
        }
    }
}

impl From<PoolSettings> for PoolConfig {
    fn from(value: PoolSettings) -> Self {
        PoolConfig::new(value.chunk_count, value.max_count)
    }
}

/// 传输层参数。
///
/// - `staging_buffer_size`：每连接暂存缓冲容量；
/// - `iov_limit`：单个接收请求允许的最大段数；
/// - `max_shared_contexts`：进程内同时存活的共享接收上下文上限；
/// - `nodelay`：是否关闭 Nagle 算法。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub staging_buffer_size: usize,
    pub iov_limit: usize,
    pub max_shared_contexts: usize,
    pub nodelay: bool,
    pub pool: PoolSettings,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            staging_buffer_size: 512,
            iov_limit: 4,
            max_shared_contexts: 64,
            nodelay: true,
            pool: PoolSettings::default(),
        }
    }
}

impl TransportConfig {
    /// 解析并校验 TOML 配置。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 拒绝会让引擎无法推进的零值参数。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("staging_buffer_size", self.staging_buffer_size),
            ("iov_limit", self.iov_limit),
            ("max_shared_contexts", self.max_shared_contexts),
            ("pool.chunk_count", self.pool.chunk_count),
        ];
        match checks.into_iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::Zero { field }),
            None => Ok(()),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        self.pool.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = TransportConfig::from_toml_str("").expect("空文档应使用默认值");
        assert_eq!(config, TransportConfig::default());
    }

    #[test]
    fn nested_pool_section_is_parsed() {
        let config = TransportConfig::from_toml_str(
            r#"
            staging_buffer_size = 4096
            [pool]
            chunk_count = 8
            max_count = 32
            "#,
        )
        .expect("合法配置");
        assert_eq!(config.staging_buffer_size, 4096);
        assert_eq!(config.iov_limit, 4);
        assert_eq!(config.pool_config(), PoolConfig::new(8, 32));
    }

    #[test]
    fn zero_values_are_rejected() {
        let err = TransportConfig::from_toml_str("iov_limit = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Zero { field: "iov_limit" }));
        assert!(matches!(
            TransportConfig::from_toml_str("nodelay = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
