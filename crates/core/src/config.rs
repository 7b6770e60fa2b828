use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// # Summary
/// 全局应用配置。
///
/// # Invariants
/// - 每个分节都可缺省，缺省值与 `Default` 实现一致，
///   因此最小的配置文件可以只写需要覆盖的键。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub health: HealthConfig,
    pub breaker: BreakerConfig,
    pub balancer: BalancerConfig,
    pub proxy: ProxyConfig,
    pub logging: LoggingConfig,
    /// 服务名 -> 实例列表
    pub services: BTreeMap<String, Vec<InstanceConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 单连接出站队列容量
    pub outbound_queue: usize,
    /// WebSocket 心跳间隔 (秒)，0 表示关闭
    pub keepalive_secs: u64,
    /// 连接拆除时等待出站帧写完的最长时间 (毫秒)
    pub drain_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            outbound_queue: 256,
            keepalive_secs: 30,
            drain_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// 允许的签名算法，例如 HS256
    pub algorithm: String,
    /// 令牌最长有效期 (秒)，以 `iat` 为起点
    pub expiry_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "YOUR_SUPER_SECRET_KEY".to_string(), // 开发默认值，生产必须覆盖
            algorithm: "HS256".to_string(),
            expiry_secs: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// 每个窗口内允许的请求数
    pub requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 600,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: u64,
    pub timeout_ms: u64,
    /// 连续探测失败多少次后标记为不健康
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            timeout_ms: 2000,
            failure_threshold: 3,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    /// Open 状态持续时长 (秒)
    pub timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_secs: 30,
        }
    }
}

impl BreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 负载均衡策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    #[default]
    RoundRobin,
    LeastConnections,
    Weighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub strategy: BalanceStrategy,
    /// 一次逻辑调用最多尝试的实例数 (含首次)
    pub max_attempts: u32,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: BalanceStrategy::RoundRobin,
            max_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// 单次后端调用截止时间 (毫秒)
    pub deadline_ms: u64,
    /// 访问上游网关时携带的 Bearer 凭证
    pub upstream_token: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 5000,
            upstream_token: None,
        }
    }
}

impl ProxyConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter 指令，`RUST_LOG` 存在时以其为准
    pub level: String,
    pub json: bool,
    /// 日志文件目录，缺省只输出到标准输出
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceConfig {
    pub address: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl AppConfig {
    /// # Summary
    /// 未配置任何服务时使用的内置拓扑：两个进程内缓存实例。
    pub fn builtin_services() -> BTreeMap<String, Vec<InstanceConfig>> {
        let mut services = BTreeMap::new();
        services.insert(
            "cache".to_string(),
            vec![InstanceConfig {
                address: "mem://cache-0".to_string(),
                weight: 1,
            }],
        );
        services.insert(
            "ohlcv".to_string(),
            vec![InstanceConfig {
                address: "mem://ohlcv-0".to_string(),
                weight: 1,
            }],
        );
        services
    }

    /// 实际生效的服务拓扑
    pub fn effective_services(&self) -> BTreeMap<String, Vec<InstanceConfig>> {
        if self.services.is_empty() {
            Self::builtin_services()
        } else {
            self.services.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.jwt_secret, "YOUR_SUPER_SECRET_KEY");
        assert_eq!(config.auth.algorithm, "HS256");
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.open_timeout(), Duration::from_secs(30));
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.balancer.strategy, BalanceStrategy::RoundRobin);
        assert_eq!(config.proxy.deadline(), Duration::from_secs(5));
        assert!(config.services.is_empty());
        assert_eq!(config.effective_services().len(), 2);
    }

    #[test]
    fn test_partial_json_keeps_section_defaults() {
        let raw = r#"{
            "breaker": { "failure_threshold": 2 },
            "balancer": { "strategy": "least_connections" },
            "services": { "cache": [ { "address": "http://10.0.0.1:9000" } ] }
        }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.timeout_secs, 30);
        assert_eq!(config.balancer.strategy, BalanceStrategy::LeastConnections);
        assert_eq!(config.services["cache"][0].weight, 1);
        assert_eq!(config.effective_services().len(), 1);
    }

    #[test]
    fn test_keepalive_zero_disables() {
        let mut server = ServerConfig::default();
        assert_eq!(server.keepalive(), Some(Duration::from_secs(30)));
        server.keepalive_secs = 0;
        assert_eq!(server.keepalive(), None);
    }
}
