//! Server configuration

use atp_core::{ExecutionLimits, ExecutorConfig};
use clap::Parser;
use std::time::Duration;

/// Configuration for the atp server, from flags or environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "atp-server", about = "Resumable agent-program execution server")]
pub struct ServerConfig {
    /// Bind host.
    #[arg(long, env = "ATP_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Bind port.
    #[arg(long, env = "ATP_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Cache key prefix for all persisted execution state.
    #[arg(long, env = "ATP_KEY_PREFIX", default_value = "atp")]
    pub key_prefix: String,

    /// Seconds a paused execution survives without a resume.
    #[arg(long, env = "ATP_PAUSED_TTL", default_value_t = 1800)]
    pub paused_ttl_seconds: u64,

    /// Interval between sweeps of expired paused executions, seconds.
    #[arg(long, env = "ATP_SWEEP_INTERVAL", default_value_t = 60)]
    pub sweep_interval_seconds: u64,

    /// Wall-clock budget per execution attempt, milliseconds.
    #[arg(long, env = "ATP_WALL_CLOCK_MS", default_value_t = 30_000)]
    pub wall_clock_ms: u64,

    /// Maximum LLM completions per execution.
    #[arg(long, env = "ATP_MAX_LLM_CALLS", default_value_t = 100)]
    pub max_llm_calls: u32,

    /// Iteration cap for resumable loops.
    #[arg(long, env = "ATP_MAX_LOOP_ITERATIONS", default_value_t = 10_000)]
    pub max_loop_iterations: u64,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }

    /// Engine configuration derived from the server settings.
    pub fn executor_config(&self) -> ExecutorConfig {
        let default_limits = ExecutionLimits {
            wall_clock_ms: self.wall_clock_ms,
            max_llm_calls: self.max_llm_calls,
            max_loop_iterations: self.max_loop_iterations,
            paused_ttl_seconds: self.paused_ttl_seconds,
            ..ExecutionLimits::default()
        };
        ExecutorConfig {
            key_prefix: self.key_prefix.clone(),
            resume_path: "/api/v1/executions".to_string(),
            record_ttl: None,
            default_limits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = ServerConfig::parse_from(["atp-server"]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.executor_config().default_limits.max_llm_calls, 100);
    }

    #[test]
    fn flags_override_defaults() {
        let config =
            ServerConfig::parse_from(["atp-server", "--port", "9000", "--max-llm-calls", "5"]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.executor_config().default_limits.max_llm_calls, 5);
    }
}
