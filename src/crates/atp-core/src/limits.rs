//! Per-execution resource limits

use serde::{Deserialize, Serialize};

/// Effective resource limits for one execution. Defaults are applied at
/// submit time; a request may lower or raise individual knobs through
/// [`LimitOverrides`] and [`ExecutionHints`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Wall-clock budget for one execution attempt, in milliseconds.
    pub wall_clock_ms: u64,
    /// Interpreter operation fuel per attempt.
    pub max_ops: u64,
    /// Approximate sandbox allocation budget, in bytes.
    pub max_memory_bytes: u64,
    /// Maximum number of mediated callbacks per execution.
    pub max_callbacks: u32,
    /// Maximum number of LLM completions per execution.
    pub max_llm_calls: u32,
    /// Iteration cap for resumable loops.
    pub max_loop_iterations: u64,
    /// Minimum input length before a batchable site fuses into one
    /// batch pause.
    pub batch_threshold: usize,
    /// Seconds a paused execution survives without a resume.
    pub paused_ttl_seconds: u64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            wall_clock_ms: 30_000,
            max_ops: 5_000_000,
            max_memory_bytes: 64 * 1024 * 1024,
            max_callbacks: 1_000,
            max_llm_calls: 100,
            max_loop_iterations: 10_000,
            batch_threshold: 5,
            paused_ttl_seconds: 1_800,
        }
    }
}

/// Submit-time overrides; unset fields keep the server defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitOverrides {
    pub wall_clock_ms: Option<u64>,
    pub max_ops: Option<u64>,
    pub max_memory_bytes: Option<u64>,
    pub max_callbacks: Option<u32>,
    pub max_llm_calls: Option<u32>,
    pub max_loop_iterations: Option<u64>,
    pub paused_ttl_seconds: Option<u64>,
}

/// Non-limit tuning knobs a submit may carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionHints {
    pub batch_threshold: Option<usize>,
}

impl ExecutionLimits {
    /// Apply request overrides and hints on top of these defaults.
    pub fn resolve(
        &self,
        overrides: Option<&LimitOverrides>,
        hints: Option<&ExecutionHints>,
    ) -> ExecutionLimits {
        let mut limits = self.clone();
        if let Some(o) = overrides {
            if let Some(v) = o.wall_clock_ms {
                limits.wall_clock_ms = v;
            }
            if let Some(v) = o.max_ops {
                limits.max_ops = v;
            }
            if let Some(v) = o.max_memory_bytes {
                limits.max_memory_bytes = v;
            }
            if let Some(v) = o.max_callbacks {
                limits.max_callbacks = v;
            }
            if let Some(v) = o.max_llm_calls {
                limits.max_llm_calls = v;
            }
            if let Some(v) = o.max_loop_iterations {
                limits.max_loop_iterations = v;
            }
            if let Some(v) = o.paused_ttl_seconds {
                limits.paused_ttl_seconds = v;
            }
        }
        if let Some(h) = hints {
            if let Some(v) = h.batch_threshold {
                limits.batch_threshold = v;
            }
        }
        limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_applies_overrides_and_hints() {
        let defaults = ExecutionLimits::default();
        let overrides = LimitOverrides {
            max_llm_calls: Some(3),
            wall_clock_ms: Some(500),
            ..Default::default()
        };
        let hints = ExecutionHints {
            batch_threshold: Some(2),
        };

        let resolved = defaults.resolve(Some(&overrides), Some(&hints));
        assert_eq!(resolved.max_llm_calls, 3);
        assert_eq!(resolved.wall_clock_ms, 500);
        assert_eq!(resolved.batch_threshold, 2);
        assert_eq!(resolved.max_ops, defaults.max_ops);
    }
}
