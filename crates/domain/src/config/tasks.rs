use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task supervisor configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Background turn-worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Maximum turns executing concurrently across the process.
    /// Clamped to the range `1..=20`.
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent: usize,
    /// Attempts per turn before the task is marked failed.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent: d_max_concurrent(),
            max_attempts: d_max_attempts(),
        }
    }
}

impl TaskConfig {
    /// Clamp `max_concurrent` to the allowed range `1..=20`.
    pub fn clamped(&self) -> Self {
        Self {
            max_concurrent: self.max_concurrent.clamp(1, 20),
            max_attempts: self.max_attempts,
        }
    }
}

fn d_max_concurrent() -> usize {
    5
}
fn d_max_attempts() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TaskConfig::default();
        assert_eq!(cfg.max_concurrent, 5);
        assert_eq!(cfg.max_attempts, 3);
    }

    #[test]
    fn clamp_below_min() {
        let cfg = TaskConfig {
            max_concurrent: 0,
            max_attempts: 3,
        };
        assert_eq!(cfg.clamped().max_concurrent, 1);
    }

    #[test]
    fn clamp_above_max() {
        let cfg = TaskConfig {
            max_concurrent: 100,
            max_attempts: 3,
        };
        assert_eq!(cfg.clamped().max_concurrent, 20);
    }

    #[test]
    fn clamp_preserves_attempts() {
        let cfg = TaskConfig {
            max_concurrent: 7,
            max_attempts: 2,
        };
        let clamped = cfg.clamped();
        assert_eq!(clamped.max_concurrent, 7);
        assert_eq!(clamped.max_attempts, 2);
    }
}
