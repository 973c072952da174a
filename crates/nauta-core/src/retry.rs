//! Política de retry com backoff exponencial

use crate::config::DispatcherSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Como repetir ações não idempotentes (`create`, `scale`) após falha transitória.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateRetryPolicy {
    /// Consulta o backend antes de repetir; se a tentativa anterior já surtiu
    /// efeito, a operação é considerada concluída.
    #[default]
    Recheck,
    /// Nunca repete; a primeira falha transitória é devolvida.
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Número de novas tentativas após a primeira
    pub max_retries: u32,
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_millis(500),
            factor: 2,
            cap: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &DispatcherSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base: Duration::from_millis(settings.backoff_base_ms),
            factor: settings.backoff_factor.max(1),
            cap: Duration::from_millis(settings.backoff_cap_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Espera antes da tentativa `attempt + 1`, onde `attempt` começa em 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let multiplier = self.factor.saturating_pow(exp);
        self.base
            .checked_mul(multiplier)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_sequence() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_millis(4000));
        assert_eq!(policy.backoff(5), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_from_settings() {
        let settings = DispatcherSettings {
            max_retries: 1,
            backoff_base_ms: 10,
            backoff_factor: 3,
            backoff_cap_ms: 50,
            ..DispatcherSettings::default()
        };
        let policy = RetryPolicy::from_settings(&settings);
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(30));
        assert_eq!(policy.backoff(3), Duration::from_millis(50));
    }
}
