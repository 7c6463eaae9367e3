use std::{env, time::Duration};

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Capacity of the notification broadcast channel (default: 64)
    pub notification_capacity: usize,
    /// Delay between realtime reconnection attempts in milliseconds (default: 1,000)
    pub reconnect_delay_ms: u64,
    /// Fallback recomputation period of the sync monitor in seconds (default: 30)
    pub monitor_interval_seconds: u64,
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NOTIFICATION_CAPACITY` - Notification channel capacity (default: 64)
    /// - `REALTIME_RECONNECT_DELAY_MS` - Reconnection delay (default: 1,000)
    /// - `SYNC_MONITOR_INTERVAL_SECONDS` - Monitor fallback period (default: 30)
    pub fn from_env() -> Self {
        Self {
            notification_capacity: env::var("NOTIFICATION_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(64),
            reconnect_delay_ms: env::var("REALTIME_RECONNECT_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_000),
            monitor_interval_seconds: env::var("SYNC_MONITOR_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(30),
        }
    }

    /// Get the reconnection delay as a Duration.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Get the monitor fallback period as a Duration.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_conversion() {
        let config = SyncConfig {
            notification_capacity: 16,
            reconnect_delay_ms: 250,
            monitor_interval_seconds: 5,
        };

        assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(config.monitor_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_values() {
        // Clear environment variables to test defaults
        env::remove_var("NOTIFICATION_CAPACITY");
        env::remove_var("REALTIME_RECONNECT_DELAY_MS");
        env::remove_var("SYNC_MONITOR_INTERVAL_SECONDS");

        let config = SyncConfig::from_env();

        assert_eq!(config.notification_capacity, 64);
        assert_eq!(config.reconnect_delay_ms, 1_000);
        assert_eq!(config.monitor_interval_seconds, 30);
    }
}
