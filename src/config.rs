use serde::Deserialize;

/// Runtime settings, layered from defaults and `FUTBOT_`-prefixed
/// environment variables (a `.env` file is loaded by main before this).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Exchange access
    pub symbol: String,
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,

    // Lot & leverage
    pub lot_size: f64,
    pub leverage: u32,

    // TP / SL offset, percent of trigger price (RR 1:1)
    pub offset_pct: f64,

    // Martingale
    pub martin_factor: f64,
    pub max_level: u32,
    pub state_file: String,
    /// Seconds after which a restored snapshot is considered stale; 0 disables
    pub reset_timeout_secs: u64,

    // Order management
    pub order_timeout_secs: u64,
    pub lock_window_secs: u64,
    pub status_retry_attempts: u32,
    pub status_retry_interval_secs: u64,
    pub exit_retry_attempts: u32,
    pub partial_fill_threshold: f64,
    /// Defer an entry timeout while the remaining gap to the trigger is below
    /// this fraction of the gap at submission. Tunable, not a hard contract.
    pub timeout_defer_ratio: f64,
    /// Carry the stop-loss on the entry order itself instead of staging it
    pub attach_entry_stop: bool,

    // Entry conditions
    pub consecutive_candles: usize,
    pub direction_match_check: bool,

    // Loops
    pub poll_interval_secs: u64,
    pub reconcile_interval_secs: u64,

    // Risk guard
    pub max_daily_loss_pct: f64,
    pub max_consecutive_losses: u32,
    pub initial_balance: f64,

    // Notifications & stats
    pub discord_webhook_url: Option<String>,
    pub stats_window: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbol: "WBAR_USDT".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            base_url: "https://contract.mexc.com".to_string(),
            lot_size: 1.0,
            leverage: 20,
            offset_pct: 0.15,
            martin_factor: 2.0,
            max_level: 6,
            state_file: "trade_state.json".to_string(),
            reset_timeout_secs: 0,
            order_timeout_secs: 60,
            lock_window_secs: 5,
            status_retry_attempts: 5,
            status_retry_interval_secs: 2,
            exit_retry_attempts: 3,
            partial_fill_threshold: 0.95,
            timeout_defer_ratio: 0.5,
            attach_entry_stop: false,
            consecutive_candles: 2,
            direction_match_check: false,
            poll_interval_secs: 5,
            reconcile_interval_secs: 3,
            max_daily_loss_pct: 2.0,
            max_consecutive_losses: 10,
            initial_balance: 10_000.0,
            discord_webhook_url: None,
            stats_window: 200,
        }
    }
}

impl Settings {
    /// Load settings from the environment on top of defaults
    pub fn load() -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix("FUTBOT").try_parsing(true))
            .build()?;
        cfg.try_deserialize()
    }

    /// TP/SL distance for a given trigger price
    pub fn offset_for(&self, trigger_price: f64) -> f64 {
        trigger_price * self.offset_pct / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.lot_size, 1.0);
        assert_eq!(s.martin_factor, 2.0);
        assert_eq!(s.order_timeout_secs, 60);
        assert_eq!(s.reset_timeout_secs, 0);
        assert!(!s.attach_entry_stop);
        assert!(s.discord_webhook_url.is_none());
    }

    #[test]
    fn test_offset_is_percent_of_price() {
        let s = Settings::default(); // 0.15%
        let offset = s.offset_for(200.0);
        assert!((offset - 0.3).abs() < 1e-9);
    }
}
