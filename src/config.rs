// =============================================================================
// Runtime Configuration — loaded once from the environment at startup
// =============================================================================
//
// Every option is read with a documented default. A malformed numeric value
// falls back to the default and logs a warning rather than aborting startup —
// an operator should get a conservatively-configured system, not a crash loop.
// =============================================================================

use tracing::warn;

/// Deployment environment. DRY_RUN never calls the venue; TESTNET calls the
/// venue's paper-trading endpoint; LIVE trades real funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Environment {
    DryRun,
    Testnet,
    Live,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DryRun => write!(f, "DRY_RUN"),
            Self::Testnet => write!(f, "TESTNET"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DRY_RUN" => Ok(Self::DryRun),
            "TESTNET" => Ok(Self::Testnet),
            "LIVE" => Ok(Self::Live),
            _ => Err(()),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub environment: Environment,
    pub instruments: Vec<String>,
    pub max_positions: usize,
    pub max_position_size: f64,
    pub activation_threshold: f64,
    pub stop_atr_multiplier: f64,
    pub max_drawdown_pct: f64,
    pub daily_loss_limit_pct: f64,
    pub max_slippage_pct: f64,
    pub leverage: u32,
    pub risk_per_trade_pct: f64,
    pub min_position_notional: f64,
    pub max_position_notional: f64,
    pub starting_equity: f64,
    pub api_key: String,
    pub api_secret: String,
    pub admin_token: String,
    pub bind_addr: String,
    pub state_key: String,
}

impl Config {
    /// Load configuration from the environment. `dotenv` should already have
    /// been invoked by the caller before this runs.
    pub fn load() -> Self {
        let environment = env_parse_or("ENVIRONMENT", Environment::DryRun);

        let instruments = std::env::var("INSTRUMENTS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|x| x.trim().to_uppercase())
                    .filter(|x| !x.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);

        Config {
            environment,
            instruments,
            max_positions: env_parse_or("MAX_POSITIONS", 5),
            max_position_size: env_parse_or("MAX_POSITION_SIZE", 1000.0),
            activation_threshold: env_parse_or("ACTIVATION_THRESHOLD", 0.7),
            stop_atr_multiplier: env_parse_or("STOP_ATR_MULTIPLIER", 2.0),
            max_drawdown_pct: env_parse_or("MAX_DRAWDOWN_PCT", 15.0),
            daily_loss_limit_pct: env_parse_or("DAILY_LOSS_LIMIT_PCT", 3.0),
            max_slippage_pct: env_parse_or("MAX_SLIPPAGE_PCT", 0.1),
            leverage: env_parse_or("LEVERAGE", 3),
            risk_per_trade_pct: env_parse_or("RISK_PER_TRADE_PCT", 1.0),
            min_position_notional: env_parse_or("MIN_POSITION_NOTIONAL", 5.0),
            max_position_notional: env_parse_or("MAX_POSITION_NOTIONAL", 1000.0),
            starting_equity: env_parse_or("STARTING_EQUITY", 10_000.0),
            api_key: std::env::var("API_KEY").unwrap_or_default(),
            api_secret: std::env::var("API_SECRET").unwrap_or_default(),
            admin_token: std::env::var("ADMIN_TOKEN").unwrap_or_default(),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into()),
            state_key: std::env::var("STATE_KEY").unwrap_or_else(|_| "system_state".into()),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment.to_string())
            .field("instruments", &self.instruments)
            .field("max_positions", &self.max_positions)
            .field("max_position_size", &self.max_position_size)
            .field("activation_threshold", &self.activation_threshold)
            .field("stop_atr_multiplier", &self.stop_atr_multiplier)
            .field("max_drawdown_pct", &self.max_drawdown_pct)
            .field("daily_loss_limit_pct", &self.daily_loss_limit_pct)
            .field("max_slippage_pct", &self.max_slippage_pct)
            .field("leverage", &self.leverage)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("admin_token", &"<redacted>")
            .field("bind_addr", &self.bind_addr)
            .finish()
    }
}

/// Parse an environment variable via `FromStr`, falling back to `default` and
/// logging a warning when the variable is set but fails to parse. An unset
/// variable silently uses the default (not a misconfiguration).
fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, raw, default = %default, "malformed env var, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_known_values() {
        assert_eq!("LIVE".parse::<Environment>(), Ok(Environment::Live));
        assert_eq!("testnet".parse::<Environment>(), Ok(Environment::Testnet));
        assert_eq!("dry_run".parse::<Environment>(), Ok(Environment::DryRun));
    }

    #[test]
    fn environment_rejects_unknown() {
        assert!("BOGUS".parse::<Environment>().is_err());
    }

    #[test]
    fn env_parse_or_falls_back_on_missing() {
        std::env::remove_var("STRATA_TEST_NONEXISTENT_KEY");
        let v: f64 = env_parse_or("STRATA_TEST_NONEXISTENT_KEY", 2.5);
        assert_eq!(v, 2.5);
    }
}
</content>
