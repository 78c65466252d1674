use clap::{Parser, ValueEnum};
use std::time::Duration;

/// Built-in sets of timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Timing {
    #[default]
    Production,
    /// Short sweep interval and threshold, for bench testing.
    Debug,
}

#[derive(Debug, Parser)]
#[command(about, version)]
pub struct Args {
    /// Which set of timings to start from.
    #[arg(long, env = "ORB_MODEM_KICK_TIMING", value_enum, default_value_t)]
    pub timing: Timing,
    /// How often stuck modems are looked for.
    #[arg(long, env = "ORB_MODEM_KICK_SWEEP_INTERVAL_SECONDS")]
    pub sweep_interval_seconds: Option<u64>,
    /// How long a modem must stay idle or denied before it is kicked.
    #[arg(long, env = "ORB_MODEM_KICK_KICK_THRESHOLD_SECONDS")]
    pub kick_threshold_seconds: Option<u64>,
    /// Delay in front of every step of a kick.
    #[arg(long, env = "ORB_MODEM_KICK_STEP_DELAY_SECONDS")]
    pub step_delay_seconds: Option<u64>,
    /// Failed calls a single kick tolerates before giving up.
    #[arg(long, env = "ORB_MODEM_KICK_MAX_RETRIES")]
    pub max_retries: Option<u32>,
    /// Kick every modem on every sweep, whatever its registration state.
    #[arg(long, env = "ORB_MODEM_KICK_SIMULATE_STUCK")]
    pub simulate_stuck: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub sweep_interval: Duration,
    /// A modem is kicked once it has been stuck for strictly longer than this.
    pub kick_threshold: Duration,
    pub step_delay: Duration,
    /// A kick gives up once more than this many calls failed.
    pub max_retries: u32,
    pub simulate_stuck: bool,
}

impl Config {
    pub const fn production() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            kick_threshold: Duration::from_secs(605),
            step_delay: Duration::from_secs(10),
            max_retries: 3,
            simulate_stuck: false,
        }
    }

    pub const fn debug() -> Self {
        Self {
            sweep_interval: Duration::from_secs(15),
            kick_threshold: Duration::from_secs(60),
            ..Self::production()
        }
    }

    pub const fn for_timing(timing: Timing) -> Self {
        match timing {
            Timing::Production => Self::production(),
            Timing::Debug => Self::debug(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::production()
    }
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let mut config = Config::for_timing(args.timing);

        if let Some(secs) = args.sweep_interval_seconds {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = args.kick_threshold_seconds {
            config.kick_threshold = Duration::from_secs(secs);
        }
        if let Some(secs) = args.step_delay_seconds {
            config.step_delay = Duration::from_secs(secs);
        }
        if let Some(max_retries) = args.max_retries {
            config.max_retries = max_retries;
        }
        config.simulate_stuck = args.simulate_stuck;

        if config.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        let argv = std::iter::once("orb-modem-kick").chain(args.iter().copied());
        Config::try_from(Args::try_parse_from(argv).unwrap())
    }

    #[test]
    fn it_defaults_to_production_timings() {
        let config = parse(&[]).unwrap();
        assert_eq!(config, Config::production());
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.kick_threshold, Duration::from_secs(605));
        assert_eq!(config.step_delay, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert!(!config.simulate_stuck);
    }

    #[test]
    fn debug_timings_shorten_the_sweep() {
        let config = parse(&["--timing", "debug"]).unwrap();
        assert_eq!(config.sweep_interval, Duration::from_secs(15));
        assert_eq!(config.kick_threshold, Duration::from_secs(60));
        assert_eq!(config.step_delay, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn overrides_apply_on_top_of_the_profile() {
        let config = parse(&[
            "--timing",
            "debug",
            "--kick-threshold-seconds",
            "120",
            "--max-retries",
            "5",
            "--simulate-stuck",
        ])
        .unwrap();

        assert_eq!(config.sweep_interval, Duration::from_secs(15));
        assert_eq!(config.kick_threshold, Duration::from_secs(120));
        assert_eq!(config.max_retries, 5);
        assert!(config.simulate_stuck);
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        assert_eq!(
            parse(&["--sweep-interval-seconds", "0"]),
            Err(ConfigError::ZeroSweepInterval)
        );
    }

    #[test]
    fn unknown_timing_is_a_parse_error() {
        assert!(Args::try_parse_from(["orb-modem-kick", "--timing", "fast"]).is_err());
    }
}
