use std::time::Duration;

use crate::Error;

/// Multiplexer and engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pre_shared_keys: bool,
    flight_start_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            pre_shared_keys: false,
            flight_start_rto: Duration::from_secs(1),
            flight_retries: 4,
            handshake_timeout: Duration::from_secs(40),
            rng_seed: None,
        }
    }

    /// Authenticate with a pre-shared key instead of certificates.
    ///
    /// Both ends of a connection must agree on this.
    #[inline(always)]
    pub fn pre_shared_keys(&self) -> bool {
        self.pre_shared_keys
    }

    /// Time of first retry.
    ///
    /// Every flight restarts with this value.
    /// Doubled for every retry with a ±25% jitter.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Max number of retries per flight.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Timeout for the entire handshake, regardless of flights.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Seed for the session random number generator.
    ///
    /// Only for tests. A seeded session reuses randoms and key shares.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    pre_shared_keys: bool,
    flight_start_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Authenticate with a pre-shared key instead of certificates.
    ///
    /// Defaults to false.
    pub fn pre_shared_keys(mut self, enabled: bool) -> Self {
        self.pre_shared_keys = enabled;
        self
    }

    /// Set the time of first retry.
    ///
    /// Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set the max number of retries per flight.
    ///
    /// Defaults to 4.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Set the timeout for the entire handshake, regardless of flights.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Seed the session random number generator.
    ///
    /// Defaults to `None`, i.e. OS entropy.
    pub fn rng_seed(mut self, seed: Option<u64>) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::Config` if the timers are inconsistent.
    pub fn build(self) -> Result<Config, Error> {
        if self.flight_start_rto.is_zero() {
            return Err(Error::Config("flight_start_rto must be above zero".into()));
        }

        if self.handshake_timeout < self.flight_start_rto {
            return Err(Error::Config(format!(
                "handshake_timeout {:?} is shorter than flight_start_rto {:?}",
                self.handshake_timeout, self.flight_start_rto
            )));
        }

        Ok(self.finish())
    }

    fn finish(self) -> Config {
        Config {
            pre_shared_keys: self.pre_shared_keys,
            flight_start_rto: self.flight_start_rto,
            flight_retries: self.flight_retries,
            handshake_timeout: self.handshake_timeout,
            rng_seed: self.rng_seed,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        // The builder defaults are always valid.
        Config::builder().finish()
    }
}
