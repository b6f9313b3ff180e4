// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runtime configuration (§6).
//!
//! A handful of named knobs govern pool sizing, ring capacity, the
//! dispatcher's adaptive back-off, and which attestation/record-mode the
//! process runs in. Unlike a dynamic QoS store, every knob here is a fixed
//! field set at process start — there is no need for a `DashMap`-backed
//! open key space, so `Config` stays a plain struct with a builder.

use crate::error::{Error, Result};

/// Attestation mode (§4.5, §6). `None` is the null-attestation flow: both
/// sides transition straight to `READY`, and `ENCRYPTED` delivery on
/// `ENCLAVE <-> ENCLAVE` traffic is refused at send time because no key
/// derivation ever happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(rename_all = "lowercase"))]
pub enum AttestationMode {
    None,
    Attested,
}

/// Process-wide configuration, built once at startup and shared (by `Arc`)
/// across every per-thread `AMM`/`SMM` pair.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ring capacity in slots; must be a power of two (§4.1).
    pub ring_capacity: usize,
    /// Number of pre-allocated pool messages (§3).
    pub pool_slots: usize,
    /// Upper bound for any single message, header included (§3).
    pub max_msg_size: usize,
    /// Consecutive empty polls before the dispatcher's first sleep (§4.3).
    pub idle_threshold: u32,
    /// Initial/minimum back-off sleep, in microseconds.
    pub backoff_base_usec: u64,
    /// Back-off ceiling; `backoff_usec` doubles up to this bound.
    pub backoff_peak_usec: u64,
    /// Enables the responder attestation role (this instance can act as
    /// the trusted root that pushes group key bundles).
    pub trusted_root: bool,
    /// Activates `TPLog` writing on send/receive.
    pub record_mode: bool,
    pub attestation_mode: AttestationMode,
}

impl Config {
    pub const DEFAULT_RING_CAPACITY: usize = 1 << 20;
    pub const DEFAULT_POOL_SLOTS: usize = 4096;
    pub const DEFAULT_MAX_MSG_SIZE: usize = 1 << 20;
    pub const DEFAULT_IDLE_THRESHOLD: u32 = 10_000;
    pub const DEFAULT_BACKOFF_BASE_USEC: u64 = 1;
    pub const DEFAULT_BACKOFF_PEAK_USEC: u64 = 10_000;

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Override any knob from environment variables of the form
    /// `DIGGI_<FIELD>` (e.g. `DIGGI_POOL_SLOTS=8192`), falling back to
    /// `base` for anything unset or unparsable.
    pub fn from_env(base: Config) -> Config {
        let mut cfg = base;
        if let Some(v) = env_usize("DIGGI_RING_CAPACITY") {
            cfg.ring_capacity = v;
        }
        if let Some(v) = env_usize("DIGGI_POOL_SLOTS") {
            cfg.pool_slots = v;
        }
        if let Some(v) = env_usize("DIGGI_MAX_MSG_SIZE") {
            cfg.max_msg_size = v;
        }
        if let Ok(v) = std::env::var("DIGGI_IDLE_THRESHOLD") {
            if let Ok(v) = v.parse() {
                cfg.idle_threshold = v;
            }
        }
        if let Ok(v) = std::env::var("DIGGI_TRUSTED_ROOT") {
            cfg.trusted_root = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("DIGGI_RECORD_MODE") {
            cfg.record_mode = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("DIGGI_ATTESTATION_MODE") {
            cfg.attestation_mode = if v.eq_ignore_ascii_case("attested") {
                AttestationMode::Attested
            } else {
                AttestationMode::None
            };
        }
        cfg
    }

    /// Layer a JSON file-backed override profile on top of `base`, behind
    /// the `config-file` feature. Only fields actually present in the
    /// file override `base`; everything else passes through unchanged.
    #[cfg(feature = "config-file")]
    pub fn from_file(base: Config, path: impl AsRef<std::path::Path>) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        let overrides: ConfigOverrides = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid config file: {e}")))?;
        Ok(overrides.apply(base))
    }

    fn validate(&self) -> Result<()> {
        if !self.ring_capacity.is_power_of_two() {
            return Err(Error::Config(format!(
                "ring_capacity {} is not a power of two",
                self.ring_capacity
            )));
        }
        if self.pool_slots == 0 {
            return Err(Error::Config("pool_slots must be nonzero".into()));
        }
        if self.max_msg_size < crate::msg::HEADER_LEN {
            return Err(Error::Config(format!(
                "max_msg_size {} smaller than header length {}",
                self.max_msg_size,
                crate::msg::HEADER_LEN
            )));
        }
        if self.backoff_base_usec == 0 || self.backoff_base_usec > self.backoff_peak_usec {
            return Err(Error::Config(
                "backoff_base_usec must be nonzero and <= backoff_peak_usec".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ring_capacity: Self::DEFAULT_RING_CAPACITY,
            pool_slots: Self::DEFAULT_POOL_SLOTS,
            max_msg_size: Self::DEFAULT_MAX_MSG_SIZE,
            idle_threshold: Self::DEFAULT_IDLE_THRESHOLD,
            backoff_base_usec: Self::DEFAULT_BACKOFF_BASE_USEC,
            backoff_peak_usec: Self::DEFAULT_BACKOFF_PEAK_USEC,
            trusted_root: false,
            record_mode: false,
            attestation_mode: AttestationMode::None,
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Sparse JSON override document for [`Config::from_file`]: every field
/// is optional so a profile only needs to name the knobs it changes.
#[cfg(feature = "config-file")]
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
struct ConfigOverrides {
    ring_capacity: Option<usize>,
    pool_slots: Option<usize>,
    max_msg_size: Option<usize>,
    idle_threshold: Option<u32>,
    backoff_base_usec: Option<u64>,
    backoff_peak_usec: Option<u64>,
    trusted_root: Option<bool>,
    record_mode: Option<bool>,
    attestation_mode: Option<AttestationMode>,
}

#[cfg(feature = "config-file")]
impl ConfigOverrides {
    fn apply(self, mut cfg: Config) -> Config {
        if let Some(v) = self.ring_capacity {
            cfg.ring_capacity = v;
        }
        if let Some(v) = self.pool_slots {
            cfg.pool_slots = v;
        }
        if let Some(v) = self.max_msg_size {
            cfg.max_msg_size = v;
        }
        if let Some(v) = self.idle_threshold {
            cfg.idle_threshold = v;
        }
        if let Some(v) = self.backoff_base_usec {
            cfg.backoff_base_usec = v;
        }
        if let Some(v) = self.backoff_peak_usec {
            cfg.backoff_peak_usec = v;
        }
        if let Some(v) = self.trusted_root {
            cfg.trusted_root = v;
        }
        if let Some(v) = self.record_mode {
            cfg.record_mode = v;
        }
        if let Some(v) = self.attestation_mode {
            cfg.attestation_mode = v;
        }
        cfg
    }
}

/// Builder for [`Config`]; validates on [`ConfigBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    cfg: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: Config::default(),
        }
    }

    pub fn ring_capacity(mut self, v: usize) -> Self {
        self.cfg.ring_capacity = v;
        self
    }

    pub fn pool_slots(mut self, v: usize) -> Self {
        self.cfg.pool_slots = v;
        self
    }

    pub fn max_msg_size(mut self, v: usize) -> Self {
        self.cfg.max_msg_size = v;
        self
    }

    pub fn idle_threshold(mut self, v: u32) -> Self {
        self.cfg.idle_threshold = v;
        self
    }

    pub fn backoff_usec(mut self, base: u64, peak: u64) -> Self {
        self.cfg.backoff_base_usec = base;
        self.cfg.backoff_peak_usec = peak;
        self
    }

    pub fn trusted_root(mut self, v: bool) -> Self {
        self.cfg.trusted_root = v;
        self
    }

    pub fn record_mode(mut self, v: bool) -> Self {
        self.cfg.record_mode = v;
        self
    }

    pub fn attestation_mode(mut self, v: AttestationMode) -> Self {
        self.cfg.attestation_mode = v;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
