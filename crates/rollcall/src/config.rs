//! The `rollcalld` configuration file.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [sweep]
//! interval_ms = 1000
//! policy = "skip"                 # or "drop" to keep the original cadence
//!
//! [sessions]
//! rotation_secs = 30
//! grace_secs = 300
//! retention_secs = 86400
//! token_secret = "…64 hex chars…"   # omit for a random per-process secret
//!
//! [[principals]]
//! token = "registrar-token"
//! actor = "registrar"
//! role = "admin"
//!
//! [[principals]]
//! token = "ada-token"
//! actor = "ada"
//! role = "participant"
//! participant_id = 7
//!
//! [classes]
//! cs101 = [7, 8, 9]
//! ```
//!
//! Every section is optional and falls back to the defaults shown.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rollcall_clock::{SweepConfig, SweepPolicy};
use rollcall_protocol::ParticipantId;
use rollcall_session::{Roster, StaticRoster};
use rollcall_token::{HmacTokenGenerator, TokenError, TokenSecret};
use serde::Deserialize;

use crate::auth::{Principal, Role, StaticAuthenticator};
use crate::server::ServerConfig;

/// Why the configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Secret(#[from] TokenError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level file layout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RollcallConfig {
    pub server: ServerSection,
    pub sweep: SweepSection,
    pub sessions: SessionsSection,
    pub principals: Vec<PrincipalEntry>,
    /// Class reference → participant ids.
    pub classes: BTreeMap<String, Vec<u64>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: String,
    pub handshake_timeout_secs: u64,
    /// A connection that sends nothing for this long is dropped.
    pub idle_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            handshake_timeout_secs: 5,
            idle_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepSection {
    /// At least 10.
    pub interval_ms: u64,
    /// What a late sweep does with the sweeps it missed.
    pub policy: SweepPolicyName,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            policy: SweepPolicyName::Skip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepPolicyName {
    Skip,
    Drop,
}

impl From<SweepPolicyName> for SweepPolicy {
    fn from(name: SweepPolicyName) -> Self {
        match name {
            SweepPolicyName::Skip => SweepPolicy::Skip,
            SweepPolicyName::Drop => SweepPolicy::Drop,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionsSection {
    pub rotation_secs: u64,
    pub grace_secs: u64,
    /// How long an ended session stays queryable before eviction.
    pub retention_secs: u64,
    /// Hex-encoded HMAC key for scan tokens.
    pub token_secret: Option<String>,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            rotation_secs: 30,
            grace_secs: 300,
            retention_secs: 24 * 60 * 60,
            token_secret: None,
        }
    }
}

/// One `[[principals]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrincipalEntry {
    pub token: String,
    pub actor: String,
    pub role: RoleName,
    /// Required when `role = "participant"`.
    #[serde(default)]
    pub participant_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    Admin,
    Viewer,
    Participant,
}

impl PrincipalEntry {
    fn to_principal(&self) -> Result<Principal, ConfigError> {
        let role = match (self.role, self.participant_id) {
            (RoleName::Admin, _) => Role::Admin,
            (RoleName::Viewer, _) => Role::Viewer,
            (RoleName::Participant, Some(id)) => Role::Participant(ParticipantId(id)),
            (RoleName::Participant, None) => {
                return Err(ConfigError::Invalid(format!(
                    "principal {:?} has role participant but no participant_id",
                    self.actor
                )));
            }
        };
        Ok(Principal::new(self.actor.clone(), role))
    }
}

impl RollcallConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let min_ms = SweepConfig::MIN_INTERVAL.as_millis() as u64;
        if self.sweep.interval_ms < min_ms {
            return Err(ConfigError::Invalid(format!(
                "sweep.interval_ms must be at least {min_ms}"
            )));
        }
        if self.sessions.rotation_secs == 0 {
            return Err(ConfigError::Invalid(
                "sessions.rotation_secs must be positive".into(),
            ));
        }
        for entry in &self.principals {
            entry.to_principal()?;
        }
        Ok(())
    }

    /// Library-side server settings derived from this file.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.server.bind.clone(),
            sweep: SweepConfig {
                policy: self.sweep.policy.into(),
                ..SweepConfig::every(Duration::from_millis(self.sweep.interval_ms))
            },
            retention: Duration::from_secs(self.sessions.retention_secs),
            default_rotation: Duration::from_secs(self.sessions.rotation_secs),
            default_grace: Duration::from_secs(self.sessions.grace_secs),
            handshake_timeout: Duration::from_secs(self.server.handshake_timeout_secs),
            idle_timeout: Duration::from_secs(self.server.idle_timeout_secs),
        }
    }

    /// Builds the token table from `[[principals]]`.
    pub fn authenticator(&self) -> Result<StaticAuthenticator, ConfigError> {
        let mut auth = StaticAuthenticator::new();
        for entry in &self.principals {
            auth.insert(entry.token.clone(), entry.to_principal()?);
        }
        Ok(auth)
    }

    /// Builds the roster table from `[classes]`.
    pub fn rosters(&self) -> StaticRoster {
        let mut rosters = StaticRoster::new();
        for (class_ref, ids) in &self.classes {
            let roster: Roster = ids.iter().copied().map(ParticipantId).collect();
            rosters.insert(class_ref.clone(), roster);
        }
        rosters
    }

    /// The configured token key, or a fresh random one.
    pub fn token_generator(&self) -> Result<HmacTokenGenerator, ConfigError> {
        match &self.sessions.token_secret {
            Some(hex) => Ok(HmacTokenGenerator::new(TokenSecret::from_hex(hex)?)),
            None => Ok(HmacTokenGenerator::with_random_secret()),
        }
    }
}
