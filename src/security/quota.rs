//! Quota classes and their window/count pairs.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{TierConfig, TiersConfig};

/// Request class, each with its own quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaClass {
    /// Sign-in, sign-up and password flows.
    Auth,
    /// Authenticated API calls.
    Api,
    /// Everything else.
    Public,
}

impl QuotaClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaClass::Auth => "auth",
            QuotaClass::Api => "api",
            QuotaClass::Public => "public",
        }
    }
}

impl fmt::Display for QuotaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `limit` requests per sliding `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub window: Duration,
}

impl Quota {
    pub fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

impl From<TierConfig> for Quota {
    fn from(tier: TierConfig) -> Self {
        Self {
            limit: tier.requests,
            window: Duration::from_secs(tier.window_secs),
        }
    }
}

/// Resolved quota for every class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaTable {
    auth: Quota,
    api: Quota,
    public: Quota,
}

impl QuotaTable {
    pub fn from_config(tiers: &TiersConfig) -> Self {
        Self {
            auth: tiers.auth.into(),
            api: tiers.api.into(),
            public: tiers.public.into(),
        }
    }

    pub fn get(&self, class: QuotaClass) -> Quota {
        match class {
            QuotaClass::Auth => self.auth,
            QuotaClass::Api => self.api,
            QuotaClass::Public => self.public,
        }
    }
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self {
            auth: Quota::per_minute(5),
            api: Quota::per_minute(60),
            public: Quota::per_minute(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = QuotaTable::default();
        assert_eq!(table.get(QuotaClass::Auth), Quota::per_minute(5));
        assert_eq!(table.get(QuotaClass::Api), Quota::per_minute(60));
        assert_eq!(table.get(QuotaClass::Public), Quota::per_minute(100));
    }

    #[test]
    fn test_table_matches_default_config() {
        assert_eq!(QuotaTable::from_config(&TiersConfig::default()), QuotaTable::default());
    }

    #[test]
    fn test_class_names() {
        assert_eq!(QuotaClass::Auth.to_string(), "auth");
        let parsed: QuotaClass = serde_json::from_str("\"public\"").unwrap();
        assert_eq!(parsed, QuotaClass::Public);
    }
}
