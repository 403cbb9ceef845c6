//! Signer and account addresses loaded from the environment.

use anyhow::{anyhow, Context, Result};
use perp_liquidator_chain::{AccountFetcher, Address};
use solana_sdk::signature::{Keypair, Signer};
use std::fmt;
use std::str::FromStr;

pub mod env {
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
    pub const LIQUIDATOR_MARGIN_ACCOUNT: &str = "LIQUIDATOR_MARGIN_ACCOUNT";
    pub const EXCHANGE_ADDRESS: &str = "EXCHANGE_ADDRESS";
    pub const EXCHANGE_ID: &str = "EXCHANGE_ID";
}

/// Exchange the liquidator operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeTarget {
    Address(Address),
    /// Exchange id, resolved to an address by the program bindings
    Id(u64),
}

impl ExchangeTarget {
    pub fn resolve<F: AccountFetcher + ?Sized>(&self, fetcher: &F) -> Address {
        match *self {
            Self::Address(address) => address,
            Self::Id(id) => fetcher.exchange_address(id),
        }
    }
}

/// Liquidator identity.
pub struct Credentials {
    pub signer: Keypair,
    /// Margin account credited with liquidation fees
    pub liquidator_margin_account: Address,
    pub exchange: ExchangeTarget,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("signer", &self.signer.pubkey())
            .field("liquidator_margin_account", &self.liquidator_margin_account)
            .field("exchange", &self.exchange)
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from `lookup` (variable name to value).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get_env = |name: &str| -> Result<String> {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("Missing env var: {}", name))
        };

        let signer = decode_keypair(&get_env(env::PRIVATE_KEY)?)?;
        let liquidator_margin_account = parse_address(
            env::LIQUIDATOR_MARGIN_ACCOUNT,
            &get_env(env::LIQUIDATOR_MARGIN_ACCOUNT)?,
        )?;

        let exchange = match get_env(env::EXCHANGE_ADDRESS) {
            Ok(raw) => ExchangeTarget::Address(parse_address(env::EXCHANGE_ADDRESS, &raw)?),
            Err(_) => {
                let id = match get_env(env::EXCHANGE_ID) {
                    Ok(raw) => raw
                        .trim()
                        .parse::<u64>()
                        .with_context(|| format!("Invalid value for {}: {raw:?}", env::EXCHANGE_ID))?,
                    Err(_) => 0,
                };
                ExchangeTarget::Id(id)
            }
        };

        Ok(Self {
            signer,
            liquidator_margin_account,
            exchange,
        })
    }
}

/// Decode a base58-encoded 64-byte keypair.
pub fn decode_keypair(encoded: &str) -> Result<Keypair> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .context("PRIVATE_KEY is not valid base58")?;
    Keypair::from_bytes(&bytes).map_err(|e| anyhow!("Invalid PRIVATE_KEY keypair: {e}"))
}

fn parse_address(name: &str, raw: &str) -> Result<Address> {
    Address::from_str(raw.trim()).map_err(|e| anyhow!("Invalid address for {}: {}", name, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::pubkey::Pubkey;
    use std::collections::HashMap;

    fn vars(extra: &[(&'static str, String)]) -> HashMap<&'static str, String> {
        let mut vars = HashMap::from([
            (env::PRIVATE_KEY, Keypair::new().to_base58_string()),
            (env::LIQUIDATOR_MARGIN_ACCOUNT, Pubkey::new_unique().to_string()),
        ]);
        vars.extend(extra.iter().cloned());
        vars
    }

    #[test]
    fn test_loads_with_default_exchange_id() {
        let vars = vars(&[]);
        let credentials = Credentials::from_lookup(|name| vars.get(name).cloned()).unwrap();

        assert_eq!(credentials.exchange, ExchangeTarget::Id(0));
        assert_eq!(credentials.signer.to_base58_string(), vars[env::PRIVATE_KEY]);
    }

    #[test]
    fn test_exchange_address_takes_precedence() {
        let exchange = Pubkey::new_unique();
        let vars = vars(&[
            (env::EXCHANGE_ADDRESS, exchange.to_string()),
            (env::EXCHANGE_ID, "4".to_string()),
        ]);
        let credentials = Credentials::from_lookup(|name| vars.get(name).cloned()).unwrap();
        assert_eq!(credentials.exchange, ExchangeTarget::Address(exchange));
    }

    #[test]
    fn test_missing_signer_is_error() {
        let mut vars = vars(&[]);
        vars.remove(env::PRIVATE_KEY);
        let err = Credentials::from_lookup(|name| vars.get(name).cloned()).unwrap_err();
        assert!(err.to_string().contains(env::PRIVATE_KEY));
    }

    #[test]
    fn test_invalid_keypair_rejected() {
        assert!(decode_keypair("not-base58-0OIl").is_err());
        assert!(decode_keypair(&bs58::encode([7u8; 10]).into_string()).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let vars = vars(&[]);
        let credentials = Credentials::from_lookup(|name| vars.get(name).cloned()).unwrap();
        let debug = format!("{credentials:?}");
        assert!(!debug.contains(&vars[env::PRIVATE_KEY]));
    }
}
