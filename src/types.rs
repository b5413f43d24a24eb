//! Identifier and amount types shared by the ledger, the registry and the settlement services.
//!
//! Every identifier that crosses the ledger/registry boundary is parsed once into one of these types,
//! so the rest of the crate never handles an unchecked wallet string or a floating point price.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::utils::format_token_amount;

/// Number of decimal places of the ledger's native currency.
pub const NATIVE_DECIMALS: u32 = 18;

/// One whole native unit expressed in the smallest unit.
pub const NATIVE_UNIT: u128 = 1_000_000_000_000_000_000;

/// Rejected identifier or amount input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {reason}")]
pub struct ParseIdError {
	pub kind: &'static str,
	pub reason: String,
}

impl ParseIdError {
	fn new(kind: &'static str, reason: impl Into<String>) -> Self {
		Self {
			kind,
			reason: reason.into(),
		}
	}
}

fn check_hex_prefixed(
	kind: &'static str,
	value: &str,
	hex_len: usize,
) -> Result<String, ParseIdError> {
	let trimmed = value.trim();
	let body = trimmed
		.strip_prefix("0x")
		.or_else(|| trimmed.strip_prefix("0X"))
		.ok_or_else(|| ParseIdError::new(kind, format!("'{}' is missing the 0x prefix", value)))?;

	if body.len() != hex_len {
		return Err(ParseIdError::new(
			kind,
			format!("expected {} hex characters, got {}", hex_len, body.len()),
		));
	}

	hex::decode(body).map_err(|e| ParseIdError::new(kind, format!("'{}': {}", value, e)))?;

	Ok(format!("0x{}", body.to_ascii_lowercase()))
}

/// Wallet address, the identity key on both the ledger and the registry.
///
/// Stored lowercase so that checksummed and plain spellings of the same address compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
	pub fn parse(value: &str) -> Result<Self, ParseIdError> {
		check_hex_prefixed("wallet address", value, 40).map(Self)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl FromStr for WalletAddress {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for WalletAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for WalletAddress {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		Self::parse(&raw).map_err(serde::de::Error::custom)
	}
}

/// Registry item identifier. Opaque to the ledger, which stores it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
	pub fn parse(value: &str) -> Result<Self, ParseIdError> {
		let trimmed = value.trim();
		if trimmed.is_empty() {
			return Err(ParseIdError::new("item id", "must not be empty"));
		}
		Ok(Self(trimmed.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl FromStr for ItemId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for ItemId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for ItemId {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		Self::parse(&raw).map_err(serde::de::Error::custom)
	}
}

/// Ledger transaction hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
	pub fn parse(value: &str) -> Result<Self, ParseIdError> {
		check_hex_prefixed("transaction hash", value, 64).map(Self)
	}

	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		Self(format!("0x{}", hex::encode(bytes)))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl FromStr for TxHash {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for TxHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for TxHash {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		Self::parse(&raw).map_err(serde::de::Error::custom)
	}
}

/// Ledger-assigned exchange request id. Monotonic, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(pub u64);

impl fmt::Display for ExchangeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// US dollar amount in whole cents. Non-negative by construction.
#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Usd(u64);

impl Usd {
	pub const fn from_cents(cents: u64) -> Self {
		Self(cents)
	}

	pub const fn from_dollars(dollars: u64) -> Self {
		Self(dollars * 100)
	}

	/// Convert a decimal dollar figure, rounding to the nearest cent.
	pub fn from_decimal(dollars: f64) -> Result<Self, ParseIdError> {
		if !dollars.is_finite() || dollars < 0.0 {
			return Err(ParseIdError::new(
				"usd amount",
				format!("{} is not a non-negative amount", dollars),
			));
		}
		Ok(Self((dollars * 100.0).round() as u64))
	}

	pub const fn cents(&self) -> u64 {
		self.0
	}
}

impl FromStr for Usd {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let value: f64 = s
			.trim()
			.trim_start_matches('$')
			.parse()
			.map_err(|e| ParseIdError::new("usd amount", format!("'{}': {}", s, e)))?;
		Self::from_decimal(value)
	}
}

impl fmt::Display for Usd {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
	}
}

/// Amount of the ledger's native currency in its smallest unit.
///
/// Serialized as a decimal string since JSON numbers cannot carry the full range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeAmount(u128);

impl NativeAmount {
	pub const ZERO: NativeAmount = NativeAmount(0);

	pub const fn from_base_units(units: u128) -> Self {
		Self(units)
	}

	pub const fn base_units(&self) -> u128 {
		self.0
	}

	pub fn is_zero(&self) -> bool {
		self.0 == 0
	}

	pub fn checked_sub(self, other: NativeAmount) -> Option<NativeAmount> {
		self.0.checked_sub(other.0).map(NativeAmount)
	}

	pub fn saturating_add(self, other: NativeAmount) -> NativeAmount {
		NativeAmount(self.0.saturating_add(other.0))
	}
}

impl FromStr for NativeAmount {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.trim()
			.parse::<u128>()
			.map(NativeAmount)
			.map_err(|e| ParseIdError::new("native amount", format!("'{}': {}", s, e)))
	}
}

impl fmt::Display for NativeAmount {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&format_token_amount(self.0, NATIVE_DECIMALS))
	}
}

impl Serialize for NativeAmount {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for NativeAmount {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		#[derive(Deserialize)]
		#[serde(untagged)]
		enum Repr {
			Text(String),
			Number(u64),
		}

		match Repr::deserialize(deserializer)? {
			Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
			Repr::Number(n) => Ok(NativeAmount(n as u128)),
		}
	}
}
