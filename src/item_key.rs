use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const PREFIX: &str = "item:";

//////////////////////////////////////////////// ItemKey ///////////////////////////////////////////////

/// The opaque identity of one field-array item.
///
/// A key is minted when an item is inserted and never reassigned while that item
/// exists, no matter how its siblings move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey([u8; 16]);

impl ItemKey {
    /// Creates a key from raw bytes.
    pub fn new(bytes: [u8; 16]) -> Self {
        ItemKey(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Mints keys that are unique within a session and, through the random seed,
/// distinct across sessions.
#[derive(Debug)]
pub(crate) struct KeyMinter {
    seed: u64,
    counter: u64,
}

impl KeyMinter {
    pub(crate) fn new() -> Self {
        KeyMinter {
            seed: rand::random(),
            counter: 0,
        }
    }

    pub(crate) fn mint(&mut self) -> ItemKey {
        self.counter += 1;
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.seed.to_be_bytes());
        bytes[8..].copy_from_slice(&self.counter.to_be_bytes());
        ItemKey(bytes)
    }
}

////////////////////////////////////// URL-Safe Base64 Encoding //////////////////////////////////////

const BASE64_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

fn encode_base64_url_safe(input: &[u8]) -> String {
    let mut result = String::new();
    for chunk in input.chunks(3) {
        let b1 = chunk[0];
        let b2 = chunk.get(1).copied().unwrap_or(0);
        let b3 = chunk.get(2).copied().unwrap_or(0);
        let combined = ((b1 as u32) << 16) | ((b2 as u32) << 8) | (b3 as u32);

        result.push(BASE64_CHARS[((combined >> 18) & 0x3F) as usize] as char);
        result.push(BASE64_CHARS[((combined >> 12) & 0x3F) as usize] as char);
        if chunk.len() > 1 {
            result.push(BASE64_CHARS[((combined >> 6) & 0x3F) as usize] as char);
        }
        if chunk.len() > 2 {
            result.push(BASE64_CHARS[(combined & 0x3F) as usize] as char);
        }
    }
    result
}

fn decode_base64_url_safe(input: &str) -> Result<Vec<u8>, ItemKeyParseError> {
    let values = input
        .chars()
        .map(char_to_base64_value)
        .collect::<Result<Vec<u32>, _>>()?;

    let mut result = Vec::new();
    for chunk in values.chunks(4) {
        if chunk.len() < 2 {
            return Err(ItemKeyParseError::InvalidBase64);
        }
        let combined = chunk
            .iter()
            .chain(std::iter::repeat(&0))
            .take(4)
            .fold(0u32, |acc, v| (acc << 6) | v);
        result.push((combined >> 16) as u8);
        if chunk.len() > 2 {
            result.push((combined >> 8) as u8);
        }
        if chunk.len() > 3 {
            result.push(combined as u8);
        }
    }
    Ok(result)
}

fn char_to_base64_value(c: char) -> Result<u32, ItemKeyParseError> {
    match c {
        'A'..='Z' => Ok((c as u32) - ('A' as u32)),
        'a'..='z' => Ok((c as u32) - ('a' as u32) + 26),
        '0'..='9' => Ok((c as u32) - ('0' as u32) + 52),
        '-' => Ok(62),
        '_' => Ok(63),
        _ => Err(ItemKeyParseError::InvalidBase64),
    }
}

/////////////////////////////////////////// Display and FromStr ///////////////////////////////////////

impl Display for ItemKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}{}", PREFIX, encode_base64_url_safe(&self.0))
    }
}

/// Error returned when parsing an [`ItemKey`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ItemKeyParseError {
    /// The text does not start with `item:`.
    #[error("item keys start with \"item:\"")]
    InvalidPrefix,
    /// The encoded part is not URL-safe base64.
    #[error("item key is not URL-safe base64")]
    InvalidBase64,
    /// The encoded part does not hold 16 bytes.
    #[error("item key must encode 16 bytes")]
    InvalidLength,
}

impl FromStr for ItemKey {
    type Err = ItemKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s
            .strip_prefix(PREFIX)
            .ok_or(ItemKeyParseError::InvalidPrefix)?;
        let bytes = decode_base64_url_safe(encoded)?;
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|_| ItemKeyParseError::InvalidLength)?;
        Ok(ItemKey(bytes))
    }
}
