//! Delta records and the numeric types they carry

use crate::error::{LedgerError, Result};
use fixed::types::I64F64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic fixed-point quantity. Sums of `Amount`s are exact, so a
/// fold over deltas gives the same bits in any order; see [`Tally`].
pub type Amount = I64F64;

/// Object type of every delta composite key.
pub const DELTA_INDEX: &str = "varName~op~value~txID";
/// Object type of the key holding the last issued delta sequence number.
pub const SEQUENCE_KEY_TYPE: &str = "delta~seq";
/// Sequence numbers are zero-padded so their text sorts numerically.
pub const SEQUENCE_WIDTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sign {
    Increase,
    Decrease,
}

impl Sign {
    pub fn symbol(&self) -> &'static str {
        match self {
            Sign::Increase => "+",
            Sign::Decrease => "-",
        }
    }

    pub fn from_symbol(symbol: &str) -> Result<Self> {
        match symbol {
            "+" => Ok(Sign::Increase),
            "-" => Ok(Sign::Decrease),
            other => Err(LedgerError::Store(format!(
                "Unrecognized operation {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Running sum of a base value and signed deltas.
///
/// Steps wrap modulo 2^128 and the net number of wraps is counted, so an
/// intermediate value may leave the `Amount` range as long as the final sum
/// is back inside it. The result does not depend on the order of the steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    total: Amount,
    wraps: i64,
}

impl Tally {
    pub fn new(base: Amount) -> Self {
        Self {
            total: base,
            wraps: 0,
        }
    }

    pub fn apply(&mut self, sign: Sign, magnitude: Amount) {
        let (next, wrapped) = match sign {
            Sign::Increase => self.total.overflowing_add(magnitude),
            Sign::Decrease => self.total.overflowing_sub(magnitude),
        };
        if wrapped {
            let upward = (sign == Sign::Increase) == (magnitude > Amount::ZERO);
            self.wraps += if upward { 1 } else { -1 };
        }
        self.total = next;
    }

    pub fn finish(self) -> Result<Amount> {
        if self.wraps != 0 {
            return Err(LedgerError::Validation("total is out of range".to_string()));
        }
        Ok(self.total)
    }
}

/// Selects how delta composite keys are laid out in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyLayout {
    /// `name, sign, magnitude, txID, sequence`: every append is a distinct key.
    /// Sequence numbers come from a store-wide counter that is read and
    /// bumped in the same write section as the deltas.
    #[default]
    Sequenced,
    /// `name, sign, magnitude, txID`: identical deltas within one
    /// transaction share a key and collapse into one record.
    Legacy,
}

/// A validated delta magnitude and its canonical text form. A negative
/// magnitude moves value against the direction of its sign.
#[derive(Debug, Clone, PartialEq)]
pub struct Magnitude {
    value: Amount,
    text: String,
}

impl Magnitude {
    pub fn parse(text: &str) -> Result<Self> {
        let value = parse_amount(text)?;
        Ok(Self {
            value,
            text: format_amount(value),
        })
    }

    pub fn value(&self) -> Amount {
        self.value
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Magnitude {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// One journal entry, decoded from its composite key.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRecord {
    pub name: String,
    pub sign: Sign,
    pub magnitude: Magnitude,
    pub tx_id: String,
    /// Present for keys written with [`KeyLayout::Sequenced`].
    pub sequence: Option<u64>,
}

impl DeltaRecord {
    /// Builds a record from the attributes of a delta composite key.
    pub fn from_key_attributes(attributes: &[String]) -> Result<Self> {
        let (name, sign, value, tx_id, sequence) = match attributes {
            [name, sign, value, tx_id] => (name, sign, value, tx_id, None),
            [name, sign, value, tx_id, seq] => {
                let seq = seq.parse::<u64>().map_err(|e| {
                    LedgerError::Store(format!("Invalid delta sequence {}: {}", seq, e))
                })?;
                (name, sign, value, tx_id, Some(seq))
            }
            _ => {
                return Err(LedgerError::Store(format!(
                    "Delta key has {} attributes, expected 4 or 5",
                    attributes.len()
                )))
            }
        };

        let magnitude = Magnitude::parse(value).map_err(|e| {
            LedgerError::Store(format!("Invalid stored magnitude {}: {}", value, e))
        })?;

        Ok(Self {
            name: name.clone(),
            sign: Sign::from_symbol(sign)?,
            magnitude,
            tx_id: tx_id.clone(),
            sequence,
        })
    }

    /// The delta as a single signed amount, or `None` if negating the
    /// magnitude leaves the `Amount` range.
    pub fn signed_value(&self) -> Option<Amount> {
        match self.sign {
            Sign::Increase => Some(self.magnitude.value()),
            Sign::Decrease => self.magnitude.value().checked_neg(),
        }
    }
}

pub fn encode_sequence(sequence: u64) -> String {
    format!("{:0width$}", sequence, width = SEQUENCE_WIDTH)
}

/// Parses decimal text straight into an `Amount`. Accepts an optional sign
/// and an optional `e` exponent; the value is rounded to the nearest
/// representable `Amount`.
pub fn parse_amount(text: &str) -> Result<Amount> {
    match Amount::overflowing_from_str(text.trim()) {
        Ok((value, false)) => Ok(value),
        Ok((_, true)) => Err(LedgerError::Validation(format!(
            "Value {} is out of range",
            text
        ))),
        Err(e) => Err(LedgerError::Validation(format!(
            "Provided value was not a number: {} ({})",
            text, e
        ))),
    }
}

/// Shortest decimal text that parses back to the same `Amount`.
pub fn format_amount(amount: Amount) -> String {
    amount.to_string()
}
