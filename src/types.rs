use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Price as a fixed-point integer (cents).
pub type Price = u64;

/// Quantity of shares.
pub type Quantity = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn label(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Side {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(EngineError::InvalidSide(other.to_string())),
        }
    }
}

/// Display adapter rendering a fixed-point price as dollars.
pub struct Dollars(pub Price);

impl fmt::Display for Dollars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Input errors raised at the engine boundary. Orders failing these
/// checks never touch a book.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(Quantity),

    #[error("price must be positive, got {0}")]
    InvalidPrice(Price),

    #[error("order side must be 'BUY' or 'SELL', got '{0}'")]
    InvalidSide(String),
}
