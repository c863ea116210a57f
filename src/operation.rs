//! Caller-facing operation surface
//!
//! Requests arrive as a function name plus a list of string arguments. They
//! are parsed into an [`Operation`] and dispatched by [`Router`], which turns
//! every outcome into a [`Response`].

use crate::delta::format_amount;
use crate::engine::AccountingEngine;
use crate::error::{ErrorKind, LedgerError, Result};
use crate::store::KvStore;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Initialize {
        name_a: String,
        magnitude_a: String,
        name_b: String,
        magnitude_b: String,
    },
    Transfer {
        from: String,
        to: String,
        magnitude: String,
    },
    ComputeTotal {
        name: String,
    },
    RawPut {
        name: String,
        value: String,
    },
    RawGet {
        name: String,
    },
}

fn expect_args<A: AsRef<str>>(function: &str, args: &[A], expected: usize) -> Result<Vec<String>> {
    if args.len() != expected {
        return Err(LedgerError::Validation(format!(
            "Incorrect number of arguments for {}. Expecting {}, got {}",
            function,
            expected,
            args.len()
        )));
    }
    Ok(args.iter().map(|a| a.as_ref().to_string()).collect())
}

impl Operation {
    /// Parses a function name and its arguments.
    ///
    /// Accepted names: `init`/`initialize` (name, amount, name, amount),
    /// `invoke`/`transfer` (from, to, amount), `query` (name),
    /// `put` (name, value) and `get` (name).
    pub fn parse<A: AsRef<str>>(function: &str, args: &[A]) -> Result<Self> {
        match function {
            "init" | "initialize" => {
                let mut a = expect_args(function, args, 4)?.into_iter();
                Ok(Operation::Initialize {
                    name_a: a.next().unwrap_or_default(),
                    magnitude_a: a.next().unwrap_or_default(),
                    name_b: a.next().unwrap_or_default(),
                    magnitude_b: a.next().unwrap_or_default(),
                })
            }
            "invoke" | "transfer" => {
                let mut a = expect_args(function, args, 3)?.into_iter();
                Ok(Operation::Transfer {
                    from: a.next().unwrap_or_default(),
                    to: a.next().unwrap_or_default(),
                    magnitude: a.next().unwrap_or_default(),
                })
            }
            "query" => {
                let mut a = expect_args(function, args, 1)?.into_iter();
                Ok(Operation::ComputeTotal {
                    name: a.next().unwrap_or_default(),
                })
            }
            "put" => {
                let mut a = expect_args(function, args, 2)?.into_iter();
                Ok(Operation::RawPut {
                    name: a.next().unwrap_or_default(),
                    value: a.next().unwrap_or_default(),
                })
            }
            "get" => {
                let mut a = expect_args(function, args, 1)?.into_iter();
                Ok(Operation::RawGet {
                    name: a.next().unwrap_or_default(),
                })
            }
            other => Err(LedgerError::Validation(format!(
                "Invalid function name {:?}. Expecting \"init\", \"invoke\", \"query\", \"put\" or \"get\"",
                other
            ))),
        }
    }

    pub fn function_name(&self) -> &'static str {
        match self {
            Operation::Initialize { .. } => "init",
            Operation::Transfer { .. } => "invoke",
            Operation::ComputeTotal { .. } => "query",
            Operation::RawPut { .. } => "put",
            Operation::RawGet { .. } => "get",
        }
    }
}

/// Per-request context supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxContext {
    tx_id: String,
}

impl TxContext {
    pub fn new(tx_id: impl Into<String>) -> Self {
        Self {
            tx_id: tx_id.into(),
        }
    }

    /// A fresh transaction id: hex SHA-256 over random nonce bytes and the
    /// current time.
    pub fn generate() -> Self {
        let mut nonce = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut hasher = Sha256::new();
        hasher.update(nonce);
        hasher.update(
            chrono::Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_be_bytes(),
        );
        Self::new(hex::encode(hasher.finalize()))
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: Status,
    #[serde(serialize_with = "serialize_payload")]
    pub payload: Vec<u8>,
    pub message: String,
    #[serde(skip)]
    pub error_kind: Option<ErrorKind>,
}

fn serialize_payload<S: serde::Serializer>(
    payload: &[u8],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(payload))
}

impl Response {
    pub fn success(payload: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            payload,
            message: String::new(),
            error_kind: None,
        }
    }

    pub fn error(err: &LedgerError) -> Self {
        Self {
            status: Status::Error,
            payload: Vec::new(),
            message: err.to_string(),
            error_kind: Some(err.kind()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

pub struct Router<S: KvStore> {
    engine: AccountingEngine<S>,
}

impl<S: KvStore> Router<S> {
    pub fn new(engine: AccountingEngine<S>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &AccountingEngine<S> {
        &self.engine
    }

    pub fn dispatch(&self, operation: &Operation, ctx: &TxContext) -> Result<Vec<u8>> {
        debug!(function = operation.function_name(), tx_id = ctx.tx_id(), "dispatching");
        match operation {
            Operation::Initialize {
                name_a,
                magnitude_a,
                name_b,
                magnitude_b,
            } => {
                self.engine
                    .initialize(name_a, magnitude_a, name_b, magnitude_b)?;
                Ok(Vec::new())
            }
            Operation::Transfer {
                from,
                to,
                magnitude,
            } => {
                let message = self
                    .engine
                    .apply_transfer(from, to, magnitude, ctx.tx_id())?;
                Ok(message.into_bytes())
            }
            Operation::ComputeTotal { name } => {
                let total = self.engine.compute_total(name)?;
                Ok(format_amount(total).into_bytes())
            }
            Operation::RawPut { name, value } => {
                self.engine.raw_put(name, value)?;
                Ok(Vec::new())
            }
            Operation::RawGet { name } => self.engine.raw_get(name),
        }
    }

    pub fn handle<A: AsRef<str>>(&self, function: &str, args: &[A], ctx: &TxContext) -> Response {
        match Operation::parse(function, args).and_then(|op| self.dispatch(&op, ctx)) {
            Ok(payload) => Response::success(payload),
            Err(e) => Response::error(&e),
        }
    }
}
