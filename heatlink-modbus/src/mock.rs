//! In-memory register transport for testing and dry runs.
//!
//! [`RecordingTransport`] records every successful transaction in order and
//! applies the same codec as the serial transport, so out-of-range values are
//! rejected the same way. Failures and float reads can be scripted.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;

use crate::transport::{
    RegisterTransport, TransportError, float_to_words, long_to_words, register_to_word,
};

/// A transaction issued through the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Transaction {
    ReadFloat {
        register: u16,
        decimals: u8,
        slave: u8,
    },
    WriteFloat {
        register: u16,
        value: f64,
        decimals: u8,
        slave: u8,
    },
    WriteRegister {
        register: u16,
        value: i32,
        decimals: u8,
        bits: u8,
        signed: bool,
        slave: u8,
    },
    WriteLong {
        register: u16,
        value: i64,
        signed: bool,
        slave: u8,
    },
}

impl Transaction {
    /// Register addressed by this transaction.
    pub fn register(&self) -> u16 {
        match self {
            Transaction::ReadFloat { register, .. }
            | Transaction::WriteFloat { register, .. }
            | Transaction::WriteRegister { register, .. }
            | Transaction::WriteLong { register, .. } => *register,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Transaction::ReadFloat { .. })
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transaction::ReadFloat {
                register,
                decimals,
                slave,
            } => write!(f, "slave {} read f32({}) @ {}", slave, decimals, register),
            Transaction::WriteFloat {
                register,
                value,
                decimals,
                slave,
            } => write!(
                f,
                "slave {} write f32({}) @ {} = {}",
                slave, decimals, register, value
            ),
            Transaction::WriteRegister {
                register,
                value,
                signed,
                slave,
                ..
            } => {
                let kind = if *signed { "i16" } else { "u16" };
                write!(f, "slave {} write {} @ {} = {}", slave, kind, register, value)
            }
            Transaction::WriteLong {
                register,
                value,
                signed,
                slave,
            } => {
                let kind = if *signed { "i32" } else { "u32" };
                write!(f, "slave {} write {} @ {} = {}", slave, kind, register, value)
            }
        }
    }
}

/// Register transport that records transactions instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    transactions: Vec<Transaction>,
    float_reads: HashMap<u16, VecDeque<f64>>,
    default_read: Option<f64>,
    fail_at: Option<usize>,
    attempts: usize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport answering every float read without a queued value with
    /// `value`, as used by dry runs.
    pub fn answering(value: f64) -> Self {
        Self {
            default_read: Some(value),
            ..Self::default()
        }
    }

    /// Queue a value returned by the next float read of `register`.
    pub fn push_float_read(&mut self, register: u16, value: f64) {
        self.float_reads.entry(register).or_default().push_back(value);
    }

    /// Fail the transaction with the given zero-based index.
    pub fn fail_at(&mut self, index: usize) {
        self.fail_at = Some(index);
    }

    /// Successful transactions, in issue order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Successful write transactions, in issue order.
    pub fn writes(&self) -> Vec<&Transaction> {
        self.transactions.iter().filter(|t| t.is_write()).collect()
    }

    /// Number of transactions attempted, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
    }

    fn begin(&mut self, register: u16) -> Result<(), TransportError> {
        let index = self.attempts;
        self.attempts += 1;
        if self.fail_at == Some(index) {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("scripted failure of transaction {} (register {})", index, register),
            )));
        }
        Ok(())
    }
}

impl RegisterTransport for RecordingTransport {
    fn read_holding_as_float(
        &mut self,
        register: u16,
        decimals: u8,
        slave: u8,
    ) -> Result<f64, TransportError> {
        self.begin(register)?;
        let value = self
            .float_reads
            .get_mut(&register)
            .and_then(VecDeque::pop_front)
            .or(self.default_read)
            .ok_or_else(|| {
                TransportError::Decode(format!("no scripted reading for register {}", register))
            })?;

        self.transactions.push(Transaction::ReadFloat {
            register,
            decimals,
            slave,
        });
        Ok(value)
    }

    fn write_holding_as_float(
        &mut self,
        register: u16,
        value: f64,
        decimals: u8,
        slave: u8,
    ) -> Result<(), TransportError> {
        self.begin(register)?;
        float_to_words(value)?;
        self.transactions.push(Transaction::WriteFloat {
            register,
            value,
            decimals,
            slave,
        });
        Ok(())
    }

    fn write_holding_register(
        &mut self,
        register: u16,
        value: i32,
        decimals: u8,
        bits: u8,
        signed: bool,
        slave: u8,
    ) -> Result<(), TransportError> {
        self.begin(register)?;
        register_to_word(value, decimals, bits, signed)?;
        self.transactions.push(Transaction::WriteRegister {
            register,
            value,
            decimals,
            bits,
            signed,
            slave,
        });
        Ok(())
    }

    fn write_holding_as_long(
        &mut self,
        register: u16,
        value: i64,
        signed: bool,
        slave: u8,
    ) -> Result<(), TransportError> {
        self.begin(register)?;
        long_to_words(value, signed)?;
        self.transactions.push(Transaction::WriteLong {
            register,
            value,
            signed,
            slave,
        });
        Ok(())
    }
}
