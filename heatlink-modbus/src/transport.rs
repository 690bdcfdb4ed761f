//! Register transport contract and holding register codec.
//!
//! [`RegisterTransport`] is the capability the controller is built on: typed
//! reads and writes of holding registers addressed by register offset and
//! slave id. The codec functions below define how those typed values are laid
//! out in 16-bit words; every transport must use them so that the mock and
//! the serial transport reject exactly the same values.

use std::io;

use thiserror::Error;

use crate::registers::Encoding;

/// Errors raised by a register transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Slave {slave} answered register {register} with exception: {code}")]
    Exception {
        slave: u8,
        register: u16,
        code: String,
    },

    #[error("Timed out waiting for slave {slave} (register {register})")]
    Timeout { slave: u8, register: u16 },

    #[error("Value {value} does not fit {target}")]
    ValueOutOfRange { value: String, target: &'static str },

    #[error("Unsupported register width: {0} bits")]
    UnsupportedWidth(u8),

    #[error("Register {0} is read-only")]
    ReadOnly(u16),

    #[error("Register {address} is encoded as {encoding}, not {requested}")]
    EncodingMismatch {
        address: u16,
        encoding: Encoding,
        requested: &'static str,
    },

    #[error("Invalid serial settings: {0}")]
    SerialSettings(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl TransportError {
    fn out_of_range(value: impl ToString, target: &'static str) -> Self {
        Self::ValueOutOfRange {
            value: value.to_string(),
            target,
        }
    }
}

/// Typed access to the holding registers of Modbus slaves.
///
/// Every call is one blocking transaction. Implementations perform no
/// retries; a failed transaction is reported immediately.
pub trait RegisterTransport {
    /// Read a 32-bit float spanning `register` and `register + 1`.
    fn read_holding_as_float(
        &mut self,
        register: u16,
        decimals: u8,
        slave: u8,
    ) -> Result<f64, TransportError>;

    /// Write a 32-bit float spanning `register` and `register + 1`.
    fn write_holding_as_float(
        &mut self,
        register: u16,
        value: f64,
        decimals: u8,
        slave: u8,
    ) -> Result<(), TransportError>;

    /// Write a single register, scaled by `10^decimals`.
    fn write_holding_register(
        &mut self,
        register: u16,
        value: i32,
        decimals: u8,
        bits: u8,
        signed: bool,
        slave: u8,
    ) -> Result<(), TransportError>;

    /// Write a 32-bit long spanning `register` and `register + 1`.
    fn write_holding_as_long(
        &mut self,
        register: u16,
        value: i64,
        signed: bool,
        slave: u8,
    ) -> Result<(), TransportError>;
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for &mut T {
    fn read_holding_as_float(
        &mut self,
        register: u16,
        decimals: u8,
        slave: u8,
    ) -> Result<f64, TransportError> {
        (**self).read_holding_as_float(register, decimals, slave)
    }

    fn write_holding_as_float(
        &mut self,
        register: u16,
        value: f64,
        decimals: u8,
        slave: u8,
    ) -> Result<(), TransportError> {
        (**self).write_holding_as_float(register, value, decimals, slave)
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
        (**self).write_holding_register(register, value, decimals, bits, signed, slave)
    }

    fn write_holding_as_long(
        &mut self,
        register: u16,
        value: i64,
        signed: bool,
        slave: u8,
    ) -> Result<(), TransportError> {
        (**self).write_holding_as_long(register, value, signed, slave)
    }
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn read_holding_as_float(
        &mut self,
        register: u16,
        decimals: u8,
        slave: u8,
    ) -> Result<f64, TransportError> {
        (**self).read_holding_as_float(register, decimals, slave)
    }

    fn write_holding_as_float(
        &mut self,
        register: u16,
        value: f64,
        decimals: u8,
        slave: u8,
    ) -> Result<(), TransportError> {
        (**self).write_holding_as_float(register, value, decimals, slave)
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
        (**self).write_holding_register(register, value, decimals, bits, signed, slave)
    }

    fn write_holding_as_long(
        &mut self,
        register: u16,
        value: i64,
        signed: bool,
        slave: u8,
    ) -> Result<(), TransportError> {
        (**self).write_holding_as_long(register, value, signed, slave)
    }
}

/// Encode a float as two big-endian registers (high word first).
///
/// The value is narrowed to single precision. Finite values beyond the
/// `f32` range are rejected instead of being written as infinity.
pub fn float_to_words(value: f64) -> Result<[u16; 2], TransportError> {
    let single = value as f32;
    if value.is_finite() && !single.is_finite() {
        return Err(TransportError::out_of_range(value, "f32"));
    }
    Ok(split_u32(single.to_bits()))
}

/// Decode a float from two big-endian registers.
pub fn words_to_float(words: &[u16]) -> Result<f32, TransportError> {
    match words {
        [high, low] => Ok(f32::from_bits(join_u32(*high, *low))),
        _ => Err(TransportError::Decode(format!(
            "expected 2 registers for a float, got {}",
            words.len()
        ))),
    }
}

/// Encode a single register value scaled by `10^decimals`.
///
/// Signed values are stored in two's complement.
pub fn register_to_word(
    value: i32,
    decimals: u8,
    bits: u8,
    signed: bool,
) -> Result<u16, TransportError> {
    if bits != 16 {
        return Err(TransportError::UnsupportedWidth(bits));
    }

    let target = if signed { "i16" } else { "u16" };
    let scaled = 10i64
        .checked_pow(u32::from(decimals))
        .and_then(|factor| i64::from(value).checked_mul(factor))
        .ok_or_else(|| TransportError::out_of_range(value, target))?;

    let word = if signed {
        i16::try_from(scaled).map(|v| v as u16)
    } else {
        u16::try_from(scaled)
    };
    word.map_err(|_| TransportError::out_of_range(scaled, target))
}

/// Encode a 32-bit long as two big-endian registers (high word first).
pub fn long_to_words(value: i64, signed: bool) -> Result<[u16; 2], TransportError> {
    let bits = if signed {
        i32::try_from(value)
            .map(|v| v as u32)
            .map_err(|_| TransportError::out_of_range(value, "i32"))?
    } else {
        u32::try_from(value).map_err(|_| TransportError::out_of_range(value, "u32"))?
    };
    Ok(split_u32(bits))
}

fn split_u32(bits: u32) -> [u16; 2] {
    [(bits >> 16) as u16, bits as u16]
}

fn join_u32(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_words_big_endian() {
        // 123.456 in IEEE 754 = 0x42F6E979
        assert_eq!(float_to_words(123.456).unwrap(), [0x42F6, 0xE979]);
        assert_eq!(float_to_words(70.0).unwrap(), [0x428C, 0x0000]);

        let value = words_to_float(&[0x42F6, 0xE979]).unwrap();
        assert!((value - 123.456).abs() < 0.001);
    }

    #[test]
    fn test_float_overflow_rejected() {
        assert!(matches!(
            float_to_words(1e300),
            Err(TransportError::ValueOutOfRange { target: "f32", .. })
        ));
        // Infinity is representable and passes through.
        assert_eq!(float_to_words(f64::INFINITY).unwrap(), [0x7F80, 0x0000]);
    }

    #[test]
    fn test_float_wrong_register_count() {
        assert!(matches!(
            words_to_float(&[0x4248]),
            Err(TransportError::Decode(_))
        ));
    }

    #[test]
    fn test_register_unsigned() {
        assert_eq!(register_to_word(8, 0, 16, false).unwrap(), 8);
        assert_eq!(register_to_word(65535, 0, 16, false).unwrap(), 0xFFFF);
        assert!(register_to_word(65536, 0, 16, false).is_err());
        assert!(register_to_word(-1, 0, 16, false).is_err());
    }

    #[test]
    fn test_register_signed() {
        assert_eq!(register_to_word(-1, 0, 16, true).unwrap(), 0xFFFF);
        assert_eq!(register_to_word(-32768, 0, 16, true).unwrap(), 0x8000);
        assert!(register_to_word(32768, 0, 16, true).is_err());
    }

    #[test]
    fn test_register_decimals_scale() {
        assert_eq!(register_to_word(12, 1, 16, false).unwrap(), 120);
        assert_eq!(register_to_word(7, 3, 16, false).unwrap(), 7000);
        assert!(register_to_word(7, 5, 16, false).is_err());
        assert!(register_to_word(1, 255, 16, false).is_err());
    }

    #[test]
    fn test_register_width() {
        assert!(matches!(
            register_to_word(1, 0, 32, false),
            Err(TransportError::UnsupportedWidth(32))
        ));
    }

    #[test]
    fn test_long_words() {
        assert_eq!(long_to_words(30_000, false).unwrap(), [0x0000, 0x7530]);
        assert_eq!(long_to_words(0x0001_86A0, false).unwrap(), [0x0001, 0x86A0]);
        assert_eq!(long_to_words(-2, true).unwrap(), [0xFFFF, 0xFFFE]);
        assert!(long_to_words(-1, false).is_err());
        assert!(long_to_words(i64::from(u32::MAX) + 1, false).is_err());
        assert!(long_to_words(i64::from(i32::MAX) + 1, true).is_err());
    }
}
