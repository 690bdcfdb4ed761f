//! Modbus RTU transport over a serial port.
//!
//! Uses the blocking tokio-modbus client: each call runs one request/response
//! exchange to completion before returning. Reads use function code 3; all
//! writes use function code 16 (write multiple registers), also for single
//! registers, which is what the heater module expects.

use std::io;
use std::time::Duration;

use tokio_modbus::client::sync::{self, Reader, Writer};
use tokio_modbus::prelude::{Slave, SlaveContext};
use tracing::{debug, info};

use crate::config::SerialConfig;
use crate::transport::{
    RegisterTransport, TransportError, float_to_words, long_to_words, register_to_word,
    words_to_float,
};

/// Register transport bound to one serial line.
pub struct RtuTransport {
    port: String,
    ctx: sync::Context,
}

impl RtuTransport {
    /// Open the serial line described by `serial`.
    ///
    /// `timeout` bounds every transaction; it is the only timeout applied.
    pub fn open(serial: &SerialConfig, timeout: Duration) -> Result<Self, TransportError> {
        let builder = tokio_serial::new(&serial.port, serial.baud_rate)
            .parity(parity(&serial.parity)?)
            .stop_bits(stop_bits(serial.stop_bits)?)
            .data_bits(data_bits(serial.data_bits)?);

        // The slave is set per transaction; this is only the initial one.
        let ctx =
            sync::rtu::connect_slave_with_timeout(&builder, Slave::broadcast(), Some(timeout))?;

        info!(
            port = %serial.port,
            baud_rate = serial.baud_rate,
            "Opened Modbus RTU line"
        );

        Ok(Self {
            port: serial.port.clone(),
            ctx,
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    fn read_holding(
        &mut self,
        register: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<u16>, TransportError> {
        self.ctx.set_slave(Slave(slave));
        let words = self
            .ctx
            .read_holding_registers(register, count)
            .map_err(|e| transport_error(e, register, slave))?
            .map_err(|code| exception(code, register, slave))?;

        debug!(slave, register, ?words, "Read holding registers");
        Ok(words)
    }

    fn write_holding(
        &mut self,
        register: u16,
        words: &[u16],
        slave: u8,
    ) -> Result<(), TransportError> {
        self.ctx.set_slave(Slave(slave));
        self.ctx
            .write_multiple_registers(register, words)
            .map_err(|e| transport_error(e, register, slave))?
            .map_err(|code| exception(code, register, slave))?;

        debug!(slave, register, ?words, "Wrote holding registers");
        Ok(())
    }
}

fn parity(name: &str) -> Result<tokio_serial::Parity, TransportError> {
    match name.to_lowercase().as_str() {
        "none" => Ok(tokio_serial::Parity::None),
        "even" => Ok(tokio_serial::Parity::Even),
        "odd" => Ok(tokio_serial::Parity::Odd),
        other => Err(TransportError::SerialSettings(format!(
            "parity '{}' (expected none, even or odd)",
            other
        ))),
    }
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits, TransportError> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(TransportError::SerialSettings(format!(
            "{} stop bits (expected 1 or 2)",
            other
        ))),
    }
}

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits, TransportError> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(TransportError::SerialSettings(format!(
            "{} data bits (expected 5 to 8)",
            other
        ))),
    }
}

fn transport_error(err: tokio_modbus::Error, register: u16, slave: u8) -> TransportError {
    match err {
        tokio_modbus::Error::Transport(e) if e.kind() == io::ErrorKind::TimedOut => {
            TransportError::Timeout { slave, register }
        }
        tokio_modbus::Error::Transport(e) => TransportError::Io(e),
        other => TransportError::Decode(other.to_string()),
    }
}

fn exception(code: tokio_modbus::ExceptionCode, register: u16, slave: u8) -> TransportError {
    TransportError::Exception {
        slave,
        register,
        code: format!("{:?}", code),
    }
}

impl RegisterTransport for RtuTransport {
    fn read_holding_as_float(
        &mut self,
        register: u16,
        _decimals: u8,
        slave: u8,
    ) -> Result<f64, TransportError> {
        let words = self.read_holding(register, 2, slave)?;
        words_to_float(&words).map(f64::from)
    }

    fn write_holding_as_float(
        &mut self,
        register: u16,
        value: f64,
        _decimals: u8,
        slave: u8,
    ) -> Result<(), TransportError> {
        let words = float_to_words(value)?;
        self.write_holding(register, &words, slave)
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
        let word = register_to_word(value, decimals, bits, signed)?;
        self.write_holding(register, &[word], slave)
    }

    fn write_holding_as_long(
        &mut self,
        register: u16,
        value: i64,
        signed: bool,
        slave: u8,
    ) -> Result<(), TransportError> {
        let words = long_to_words(value, signed)?;
        self.write_holding(register, &words, slave)
    }
}
