//! Named heater operations on top of the register map.
//!
//! [`HeaterController`] translates intents (set gains, start, stop, tune)
//! into register transactions. It keeps no device state: two identical calls
//! produce two identical transactions, and the device remains the authority
//! on running mode and tuning state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{DeviceConfig, PidSettings};
use crate::reading;
use crate::registers::{self, Encoding, RegisterEntry};
use crate::transport::{RegisterTransport, TransportError};

/// Thermocouple type code written when none is given.
pub const DEFAULT_THERMOCOUPLE_TYPE: u16 = 1;

/// Values of the running mode register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RunningMode {
    /// Intermediate mode the device must pass through before running.
    Wait = 5,
    Run = 6,
    Stop = 8,
}

/// Direction of the PID output relative to the error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PidAction {
    /// Output rises when the process value is above the setpoint.
    #[default]
    Direct,
    /// Output rises when the process value is below the setpoint.
    Reverse,
}

impl PidAction {
    fn register_value(self) -> i32 {
        match self {
            PidAction::Direct => 1,
            PidAction::Reverse => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PidAction::Direct => "direct",
            PidAction::Reverse => "reverse",
        }
    }
}

/// Mode of output 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Off,
    /// Output driven by the PID loop.
    Pid,
}

impl OutputMode {
    fn register_value(self) -> i32 {
        match self {
            OutputMode::Off => 0,
            OutputMode::Pid => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Off => "off",
            OutputMode::Pid => "pid",
        }
    }
}

/// Error returned when parsing an unrecognized token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{token}' (expected {expected})")]
pub struct UnknownToken {
    pub kind: &'static str,
    pub token: String,
    pub expected: &'static str,
}

impl FromStr for PidAction {
    type Err = UnknownToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(PidAction::Direct),
            "reverse" => Ok(PidAction::Reverse),
            _ => Err(UnknownToken {
                kind: "action",
                token: s.to_string(),
                expected: "direct or reverse",
            }),
        }
    }
}

impl FromStr for OutputMode {
    type Err = UnknownToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(OutputMode::Off),
            "pid" => Ok(OutputMode::Pid),
            _ => Err(UnknownToken {
                kind: "output mode",
                token: s.to_string(),
                expected: "off or pid",
            }),
        }
    }
}

impl fmt::Display for PidAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `set_adaptive_autotune(false)` does.
///
/// The established behaviour of this controller never clears the adaptive
/// control register: disabling is a no-op. Writing 0 is the presumed intent
/// but has not been confirmed for this device, so both are offered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveDisablePolicy {
    /// Leave the register untouched (established behaviour).
    #[default]
    Skip,
    /// Write 0 to the adaptive control register.
    WriteZero,
}

/// Input filter level.
///
/// Built from integers directly or from floats by truncation toward zero, so
/// `5.9` selects level 5.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterLevel(i64);

impl FilterLevel {
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<u16> for FilterLevel {
    fn from(level: u16) -> Self {
        Self(i64::from(level))
    }
}

impl From<i32> for FilterLevel {
    fn from(level: i32) -> Self {
        Self(i64::from(level))
    }
}

impl From<f64> for FilterLevel {
    fn from(level: f64) -> Self {
        // Saturating cast; NaN maps to 0.
        Self(level.trunc() as i64)
    }
}

/// Typed value for a single register write.
#[derive(Debug, Clone, Copy)]
enum RegisterValue {
    Float(f64),
    Word(i64),
    Long(i64),
}

impl RegisterValue {
    fn kind(&self) -> &'static str {
        match self {
            RegisterValue::Float(_) => "float",
            RegisterValue::Word(_) => "16-bit register",
            RegisterValue::Long(_) => "long",
        }
    }
}

/// Controller for one heater module on a Modbus line.
///
/// Owns its transport for its whole lifetime; dropping the controller
/// releases the transport.
pub struct HeaterController<T: RegisterTransport> {
    port: String,
    address: u8,
    transport: T,
    adaptive_disable: AdaptiveDisablePolicy,
}

impl<T: RegisterTransport> HeaterController<T> {
    /// Create a controller for the slave `address` reachable through `transport`.
    pub fn new(port: impl Into<String>, address: u8, transport: T) -> Self {
        Self {
            port: port.into(),
            address,
            transport,
            adaptive_disable: AdaptiveDisablePolicy::default(),
        }
    }

    /// Create a controller for a configured device.
    pub fn for_device(device: &DeviceConfig, transport: T) -> Self {
        Self::new(&device.serial.port, device.unit_id, transport)
            .with_adaptive_disable(device.adaptive_disable)
    }

    /// Choose what disabling adaptive tuning does.
    pub fn with_adaptive_disable(mut self, policy: AdaptiveDisablePolicy) -> Self {
        self.adaptive_disable = policy;
        self
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn adaptive_disable(&self) -> AdaptiveDisablePolicy {
        self.adaptive_disable
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Write the PID block: max rate, P, I, D, then setpoint 1.
    ///
    /// A failure leaves earlier writes of the block applied.
    pub fn configure_pid(
        &mut self,
        max_rate: f64,
        derivative_gain: f64,
        proportional_gain: f64,
        integral_gain: f64,
        setpoint: f64,
    ) -> Result<(), TransportError> {
        self.write(&registers::MAX_RATE, RegisterValue::Float(max_rate))?;
        self.write(
            &registers::PROPORTIONAL_GAIN,
            RegisterValue::Float(proportional_gain),
        )?;
        self.write(&registers::INTEGRAL_GAIN, RegisterValue::Float(integral_gain))?;
        self.write(
            &registers::DERIVATIVE_GAIN,
            RegisterValue::Float(derivative_gain),
        )?;
        self.write(&registers::SETPOINT_1, RegisterValue::Float(setpoint))?;

        info!(
            slave = self.address,
            max_rate, proportional_gain, integral_gain, derivative_gain, setpoint,
            "PID parameters written"
        );
        Ok(())
    }

    /// [`configure_pid`](Self::configure_pid) from a settings block.
    pub fn apply_pid(&mut self, pid: &PidSettings) -> Result<(), TransportError> {
        self.configure_pid(
            pid.max_rate,
            pid.derivative_gain,
            pid.proportional_gain,
            pid.integral_gain,
            pid.setpoint,
        )
    }

    pub fn set_thermocouple(&mut self, type_code: u16) -> Result<(), TransportError> {
        self.write(
            &registers::THERMOCOUPLE_TYPE,
            RegisterValue::Word(i64::from(type_code)),
        )
    }

    /// Read the current input value, normalized by [`reading::normalize`].
    pub fn read_temperature(&mut self) -> Result<f64, TransportError> {
        let entry = &registers::CURRENT_INPUT_VALUE;
        let Encoding::Float32 { decimals } = entry.encoding else {
            return Err(mismatch(entry, "float"));
        };

        let raw = self
            .transport
            .read_holding_as_float(entry.address, decimals, self.address)?;
        let value = reading::normalize(raw).map_err(|e| {
            TransportError::Decode(format!(
                "reading {} of slave {} rendered as '{}': {}",
                raw,
                self.address,
                reading::render(raw),
                e
            ))
        })?;

        debug!(slave = self.address, raw, value, "Temperature read");
        Ok(value)
    }

    /// Put the device in run mode, passing through the wait mode first.
    pub fn run(&mut self) -> Result<(), TransportError> {
        self.set_running_mode(RunningMode::Wait)?;
        self.set_running_mode(RunningMode::Run)?;
        info!(slave = self.address, port = %self.port, "Heater running");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), TransportError> {
        self.set_running_mode(RunningMode::Stop)?;
        info!(slave = self.address, port = %self.port, "Heater stopped");
        Ok(())
    }

    fn set_running_mode(&mut self, mode: RunningMode) -> Result<(), TransportError> {
        self.write(&registers::RUNNING_MODE, RegisterValue::Word(mode as i64))
    }

    pub fn set_action(&mut self, action: PidAction) -> Result<(), TransportError> {
        self.write(
            &registers::PID_ACTION,
            RegisterValue::Word(i64::from(action.register_value())),
        )
    }

    pub fn set_output_mode(&mut self, mode: OutputMode) -> Result<(), TransportError> {
        self.write(
            &registers::OUTPUT_1_MODE,
            RegisterValue::Word(i64::from(mode.register_value())),
        )
    }

    /// Set the PID action from a text token.
    ///
    /// Unrecognized tokens write nothing and return `Ok(false)`. This keeps
    /// the historical lenient behaviour at text boundaries; a typo therefore
    /// leaves the device unchanged without an error.
    pub fn apply_action_token(&mut self, token: &str) -> Result<bool, TransportError> {
        match token.parse::<PidAction>() {
            Ok(action) => self.set_action(action).map(|()| true),
            Err(e) => {
                warn!(slave = self.address, "Ignoring {}", e);
                Ok(false)
            }
        }
    }

    /// Set the output 1 mode from a text token; see
    /// [`apply_action_token`](Self::apply_action_token).
    pub fn apply_output_token(&mut self, token: &str) -> Result<bool, TransportError> {
        match token.parse::<OutputMode>() {
            Ok(mode) => self.set_output_mode(mode).map(|()| true),
            Err(e) => {
                warn!(slave = self.address, "Ignoring {}", e);
                Ok(false)
            }
        }
    }

    /// Enable adaptive PID control, or disable it according to the
    /// configured [`AdaptiveDisablePolicy`].
    pub fn set_adaptive_autotune(&mut self, enabled: bool) -> Result<(), TransportError> {
        if enabled {
            return self.write(&registers::PID_ADAPTIVE_CONTROL, RegisterValue::Word(1));
        }

        match self.adaptive_disable {
            AdaptiveDisablePolicy::Skip => {
                warn!(
                    slave = self.address,
                    "Adaptive control not cleared: disable policy is 'skip'"
                );
                Ok(())
            }
            AdaptiveDisablePolicy::WriteZero => {
                self.write(&registers::PID_ADAPTIVE_CONTROL, RegisterValue::Word(0))
            }
        }
    }

    /// Start an autotune run.
    ///
    /// The device latches max rate, setpoint and timeout when the start
    /// register is written, so the trigger is always written last.
    pub fn start_autotune(
        &mut self,
        max_rate: f64,
        timeout_seconds: u32,
        setpoint: f64,
    ) -> Result<(), TransportError> {
        let timeout_ms = i64::from(timeout_seconds) * 1000;

        self.write(&registers::MAX_RATE, RegisterValue::Float(max_rate))?;
        self.write(&registers::SETPOINT_1, RegisterValue::Float(setpoint))?;
        self.write(&registers::AUTOTUNE_TIMEOUT, RegisterValue::Long(timeout_ms))?;
        self.write(&registers::AUTOTUNE_START, RegisterValue::Word(1))?;

        info!(
            slave = self.address,
            max_rate, timeout_ms, setpoint, "Autotune started"
        );
        Ok(())
    }

    pub fn set_filter(&mut self, level: impl Into<FilterLevel>) -> Result<(), TransportError> {
        let level = level.into();
        self.write(&registers::FILTER, RegisterValue::Word(level.value()))
    }

    /// Apply the bring-up settings of a device: thermocouple type, PID
    /// action, filter level and, when configured, the PID block.
    ///
    /// The running mode is left alone; call [`run`](Self::run) afterwards.
    pub fn prepare(&mut self, device: &DeviceConfig) -> Result<(), TransportError> {
        self.set_thermocouple(device.thermocouple_type)?;
        self.set_action(device.action)?;
        self.set_filter(device.filter)?;
        if let Some(pid) = &device.pid {
            self.apply_pid(pid)?;
        }
        Ok(())
    }

    /// Issue one write through the register map entry.
    fn write(
        &mut self,
        entry: &RegisterEntry,
        value: RegisterValue,
    ) -> Result<(), TransportError> {
        if !entry.is_writable() {
            return Err(TransportError::ReadOnly(entry.address));
        }

        debug!(
            slave = self.address,
            register = entry.address,
            role = %entry.role,
            value = ?value,
            "Writing register"
        );

        match (entry.encoding, value) {
            (Encoding::Float32 { decimals }, RegisterValue::Float(v)) => self
                .transport
                .write_holding_as_float(entry.address, v, decimals, self.address),
            (Encoding::UInt16, RegisterValue::Word(v)) => {
                let v = i32::try_from(v).map_err(|_| TransportError::ValueOutOfRange {
                    value: v.to_string(),
                    target: "u16",
                })?;
                self.transport
                    .write_holding_register(entry.address, v, 0, 16, false, self.address)
            }
            (Encoding::Int32 { signed }, RegisterValue::Long(v)) => self
                .transport
                .write_holding_as_long(entry.address, v, signed, self.address),
            (_, value) => Err(mismatch(entry, value.kind())),
        }
    }
}

fn mismatch(entry: &RegisterEntry, requested: &'static str) -> TransportError {
    TransportError::EncodingMismatch {
        address: entry.address,
        encoding: entry.encoding,
        requested,
    }
}

impl<T: RegisterTransport> fmt::Debug for HeaterController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaterController")
            .field("port", &self.port)
            .field("address", &self.address)
            .field("adaptive_disable", &self.adaptive_disable)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{RecordingTransport, Transaction};

    fn controller() -> HeaterController<RecordingTransport> {
        HeaterController::new("/dev/ttyACM0", 1, RecordingTransport::new())
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!("direct".parse::<PidAction>().unwrap(), PidAction::Direct);
        assert_eq!("reverse".parse::<PidAction>().unwrap(), PidAction::Reverse);
        assert!("Direct".parse::<PidAction>().is_err());
        assert_eq!("off".parse::<OutputMode>().unwrap(), OutputMode::Off);
        assert_eq!("pid".parse::<OutputMode>().unwrap(), OutputMode::Pid);

        let err = "auto".parse::<OutputMode>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown output mode 'auto' (expected off or pid)"
        );
    }

    #[test]
    fn test_filter_level_truncates() {
        assert_eq!(FilterLevel::from(5.9).value(), 5);
        assert_eq!(FilterLevel::from(-0.5).value(), 0);
        assert_eq!(FilterLevel::from(-2.7).value(), -2);
        assert_eq!(FilterLevel::from(f64::NAN).value(), 0);
        assert_eq!(FilterLevel::from(3u16).value(), 3);
    }

    #[test]
    fn test_write_uses_slave_address() {
        let mut c = HeaterController::new("/dev/ttyACM2", 2, RecordingTransport::new());
        c.stop().unwrap();

        assert_eq!(
            c.transport().transactions(),
            &[Transaction::WriteRegister {
                register: 576,
                value: 8,
                decimals: 0,
                bits: 16,
                signed: false,
                slave: 2,
            }]
        );
    }

    #[test]
    fn test_read_only_entry_rejected() {
        let mut c = controller();
        let err = c
            .write(&registers::CURRENT_INPUT_VALUE, RegisterValue::Float(1.0))
            .unwrap_err();
        assert!(matches!(err, TransportError::ReadOnly(528)));
        assert_eq!(c.transport().attempts(), 0);
    }

    #[test]
    fn test_encoding_mismatch_rejected() {
        let mut c = controller();
        let err = c
            .write(&registers::FILTER, RegisterValue::Float(1.0))
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::EncodingMismatch { address: 655, .. }
        ));
        assert_eq!(c.transport().attempts(), 0);
    }

    #[test]
    fn test_debug_hides_transport() {
        let c = controller();
        let text = format!("{:?}", c);
        assert!(text.contains("/dev/ttyACM0"));
        assert!(!text.contains("RecordingTransport"));
    }
}
