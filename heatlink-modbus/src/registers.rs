//! Holding register map of the heater controller.
//!
//! Every address and encoding in this table is part of the device contract.
//! A wrong entry does not fail loudly: the controller accepts the write and
//! silently reconfigures something else.

use std::fmt;

/// How a value is laid out in holding registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// One 16-bit register.
    UInt16,
    /// IEEE-754 single precision over two registers, carried with a fixed
    /// number of decimals.
    Float32 { decimals: u8 },
    /// 32-bit long over two registers.
    Int32 { signed: bool },
}

impl Encoding {
    /// Number of 16-bit registers occupied by a value.
    pub fn width(&self) -> u16 {
        match self {
            Encoding::UInt16 => 1,
            Encoding::Float32 { .. } | Encoding::Int32 { .. } => 2,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::UInt16 => write!(f, "u16"),
            Encoding::Float32 { decimals } => write!(f, "f32({})", decimals),
            Encoding::Int32 { signed: true } => write!(f, "i32"),
            Encoding::Int32 { signed: false } => write!(f, "u32"),
        }
    }
}

/// Whether the device accepts writes to a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
}

/// Semantic role of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    MaxRate,
    ProportionalGain,
    IntegralGain,
    DerivativeGain,
    Setpoint1,
    ThermocoupleType,
    CurrentInputValue,
    RunningMode,
    PidAction,
    Output1Mode,
    PidAdaptiveControl,
    AutotuneTimeout,
    AutotuneStart,
    Filter,
}

impl Role {
    /// Return the string name for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::MaxRate => "max_rate",
            Role::ProportionalGain => "proportional_gain",
            Role::IntegralGain => "integral_gain",
            Role::DerivativeGain => "derivative_gain",
            Role::Setpoint1 => "setpoint_1",
            Role::ThermocoupleType => "thermocouple_type",
            Role::CurrentInputValue => "current_input_value",
            Role::RunningMode => "running_mode",
            Role::PidAction => "pid_action",
            Role::Output1Mode => "output_1_mode",
            Role::PidAdaptiveControl => "pid_adaptive_control",
            Role::AutotuneTimeout => "autotune_timeout",
            Role::AutotuneStart => "autotune_start",
            Role::Filter => "filter",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the register map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterEntry {
    pub role: Role,
    /// Register offset (0-based).
    pub address: u16,
    pub encoding: Encoding,
    pub access: Access,
}

impl RegisterEntry {
    const fn read_write(role: Role, address: u16, encoding: Encoding) -> Self {
        Self {
            role,
            address,
            encoding,
            access: Access::ReadWrite,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }
}

/// Decimals carried by every float register on this controller.
pub const FLOAT_DECIMALS: u8 = 2;

const FLOAT: Encoding = Encoding::Float32 {
    decimals: FLOAT_DECIMALS,
};

pub const MAX_RATE: RegisterEntry = RegisterEntry::read_write(Role::MaxRate, 686, FLOAT);
pub const PROPORTIONAL_GAIN: RegisterEntry =
    RegisterEntry::read_write(Role::ProportionalGain, 676, FLOAT);
pub const INTEGRAL_GAIN: RegisterEntry = RegisterEntry::read_write(Role::IntegralGain, 678, FLOAT);
pub const DERIVATIVE_GAIN: RegisterEntry =
    RegisterEntry::read_write(Role::DerivativeGain, 680, FLOAT);
pub const SETPOINT_1: RegisterEntry = RegisterEntry::read_write(Role::Setpoint1, 544, FLOAT);
pub const THERMOCOUPLE_TYPE: RegisterEntry =
    RegisterEntry::read_write(Role::ThermocoupleType, 643, Encoding::UInt16);
pub const CURRENT_INPUT_VALUE: RegisterEntry = RegisterEntry {
    role: Role::CurrentInputValue,
    address: 528,
    encoding: FLOAT,
    access: Access::ReadOnly,
};
pub const RUNNING_MODE: RegisterEntry =
    RegisterEntry::read_write(Role::RunningMode, 576, Encoding::UInt16);
pub const PID_ACTION: RegisterEntry =
    RegisterEntry::read_write(Role::PidAction, 673, Encoding::UInt16);
pub const OUTPUT_1_MODE: RegisterEntry =
    RegisterEntry::read_write(Role::Output1Mode, 1025, Encoding::UInt16);
pub const PID_ADAPTIVE_CONTROL: RegisterEntry =
    RegisterEntry::read_write(Role::PidAdaptiveControl, 672, Encoding::UInt16);
pub const AUTOTUNE_TIMEOUT: RegisterEntry =
    RegisterEntry::read_write(Role::AutotuneTimeout, 674, Encoding::Int32 { signed: false });
pub const AUTOTUNE_START: RegisterEntry =
    RegisterEntry::read_write(Role::AutotuneStart, 579, Encoding::UInt16);
pub const FILTER: RegisterEntry = RegisterEntry::read_write(Role::Filter, 655, Encoding::UInt16);

/// The complete register map, in table order.
pub const REGISTER_MAP: [RegisterEntry; 14] = [
    MAX_RATE,
    PROPORTIONAL_GAIN,
    INTEGRAL_GAIN,
    DERIVATIVE_GAIN,
    SETPOINT_1,
    THERMOCOUPLE_TYPE,
    CURRENT_INPUT_VALUE,
    RUNNING_MODE,
    PID_ACTION,
    OUTPUT_1_MODE,
    PID_ADAPTIVE_CONTROL,
    AUTOTUNE_TIMEOUT,
    AUTOTUNE_START,
    FILTER,
];

/// Look up the entry for a role.
pub fn entry(role: Role) -> &'static RegisterEntry {
    match role {
        Role::MaxRate => &MAX_RATE,
        Role::ProportionalGain => &PROPORTIONAL_GAIN,
        Role::IntegralGain => &INTEGRAL_GAIN,
        Role::DerivativeGain => &DERIVATIVE_GAIN,
        Role::Setpoint1 => &SETPOINT_1,
        Role::ThermocoupleType => &THERMOCOUPLE_TYPE,
        Role::CurrentInputValue => &CURRENT_INPUT_VALUE,
        Role::RunningMode => &RUNNING_MODE,
        Role::PidAction => &PID_ACTION,
        Role::Output1Mode => &OUTPUT_1_MODE,
        Role::PidAdaptiveControl => &PID_ADAPTIVE_CONTROL,
        Role::AutotuneTimeout => &AUTOTUNE_TIMEOUT,
        Role::AutotuneStart => &AUTOTUNE_START,
        Role::Filter => &FILTER,
    }
}

/// Find the entry starting at `address`, if any.
pub fn by_address(address: u16) -> Option<&'static RegisterEntry> {
    REGISTER_MAP.iter().find(|e| e.address == address)
}
