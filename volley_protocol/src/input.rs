// Input codec: one player's input for one frame, packed into 5 bits.
//
// Layout of a packed input byte:
//
//   bit:   7 6 5 | 4      | 3 2    | 1 0
//          unused| action | y axis | x axis
//
// Each axis field maps 0 → `00`, -1 → `01`, +1 → `10`; `11` is never
// produced. The top three bits are always zero. `decode` rejects anything
// `encode` cannot produce, so a corrupted byte is caught at parse time
// rather than turning into a plausible-looking input that silently
// desynchronizes the simulation.

use thiserror::Error;

/// Highest value representable in the 5-bit field.
pub const PACKED_INPUT_MASK: u8 = 0b1_1111;

const X_SHIFT: u8 = 0;
const Y_SHIFT: u8 = 2;
const ACTION_BIT: u8 = 1 << 4;
const AXIS_MASK: u8 = 0b11;

/// Which axis field a decoding error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputDecodeError {
    #[error("packed input {raw:#010b} has bits set above the 5-bit field")]
    OutOfRange { raw: u8 },
    #[error("packed input {raw:#07b} has an invalid {axis:?} axis field")]
    InvalidAxis { raw: u8, axis: Axis },
    #[error("axis value {value} is not one of -1, 0, 1")]
    AxisOutOfRange { value: i8 },
}

/// One player's input for exactly one simulated frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DiscreteInput {
    x_axis: i8,
    y_axis: i8,
    action: bool,
}

impl DiscreteInput {
    /// No direction held, no action.
    pub const NEUTRAL: Self = Self {
        x_axis: 0,
        y_axis: 0,
        action: false,
    };

    pub fn new(x_axis: i8, y_axis: i8, action: bool) -> Result<Self, InputDecodeError> {
        for value in [x_axis, y_axis] {
            if !(-1..=1).contains(&value) {
                return Err(InputDecodeError::AxisOutOfRange { value });
            }
        }
        Ok(Self {
            x_axis,
            y_axis,
            action,
        })
    }

    pub fn x_axis(self) -> i8 {
        self.x_axis
    }

    pub fn y_axis(self) -> i8 {
        self.y_axis
    }

    pub fn action(self) -> bool {
        self.action
    }

    /// Every valid input, in packed-value order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..=PACKED_INPUT_MASK).filter_map(|raw| decode(PackedInput(raw)).ok())
    }
}

/// A `DiscreteInput` in its transmitted form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PackedInput(u8);

impl PackedInput {
    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u8 {
        self.0
    }
}

impl From<DiscreteInput> for PackedInput {
    fn from(input: DiscreteInput) -> Self {
        encode(input)
    }
}

impl TryFrom<PackedInput> for DiscreteInput {
    type Error = InputDecodeError;

    fn try_from(packed: PackedInput) -> Result<Self, Self::Error> {
        decode(packed)
    }
}

pub fn encode(input: DiscreteInput) -> PackedInput {
    let mut raw = (axis_bits(input.x_axis) << X_SHIFT) | (axis_bits(input.y_axis) << Y_SHIFT);
    if input.action {
        raw |= ACTION_BIT;
    }
    PackedInput(raw)
}

pub fn decode(packed: PackedInput) -> Result<DiscreteInput, InputDecodeError> {
    let raw = packed.0;
    if raw & !PACKED_INPUT_MASK != 0 {
        return Err(InputDecodeError::OutOfRange { raw });
    }
    let x_axis =
        axis_value((raw >> X_SHIFT) & AXIS_MASK).ok_or(InputDecodeError::InvalidAxis {
            raw,
            axis: Axis::X,
        })?;
    let y_axis =
        axis_value((raw >> Y_SHIFT) & AXIS_MASK).ok_or(InputDecodeError::InvalidAxis {
            raw,
            axis: Axis::Y,
        })?;
    Ok(DiscreteInput {
        x_axis,
        y_axis,
        action: raw & ACTION_BIT != 0,
    })
}

fn axis_bits(value: i8) -> u8 {
    match value {
        -1 => 0b01,
        1 => 0b10,
        _ => 0b00,
    }
}

fn axis_value(bits: u8) -> Option<i8> {
    match bits {
        0b00 => Some(0),
        0b01 => Some(-1),
        0b10 => Some(1),
        _ => None,
    }
}
