//! Physical outputs of the relay board
//!
//! Output numbers match the silkscreen labels on the board, 1 to [`OUTPUT_COUNT`]. Each one is a
//! single bit of one of the five GPIO ports.

use canhouse_common::constants::OUTPUT_COUNT;

/// A GPIO port of the relay MCU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    /// PORTA
    A,
    /// PORTB
    B,
    /// PORTC
    C,
    /// PORTD
    D,
    /// PORTE
    E,
}

impl Port {
    /// Number of ports
    pub const COUNT: usize = 5;

    /// Index of the port, A = 0
    pub const fn index(&self) -> usize {
        *self as usize
    }
}

/// One bit of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutputPin {
    /// The port register
    pub port: Port,
    /// Bit within the port, 0 to 7
    pub bit: u8,
}

impl OutputPin {
    const fn new(port: Port, bit: u8) -> Self {
        Self { port, bit }
    }

    /// Mask of this pin within its port
    pub const fn mask(&self) -> u8 {
        1 << self.bit
    }
}

/// A physical output of the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Output {
    /// Silkscreen label, 1 based
    pub number: u8,
    /// The pin driving the output
    pub pin: OutputPin,
}

const fn output(number: u8, port: Port, bit: u8) -> Output {
    Output {
        number,
        pin: OutputPin::new(port, bit),
    }
}

/// All outputs of the board, indexed by output number - 1
pub static OUTPUTS: [Output; OUTPUT_COUNT as usize] = [
    output(1, Port::D, 7),
    output(2, Port::B, 0),
    output(3, Port::D, 6),
    output(4, Port::B, 1),
    output(5, Port::D, 5),
    output(6, Port::B, 4),
    output(7, Port::D, 4),
    output(8, Port::B, 5),
    output(9, Port::C, 7),
    output(10, Port::B, 6),
    output(11, Port::C, 6),
    output(12, Port::B, 7),
    output(13, Port::C, 5),
    output(14, Port::A, 0),
    output(15, Port::C, 4),
    output(16, Port::A, 1),
    output(17, Port::D, 3),
    output(18, Port::A, 2),
    output(19, Port::D, 2),
    output(20, Port::A, 3),
    output(21, Port::D, 1),
    output(22, Port::A, 5),
    output(23, Port::D, 0),
    output(24, Port::E, 0),
    output(25, Port::C, 3),
    output(26, Port::E, 1),
    output(27, Port::C, 2),
    output(28, Port::E, 2),
    output(29, Port::C, 1),
    output(30, Port::C, 0),
];

/// Find the output with the given silkscreen number
pub fn lookup_output(number: u8) -> Option<Output> {
    if number == 0 {
        return None;
    }
    OUTPUTS.get(number as usize - 1).copied()
}

/// Access to the output port latches
///
/// Implemented by the board support code on the target, and by [`PortBank`] everywhere else.
pub trait DigitalOutput {
    /// Current latch state of a pin
    fn read(&self, pin: OutputPin) -> bool;

    /// Drive a pin
    fn write(&mut self, pin: OutputPin, on: bool);

    /// Flip a pin
    ///
    /// Boards with a hardware toggle register can override this.
    fn toggle(&mut self, pin: OutputPin) {
        let on = self.read(pin);
        self.write(pin, !on);
    }
}

/// In-memory port latches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortBank {
    latches: [u8; Port::COUNT],
}

impl PortBank {
    /// All outputs off
    pub const fn new() -> Self {
        Self {
            latches: [0; Port::COUNT],
        }
    }

    /// Raw latch value of a port
    pub fn latch(&self, port: Port) -> u8 {
        self.latches[port.index()]
    }

    /// State of an output by number. Unknown outputs read as off.
    pub fn is_on(&self, number: u8) -> bool {
        lookup_output(number).is_some_and(|o| self.read(o.pin))
    }
}

impl DigitalOutput for PortBank {
    fn read(&self, pin: OutputPin) -> bool {
        self.latches[pin.port.index()] & pin.mask() != 0
    }

    fn write(&mut self, pin: OutputPin, on: bool) {
        let latch = &mut self.latches[pin.port.index()];
        if on {
            *latch |= pin.mask();
        } else {
            *latch &= !pin.mask();
        }
    }
}
