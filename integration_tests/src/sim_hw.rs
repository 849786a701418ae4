//! Simulated board peripherals
use canhouse_node::{storage::EepromDevice, switch::SwitchBoard};

/// A data EEPROM which is erased to 0xFF, with writes completing immediately
#[derive(Debug, Clone)]
pub struct SimEeprom {
    bytes: Vec<u8>,
}

impl SimEeprom {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0xFF; size],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl EepromDevice for SimEeprom {
    fn capacity(&self) -> u16 {
        self.bytes.len() as u16
    }

    fn read_byte(&self, addr: u16) -> u8 {
        self.bytes[addr as usize]
    }

    fn start_write(&mut self, addr: u16, value: u8) {
        self.bytes[addr as usize] = value;
    }

    fn write_in_progress(&self) -> bool {
        false
    }
}

/// Switch board pins, recording what the node does with them
#[derive(Debug, Default)]
pub struct SimSwitchBoard {
    pub led: bool,
    pub standby: bool,
    pub can_sleep: bool,
    pub sleep_count: usize,
}

impl SwitchBoard for SimSwitchBoard {
    fn set_status_led(&mut self, on: bool) {
        self.led = on;
    }

    fn set_transceiver_standby(&mut self, standby: bool) {
        self.standby = standby;
    }

    fn set_can_sleep(&mut self, sleep: bool) {
        self.can_sleep = sleep;
    }

    fn delay_us(&mut self, _us: u32) {}

    fn sleep(&mut self) {
        self.sleep_count += 1;
    }
}
