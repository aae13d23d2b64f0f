//! Internal controller registers reachable via `ReadLocal`/`WriteLocal`.

pub const DAQ_MODE: u16 = 0x1300;
pub const CONTROLLER_ID: u16 = 0x1304;
pub const STACK_EXEC_STATUS0: u16 = 0x1400;
pub const STACK_EXEC_STATUS1: u16 = 0x1404;
pub const HARDWARE_ID: u16 = 0x6008;
pub const FIRMWARE_REVISION: u16 = 0x600e;
