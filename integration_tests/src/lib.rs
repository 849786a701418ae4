pub mod sim_bus;
pub mod sim_hw;
