pub mod fsm;
pub mod guidance;
pub mod policy;
pub mod safety;
