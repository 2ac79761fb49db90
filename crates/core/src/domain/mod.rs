pub mod deal;
pub mod party;
