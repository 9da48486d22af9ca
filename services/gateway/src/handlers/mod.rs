pub mod auction;
pub mod bid;
pub mod ws;
