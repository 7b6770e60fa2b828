pub mod health;
pub mod ops;
pub mod proxy;
pub mod ws;
