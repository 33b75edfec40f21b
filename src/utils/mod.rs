//! Ambient utility modules: filesystem helpers, the logger initializer, and
//! centralized numeric conversions.
pub mod fsutil;
pub mod logger;
pub mod num;
