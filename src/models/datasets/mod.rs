pub mod logs;
pub mod transactions;
