//! Domain model: orders, payments, provider events and the ports the
//! application layer talks to.

pub mod checkout;
pub mod event;
pub mod job;
pub mod money;
pub mod order;
pub mod payment;
pub mod ports;
pub mod principal;
pub mod product;
