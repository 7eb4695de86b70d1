//! Payment provider adapters.
//!
//! A thin HTTP implementation of the `PaymentGateway` port.

mod dto;
mod http_gateway;

pub use http_gateway::HttpPaymentGateway;
