//! Integration tests: full pipeline against an in-memory exchange.

mod approval_flow;
mod budget;
mod mock_exchange;
mod sizing;
