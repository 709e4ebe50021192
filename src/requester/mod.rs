//! The `requester` module sends requests and waits for correlated answers.

pub mod requester;

pub use requester::Requester;
