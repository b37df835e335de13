// src/bidding/mod.rs
//! Bid pricing and bookkeeping
//!
//! - **Strategy**: pure `decide(task, load) -> Option<price>` functions
//! - **Book**: one outstanding bid per intent, with an explicit re-bid policy

pub mod book;
pub mod strategy;

pub use book::{ActiveBid, BidBook, RebidPolicy};
pub use strategy::{BiddingStrategy, PricingStrategy};
