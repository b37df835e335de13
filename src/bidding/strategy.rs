// src/bidding/strategy.rs
//! Pricing strategies
//!
//! Strategies are pure: no interior state, no I/O. They are called from the
//! stream consumer without locking.

use crate::model::Task;
use crate::utils::config::BiddingConfig;

/// Decides whether and at what price to bid on a task
pub trait BiddingStrategy: Send + Sync {
    /// Price for `task` given `current_load` committed tasks, `None` to decline
    fn decide(&self, task: &Task, current_load: usize) -> Option<u64>;
}

/// Built-in strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingStrategy {
    /// Constant price regardless of load
    Fixed { price: u64 },

    /// Linear between `min_price` (idle) and `max_price` (full)
    Dynamic {
        min_price: u64,
        max_price: u64,
        max_concurrent_tasks: usize,

        /// Decline instead of quoting `max_price` when already at capacity
        decline_at_capacity: bool,
    },
}

impl PricingStrategy {
    pub fn fixed(price: u64) -> Self {
        PricingStrategy::Fixed { price }
    }

    pub fn dynamic(min_price: u64, max_price: u64, max_concurrent_tasks: usize) -> Self {
        PricingStrategy::Dynamic {
            min_price,
            max_price,
            max_concurrent_tasks,
            decline_at_capacity: true,
        }
    }

    pub fn from_config(config: &BiddingConfig, max_concurrent_tasks: usize) -> Self {
        match *config {
            BiddingConfig::Fixed { price } => PricingStrategy::Fixed { price },
            BiddingConfig::Dynamic {
                min_price,
                max_price,
                decline_at_capacity,
            } => PricingStrategy::Dynamic {
                min_price,
                max_price,
                max_concurrent_tasks,
                decline_at_capacity,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PricingStrategy::Fixed { .. } => "fixed",
            PricingStrategy::Dynamic { .. } => "dynamic",
        }
    }
}

impl BiddingStrategy for PricingStrategy {
    fn decide(&self, _task: &Task, current_load: usize) -> Option<u64> {
        match *self {
            PricingStrategy::Fixed { price } => Some(price),
            PricingStrategy::Dynamic {
                min_price,
                max_price,
                max_concurrent_tasks,
                decline_at_capacity,
            } => {
                if max_concurrent_tasks == 0 {
                    return None;
                }
                if current_load >= max_concurrent_tasks && decline_at_capacity {
                    return None;
                }

                let load = current_load.min(max_concurrent_tasks) as u128;
                let span = max_price.saturating_sub(min_price) as u128;
                let price = min_price as u128 + span * load / max_concurrent_tasks as u128;
                Some(price as u64)
            }
        }
    }
}
