// src/signing/mod.rs
//! Request signing
//!
//! Every bid, report and stream subscription leaving the agent is signed
//! with the agent's secp256k1 key. The signature travels as gRPC metadata:
//!
//! | Header        | Value                                   |
//! |---------------|-----------------------------------------|
//! | `x-signature` | hex of the 64-byte compact signature    |
//! | `x-signer-id` | agent ID                                |
//! | `x-chain-id`  | subnet ID                               |
//! | `x-timestamp` | seconds since epoch (unsigned)          |

pub mod context;

pub use context::{RequestSignature, SigningContext, PRIVATE_KEY_HEX_LEN};

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const SIGNER_ID_HEADER: &str = "x-signer-id";
pub const CHAIN_ID_HEADER: &str = "x-chain-id";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
