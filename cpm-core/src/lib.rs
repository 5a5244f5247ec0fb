//! # CPM core: the collaboration-policy model
//!
//! Algorithmic building blocks for the peer-collaboration bandit simulation:
//! a LinUCB estimator per candidate peer, the synthetic environment that
//! stands in for the real federated system's decision layer, and the
//! deterministic seed derivation that keeps every stochastic draw
//! reproducible.
//!
//! This crate performs no I/O. The simulation driver and all artifact
//! handling live in `cpm-sim`.

pub mod bandit;
pub mod env;
pub mod linalg;
pub mod seed;

pub use self::{
    bandit::{BanditError, LinUcb},
    env::PairEnvironment,
    seed::derive_rng,
};
