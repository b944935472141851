// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Common signing device tests.
//!
//! Generic over [dbb::Executor] and [dbb::Connect] for reuse against
//! physical devices and the `dbb-sim` simulator.
//!

pub mod device;

pub mod envelope;

pub mod ordering;

pub mod upgrade;

/// Default device password used by the simulator
pub const PASSWORD: &str = "0000";
