// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Signing device simulator
//!
//! [Sim] models a device with an application and a bootloader personality,
//! [SimTransport] implements [dbb::Transport] against it and [SimProvider]
//! implements [dbb::Connect] for use with firmware upgrade sessions.
//! Replugging is simulated with [Sim::replug].
//!
//! [MockRelay] serves the pairing relay protocol from a [mockito] server,
//! storing payloads per channel for inspection by tests.

mod device;
pub use device::{Sim, SimProvider, SimReplug, SimState, SimTransport, SIM_SERIAL_VERSION};

mod relay;
pub use relay::{MockRelay, RELAY_PATH};
