// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kdump harness framework: interfaces for reaching guests over SSH,
//! driving the hypervisor, probing guest liveness, and decoding the test's
//! parameters and guest-reported state.

pub mod background;
pub mod guest;
pub mod guest_state;
pub mod hypervisor;
pub mod liveness;
pub mod params;
pub mod timeouts;

pub use guest::{
    CommandOutput, Credential, GuestCommand, RemoteError, RemoteExecutor,
    VmEndpoint,
};
pub use params::TestParameters;
pub use timeouts::PhaseTimeouts;
