// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoding of the `key=value;key=value` test parameter string.

use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("no test parameters were supplied")]
    Empty,

    #[error("required parameter `crashkernel` is missing or empty")]
    MissingCrashKernel,

    #[error("parameter `{key}` has invalid value {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// The CPU on which the guest should be made to panic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrashedVcpu {
    /// Crash on the CPU with this index.
    Index(u32),

    /// Crash on a CPU picked uniformly from the guest's vCPUs.
    Random,
}

/// The typed configuration for a single kdump run.
///
/// Values of this type are produced once, by parsing the raw parameter
/// string, and are never modified afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestParameters {
    /// The kdump memory reservation, e.g. `256M` or `auto`.
    pub crash_kernel: String,

    /// Trigger the panic by injecting an NMI instead of writing to
    /// `/proc/sysrq-trigger`.
    pub nmi: bool,

    /// The name of an auxiliary VM that can serve as an NFS dump target.
    pub companion_vm: Option<String>,

    /// Store the dump on the companion VM over NFS.
    pub use_nfs: bool,

    /// The number of vCPUs the guest was configured with, if known.
    pub vcpu_count: Option<u32>,

    /// The CPU the caller asked to crash on, if any.
    pub crashed_vcpu: Option<CrashedVcpu>,
}

impl TestParameters {
    /// Returns the companion VM's name if the test should provision it as an
    /// NFS dump target. A companion VM without NFS, or NFS without a
    /// companion VM, provisions nothing.
    pub fn nfs_companion(&self) -> Option<&str> {
        if self.use_nfs {
            self.companion_vm.as_deref()
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Key {
    CrashKernel,
    Nmi,
    CompanionVm,
    UseNfs,
    VcpuCount,
    CrashedVcpu,
}

impl Key {
    fn from_wire(key: &str) -> Option<Self> {
        match key {
            "crashkernel" | "crashKernel" => Some(Self::CrashKernel),
            "NMI" | "nmi" => Some(Self::Nmi),
            "VM2NAME" | "companionVmName" => Some(Self::CompanionVm),
            "use_nfs" | "useNfs" => Some(Self::UseNfs),
            "VCPU" | "vCpuCount" => Some(Self::VcpuCount),
            "crashed_vcpu" | "crashedVcpu" => Some(Self::CrashedVcpu),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::CrashKernel => "crashkernel",
            Self::Nmi => "NMI",
            Self::CompanionVm => "VM2NAME",
            Self::UseNfs => "use_nfs",
            Self::VcpuCount => "VCPU",
            Self::CrashedVcpu => "crashed_vcpu",
        }
    }
}

/// The untyped values collected from the parameter string. If a key appears
/// more than once, the last occurrence wins.
#[derive(Default)]
struct RawParameters<'a> {
    crash_kernel: Option<&'a str>,
    nmi: Option<&'a str>,
    companion_vm: Option<&'a str>,
    use_nfs: Option<&'a str>,
    vcpu_count: Option<&'a str>,
    crashed_vcpu: Option<&'a str>,
}

impl<'a> RawParameters<'a> {
    fn collect(input: &'a str) -> Self {
        let mut raw = Self::default();
        for entry in input.split(';').map(str::trim) {
            if entry.is_empty() {
                continue;
            }

            let Some((key, value)) = entry.split_once('=') else {
                debug!(entry, "ignoring test parameter without a value");
                continue;
            };

            let key = key.trim();
            let value = value.trim();
            match Key::from_wire(key) {
                Some(Key::CrashKernel) => raw.crash_kernel = Some(value),
                Some(Key::Nmi) => raw.nmi = Some(value),
                Some(Key::CompanionVm) => raw.companion_vm = Some(value),
                Some(Key::UseNfs) => raw.use_nfs = Some(value),
                Some(Key::VcpuCount) => raw.vcpu_count = Some(value),
                Some(Key::CrashedVcpu) => raw.crashed_vcpu = Some(value),
                None => debug!(key, "ignoring unrecognized test parameter"),
            }
        }

        raw
    }

    fn validate(self) -> Result<TestParameters, ParameterError> {
        let crash_kernel = match self.crash_kernel {
            Some(value) if !value.is_empty() => value.to_owned(),
            _ => return Err(ParameterError::MissingCrashKernel),
        };

        let vcpu_count = self
            .vcpu_count
            .filter(|v| !v.is_empty())
            .map(|v| parse_u32(Key::VcpuCount, v))
            .transpose()?;

        let crashed_vcpu = match self.crashed_vcpu {
            None | Some("") => None,
            Some(v) if v.eq_ignore_ascii_case("random") => {
                Some(CrashedVcpu::Random)
            }
            Some(v) => {
                Some(CrashedVcpu::Index(parse_u32(Key::CrashedVcpu, v)?))
            }
        };

        Ok(TestParameters {
            crash_kernel,
            nmi: parse_flag(Key::Nmi, self.nmi)?,
            companion_vm: self
                .companion_vm
                .filter(|v| !v.is_empty())
                .map(str::to_owned),
            use_nfs: parse_flag(Key::UseNfs, self.use_nfs)?,
            vcpu_count,
            crashed_vcpu,
        })
    }
}

fn parse_flag(key: Key, value: Option<&str>) -> Result<bool, ParameterError> {
    let Some(value) = value else {
        return Ok(false);
    };

    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" => Ok(true),
        "" | "0" | "no" | "false" => Ok(false),
        _ => Err(ParameterError::InvalidValue {
            key: key.name(),
            value: value.to_owned(),
        }),
    }
}

fn parse_u32(key: Key, value: &str) -> Result<u32, ParameterError> {
    value.parse().map_err(|_| ParameterError::InvalidValue {
        key: key.name(),
        value: value.to_owned(),
    })
}

impl FromStr for TestParameters {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ParameterError::Empty);
        }

        RawParameters::collect(s).validate()
    }
}
