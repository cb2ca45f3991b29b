use std::fmt;

use serde::{Deserialize, Serialize};

/// Index recorded for devices that have no index (host memory).
pub const HOST_DEVICE_INDEX: i8 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Cuda,
    Mps,
    Meta,
}

/// The two kernel runner families a specialization can be loaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Host,
    Accelerator,
}

impl DeviceKind {
    /// Maps a device kind to the runner family that loads its kernels.
    ///
    /// This is the only place that decides which loader serves which device; both
    /// the persistent-cache population path and the compile path go through it.
    pub fn class(self) -> Option<DeviceClass> {
        match self {
            DeviceKind::Cpu => Some(DeviceClass::Host),
            DeviceKind::Cuda => Some(DeviceClass::Accelerator),
            DeviceKind::Mps | DeviceKind::Meta => None,
        }
    }

    pub fn is_host(self) -> bool {
        matches!(self, DeviceKind::Cpu)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Cuda => "cuda",
            DeviceKind::Mps => "mps",
            DeviceKind::Meta => "meta",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cpu" => Some(DeviceKind::Cpu),
            "cuda" => Some(DeviceKind::Cuda),
            "mps" => Some(DeviceKind::Mps),
            "meta" => Some(DeviceKind::Meta),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub kind: DeviceKind,
    pub index: i8,
}

impl Device {
    pub fn new(kind: DeviceKind, index: i8) -> Self {
        Self { kind, index }
    }

    pub fn cpu() -> Self {
        Self::new(DeviceKind::Cpu, HOST_DEVICE_INDEX)
    }

    pub fn cuda(index: i8) -> Self {
        Self::new(DeviceKind::Cuda, index)
    }

    /// Host devices carry no index, so their index collapses to the sentinel.
    pub fn normalized(self) -> Self {
        if self.kind.is_host() {
            Self::new(self.kind, HOST_DEVICE_INDEX)
        } else {
            self
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index < 0 {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}:{}", self.kind, self.index)
        }
    }
}

/// Execution context an operator call is dispatched under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchKey {
    Cpu,
    Cuda,
    Mps,
    Meta,
    AutogradCpu,
    AutogradCuda,
    Tracer,
    Python,
}

impl DispatchKey {
    const ALL: [DispatchKey; 8] = [
        DispatchKey::Cpu,
        DispatchKey::Cuda,
        DispatchKey::Mps,
        DispatchKey::Meta,
        DispatchKey::AutogradCpu,
        DispatchKey::AutogradCuda,
        DispatchKey::Tracer,
        DispatchKey::Python,
    ];

    fn bit(self) -> u64 {
        1u64 << (self as u32)
    }

    /// Device kind served by a backend key; context keys have none.
    pub fn device_kind(self) -> Option<DeviceKind> {
        match self {
            DispatchKey::Cpu => Some(DeviceKind::Cpu),
            DispatchKey::Cuda => Some(DeviceKind::Cuda),
            DispatchKey::Mps => Some(DeviceKind::Mps),
            DispatchKey::Meta => Some(DeviceKind::Meta),
            _ => None,
        }
    }

    pub fn is_backend(self) -> bool {
        self.device_kind().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DispatchKeySet {
    repr: u64,
}

impl DispatchKeySet {
    const BACKEND_MASK: u64 = (1 << DispatchKey::Cpu as u32)
        | (1 << DispatchKey::Cuda as u32)
        | (1 << DispatchKey::Mps as u32)
        | (1 << DispatchKey::Meta as u32);

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_raw(repr: u64) -> Self {
        Self { repr }
    }

    pub fn raw(self) -> u64 {
        self.repr
    }

    pub fn with(self, key: DispatchKey) -> Self {
        Self {
            repr: self.repr | key.bit(),
        }
    }

    pub fn contains(self, key: DispatchKey) -> bool {
        self.repr & key.bit() != 0
    }

    pub fn is_superset_of(self, other: DispatchKeySet) -> bool {
        self.repr & other.repr == other.repr
    }

    pub fn backend_keys(self) -> Self {
        Self::from_raw(self.repr & Self::BACKEND_MASK)
    }

    /// Autograd, tracing and python-mode keys.
    pub fn context_keys(self) -> Self {
        Self::from_raw(self.repr & !Self::BACKEND_MASK)
    }

    pub fn is_empty(self) -> bool {
        self.repr == 0
    }

    pub fn iter(self) -> impl Iterator<Item = DispatchKey> {
        DispatchKey::ALL
            .into_iter()
            .filter(move |key| self.contains(*key))
    }
}

impl From<DispatchKey> for DispatchKeySet {
    fn from(key: DispatchKey) -> Self {
        Self::empty().with(key)
    }
}

impl FromIterator<DispatchKey> for DispatchKeySet {
    fn from_iter<T: IntoIterator<Item = DispatchKey>>(iter: T) -> Self {
        iter.into_iter().fold(Self::empty(), DispatchKeySet::with)
    }
}
