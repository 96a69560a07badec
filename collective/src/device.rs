use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DeviceKind {
    Cpu,
    Accelerator,
}

/// Identity of the device (and its execution stream) that owns a buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Device {
    kind: DeviceKind,
    ordinal: usize,
}

impl Device {
    #[inline]
    pub const fn cpu() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            ordinal: 0,
        }
    }

    #[inline]
    pub const fn accelerator(ordinal: usize) -> Self {
        Self {
            kind: DeviceKind::Accelerator,
            ordinal,
        }
    }

    #[inline]
    pub const fn kind(&self) -> DeviceKind {
        self.kind
    }

    #[inline]
    pub const fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Accelerator => write!(f, "accel:{}", self.ordinal),
        }
    }
}
