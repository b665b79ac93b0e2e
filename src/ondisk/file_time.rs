use std::fmt::Display;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use binrw::prelude::*;
use time::macros::datetime;
use time::PrimitiveDateTime;

#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FileTime {
    /// 100-nanosecond intervals since January 1, 1601 (UTC),
    /// according to the FILETIME structure [MS-DTYP] 2.3.3.
    value: u64,
}

impl FileTime {
    const EPOCH: PrimitiveDateTime = datetime!(1601-01-01 00:00:00);
    const SCALE: u64 = 100;

    /// Ticks between 1601-01-01 and the Unix epoch.
    const UNIX_EPOCH_TICKS: u64 = 11_644_473_600 * 10_000_000;

    pub fn ticks(&self) -> u64 {
        self.value
    }

    pub fn date_time(&self) -> PrimitiveDateTime {
        let duration = Duration::from_nanos(self.value * Self::SCALE);
        Self::EPOCH + duration
    }

    pub fn now() -> Self {
        SystemTime::now().into()
    }
}

impl Display for FileTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.date_time().fmt(f)
    }
}

impl From<u64> for FileTime {
    fn from(value: u64) -> Self {
        Self { value }
    }
}

impl From<SystemTime> for FileTime {
    fn from(t: SystemTime) -> Self {
        // Timestamps before the Unix epoch saturate to the epoch; WIM images
        // of real filesystems never carry them.
        let since_unix = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        Self {
            value: Self::UNIX_EPOCH_TICKS + since_unix.as_nanos() as u64 / Self::SCALE,
        }
    }
}
