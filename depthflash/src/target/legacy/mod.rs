//! Legacy sector erase/write family.
//!
//! Updates go through the hardware-monitor command set:
//!
//! | Step            | Command | Params                         |
//! |-----------------|---------|--------------------------------|
//! | Power features  | PFD     | 0 (fire-and-forget)            |
//! | Backup read     | FRB     | offset, length                 |
//! | Sector erase    | FES     | sector index, 1 (no response)  |
//! | Packet write    | FWB     | offset, length + payload       |
//! | Reset           | HWRST   |                                |

pub mod backup;
pub mod update;
pub mod writer;

pub use backup::{BackupConfig, backup_flash};
pub use update::LegacyUpdater;
pub use writer::{sector_span, write_range};
