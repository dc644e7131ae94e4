// Sluice Infrastructure - System Adapters
// Implements: ResourceProbe

pub mod sysinfo_probe;

pub use sysinfo_probe::SysinfoProbe;
