pub(crate) mod scans;
pub(crate) mod scheduler;
