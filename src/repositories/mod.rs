pub(crate) mod booklets;
pub(crate) mod health;
pub(crate) mod questions;
pub(crate) mod results;
pub(crate) mod rounds;
pub(crate) mod scan_jobs;
pub(crate) mod schools;
pub(crate) mod sections;
pub(crate) mod students;
