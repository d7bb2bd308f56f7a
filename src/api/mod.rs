pub(crate) mod booklets;
pub(crate) mod errors;
pub(crate) mod grading;
pub(crate) mod handlers;
pub(crate) mod router;
pub(crate) mod sections;
pub(crate) mod validation;
