pub(crate) mod encode;
pub(crate) mod runtime;
pub(crate) mod session;
pub(crate) mod sink;
