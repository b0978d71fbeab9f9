pub(crate) mod integrity;
pub(crate) mod list;
pub(crate) mod model;
