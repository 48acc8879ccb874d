pub mod compare;
pub mod taxonomy;
