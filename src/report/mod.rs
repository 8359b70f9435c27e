pub mod csv;
pub mod format;
