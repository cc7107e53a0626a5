pub mod backup_restore;
pub mod core;
pub mod records;
