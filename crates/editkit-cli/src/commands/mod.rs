pub mod apply;
pub mod tables;
