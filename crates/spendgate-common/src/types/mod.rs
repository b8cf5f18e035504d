pub mod pricing;
pub mod quota;
pub mod usage;
