pub mod bundle;
pub mod export;
pub mod formats;
pub mod plan;
