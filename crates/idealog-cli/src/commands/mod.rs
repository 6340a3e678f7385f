pub mod common;
pub mod drafts;
pub mod ideas;
pub mod status;
pub mod sync;
