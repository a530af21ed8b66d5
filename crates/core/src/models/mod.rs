pub mod directory;
pub mod group;
pub mod identifier;
pub mod member;
pub mod session;
pub mod sync;
