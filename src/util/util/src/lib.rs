pub mod debug;
pub mod lang;
pub mod mem;
