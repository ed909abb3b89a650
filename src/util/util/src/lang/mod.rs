pub mod any;
pub mod marker;
