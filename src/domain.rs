pub mod ads;
pub mod content;
pub mod request;
