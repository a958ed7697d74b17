pub mod app;
pub mod script;
