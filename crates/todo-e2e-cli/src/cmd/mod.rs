pub mod cleanup;
pub mod label;
pub mod run;
pub mod sim;
