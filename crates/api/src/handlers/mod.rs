pub mod credits;
pub mod generations;
pub mod transfers;
pub mod webhook;
