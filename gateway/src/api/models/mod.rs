pub mod install;
pub mod webhook;
