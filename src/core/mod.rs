pub mod command;
pub mod domain;
pub mod errors;
pub mod exit;
pub mod instance;
pub mod options;
pub mod traits;
