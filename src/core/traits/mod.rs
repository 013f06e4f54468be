pub mod compiler;
pub mod logger;
pub mod reporter;
pub mod vm;
