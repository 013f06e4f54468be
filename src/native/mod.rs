//! Host-local implementations of the VM, reporter and compiler traits.
//! A "VM" here is a private directory on the host, commands run through a
//! shell.

pub mod compiler;
pub mod reporter;
pub mod vm;
