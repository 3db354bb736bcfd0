mod exec_error;

pub use exec_error::ExecError;
