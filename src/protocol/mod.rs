pub mod heredoc;
pub mod marker;
pub mod sudo;
