//! IO modules - side effects on the installation directory

pub mod backup;
pub mod extract;
