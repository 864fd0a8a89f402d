// src/exec/activities/mod.rs

//! Built-in activities.

pub mod copy_file;
pub mod run_script;
pub mod send_email;

pub use copy_file::CopyFile;
pub use run_script::RunScript;
pub use send_email::{EmailMessage, LogMailer, Mailer, SendEmail};
