mod build;
mod clean;
mod gdb;
mod run;
mod status;
mod update;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use gdb::cmd_gdb;
pub use run::cmd_run;
pub use status::cmd_status;
pub use test::cmd_test;
pub use update::cmd_update;
