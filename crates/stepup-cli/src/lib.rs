//! stepup - self-updating application launcher
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Runs as the preamble to an application's startup: checks the release
//! repository for a newer version, applies it, relaunches, and otherwise hands
//! straight over to the installed version.
//!
//! # Installation Layout
//!
//! ```text
//! <install dir>/
//! ├── stepup          # this launcher
//! ├── stepup.toml     # update_url, launch program, ...
//! ├── current.json    # manifest of the installed version
//! ├── latest.json     # only while an update is in flight
//! └── prior/          # backup of the previous version
//! ```

pub mod cmd;
pub mod ui;

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "stepup")]
#[command(author, version, about = "stepup - self-updating application launcher")]
pub struct Cli {
    /// Skip the update check and run the installed version
    #[arg(short = 'n', long = "noupdate")]
    pub no_update: bool,

    /// Installation directory (defaults to the launcher's own directory)
    #[arg(long, env = "STEPUP_HOME")]
    pub dir: Option<PathBuf>,
}
