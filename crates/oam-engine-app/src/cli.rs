//! Command-line surface for the binary: three subcommands over the same
//! two fixture inputs (an application document, a capability-definitions
//! file), dispatched straight into [`crate::reconcile`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Application rendering and workflow execution core.
#[derive(Parser)]
#[command(name = "oam-engine")]
#[command(about = "Renders OAM application components and drives their workflow to completion")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse the application document and check every component's required
    /// template parameters, without rendering anything.
    Validate {
        /// Path to the application document (JSON or YAML).
        #[arg(short, long)]
        app: PathBuf,

        /// Path to the capability-definitions fixture (JSON or YAML).
        #[arg(short, long)]
        definitions: PathBuf,
    },

    /// Render and assemble every component, printing one manifest per
    /// component to stdout or, with `--out-dir`, one file per component.
    Render {
        #[arg(short, long)]
        app: PathBuf,

        #[arg(short, long)]
        definitions: PathBuf,

        /// Directory to write rendered manifests into, one JSON file per component.
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Drive the workflow engine to completion against the application document.
    Run {
        #[arg(short, long)]
        app: PathBuf,

        #[arg(short, long)]
        definitions: PathBuf,

        /// Upper bound on engine ticks before giving up and exiting.
        #[arg(long, default_value_t = 50)]
        max_ticks: u32,
    },
}
