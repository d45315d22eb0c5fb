use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Upload, download and manage objects in the MAAP S3 bucket.
///
/// Needs MAAP_ENV_TYPE and CLIENT_ID in the environment or the config file.
#[derive(Debug, Parser)]
#[command(name = "maap-s3", version, about)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a file; large files are sent in resumable parts.
    Upload {
        source: PathBuf,
        destination: String,
    },

    /// Continue an interrupted upload (the most recent one if no arguments).
    Resume {
        #[arg(requires = "destination")]
        source: Option<PathBuf>,
        destination: Option<String>,
    },

    /// Abandon an interrupted upload, releasing its remote parts.
    Abort {
        source: PathBuf,
        destination: String,
    },

    /// Forget an interrupted upload locally without contacting the gateway.
    Forget {
        source: PathBuf,
        destination: String,
    },

    /// List interrupted uploads.
    Sessions,

    /// Delete an object.
    Delete { destination: String },

    /// Download an object to a local file.
    Download {
        destination: String,
        local_name: PathBuf,
    },

    /// List objects under a path.
    List {
        #[arg(default_value = "")]
        path: String,
    },

    /// Store credentials and fetch a first token.
    Login { email: String, password: String },

    /// Re-enter credentials interactively and fetch a new token.
    Refresh,

    /// Print a token for the given credentials without storing them.
    Token { email: String, password: String },
}
