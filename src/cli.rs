// src/cli.rs
// =============================================================================
// This file defines our command-line interface using the `clap` crate.
//
// Two subcommands, one per resource source:
// - file: a document on disk, recursion reads sibling files from --root
// - site: a document on a web server, recursion fetches from the same origin
//
// Both print the resources that would be pushed for the document.
// =============================================================================

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "pushscan",
    version = "0.1.0",
    about = "List the local resources a document would push",
    long_about = "pushscan scans an HTML, CSS or SVG document for the local resources it references \
                  (stylesheets, scripts, images, fonts, nested documents), following them recursively. \
                  These are the resources an HTTP/2 server would push along with the document."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a document served from a local directory
    ///
    /// Example: pushscan file /index.html --root ./public
    File {
        /// Request URI of the document, relative to --root (e.g. /index.html)
        uri: String,

        /// Directory the site is served from
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Host the document is served under; absolute references to other
        /// hosts are never local
        #[arg(long, default_value = "")]
        host: String,

        #[command(flatten)]
        options: ScanArgs,
    },

    /// Scan a document on a web server
    ///
    /// Example: pushscan site https://example.com/ --json
    Site {
        /// Absolute URL of the document
        url: String,

        #[command(flatten)]
        options: ScanArgs,
    },
}

/// Flags shared by both subcommands
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Base scope ("host/prefix" or "/prefix"); overrides the config file
    #[arg(long)]
    pub base: Option<String>,

    /// JSON config file (base, mimetypes, max_depth, pipe_capacity)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Only scan the document itself, do not follow resources
    #[arg(long)]
    pub no_recurse: bool,

    /// Output results in JSON format instead of a table
    #[arg(long)]
    pub json: bool,
}


// -----------------------------------------------------------------------------
// BEGINNER NOTES:
//
// 1. What does #[command(flatten)] do?
//    - It splices the fields of another struct (ScanArgs) into a subcommand
//    - Both subcommands get --base, --config, --no-recurse and --json
//      without repeating them
//
// 2. Why Option<String> for --base?
//    - None means "the flag was not given"
//    - That lets a value from the config file win unless the flag is set
//
// 3. Why PathBuf instead of String for paths?
//    - PathBuf is the owned path type; it handles platform separators
//    - clap converts the argument for us
// -----------------------------------------------------------------------------
