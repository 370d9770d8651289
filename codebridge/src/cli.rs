use clap::{Parser, Subcommand};

/// codebridge - run agent-written code behind a tokenizing capability bridge
#[derive(Parser, Debug)]
#[command(name = "codebridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run task code in the sandbox and print the ExecutionResult as JSON
    Run {
        /// Path to the code file, or "-" to read it from stdin
        #[arg(value_name = "FILE")]
        file: String,

        /// User id owning the persistent skills directory
        #[arg(long, default_value = "default")]
        user: String,

        /// Language of the task code: python or node (default: from env or python)
        #[arg(long)]
        language: Option<String>,

        /// YAML capability catalog (default: CODEBRIDGE_CATALOG)
        #[arg(long, value_name = "FILE")]
        catalog: Option<String>,

        /// Wall-clock timeout in seconds (default: from env or 30)
        #[arg(long)]
        timeout: Option<u64>,

        /// Memory ceiling in MB (default: from env or 256)
        #[arg(long)]
        max_memory: Option<u64>,

        /// CPU time ceiling in seconds (default: from env or 30)
        #[arg(long)]
        cpu: Option<u64>,

        /// Sandbox backend: auto, bwrap or host (default: from env or auto)
        #[arg(long)]
        backend: Option<String>,
    },

    /// List the capabilities of a catalog as JSON descriptors
    Capabilities {
        /// YAML capability catalog (default: CODEBRIDGE_CATALOG)
        #[arg(long, value_name = "FILE")]
        catalog: Option<String>,
    },

    /// Tokenize a JSON value and print the result with its token mapping
    Tokenize {
        /// JSON value, or "-" to read it from stdin
        #[arg(value_name = "JSON")]
        input: String,
    },
}
