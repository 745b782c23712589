//! Command-line interface: `serve` runs the HTTP gateway, `wrap` runs the
//! stdio interception proxy.

pub mod commands;
pub mod types;

pub use types::{Cli, Commands};

/// Print a command failure with its context chain to stderr and exit non-zero.
pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("Error: {err}");
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
    std::process::exit(1);
}
