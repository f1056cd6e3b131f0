use stcp::cli::initialize_from_arguments;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    initialize_from_arguments().await
}
