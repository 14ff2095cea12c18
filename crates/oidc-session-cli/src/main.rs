#[tokio::main]
async fn main() {
    // Errors are already rendered with suggestions by `run`
    if oidc_session_cli::run().await.is_err() {
        std::process::exit(1);
    }
}
