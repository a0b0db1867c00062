// compile-service-rs/src/main.rs
// LaTeX Compile Service - HTTP entry point
//
// Accepts LaTeX source over HTTP, compiles it with pdflatex, and on
// failure asks an LLM to patch the source before retrying, up to a fixed
// attempt ceiling.

use std::sync::Arc;

use compile_service::compiler::PdfLatexCompiler;
use compile_service::fix_client::FixClient;
use compile_service::pipeline::DEFAULT_MAX_ATTEMPTS;
use compile_service::routes::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let compiler = Arc::new(PdfLatexCompiler::from_env());
    if !compiler.is_available() {
        log::warn!(
            "compiler binary '{}' not found on PATH; compile requests will fail",
            compiler.binary()
        );
    }

    let fixer = Arc::new(FixClient::from_env());
    if !fixer.is_configured() {
        log::warn!("LLM_API_KEY is not set; automatic fixing is unavailable");
    }

    let max_attempts = config_rs::get_env_parsed("MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS).max(1);

    let state = AppState {
        compiler,
        fixer,
        max_attempts,
    };
    let app = build_router(state);

    let addr = config_rs::get_bind_address("COMPILE", 3000);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("compile service listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
