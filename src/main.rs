use anyhow::Result;
use std::sync::Arc;
use story2comic::core::config::Config;
use story2comic::core::io::NativeStorage;
use story2comic::services::gateway::GenerationGateway;
use story2comic::services::image::create_image_client;
use story2comic::services::llm::create_llm;
use story2comic::services::workflow::StoryOrchestrator;
use story2comic::ui::TerminalApp;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load config
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    // 2. Initialize model clients
    let llm = create_llm(&config.llm)?;
    let image = create_image_client(&config.image)?;
    let gateway = GenerationGateway::new(llm, image);

    // 3. Run the interactive session
    let orchestrator = StoryOrchestrator::new(gateway, config.max_pages);
    let storage = Arc::new(NativeStorage::new());
    let mut app = TerminalApp::new(config, orchestrator, storage);
    app.run().await?;

    Ok(())
}
