#[tokio::main]
async fn main() {
    if let Err(e) = ai_proxy::run().await {
        ai_proxy::logger::error("app", &format!("Server stopped: {}", e));
        eprintln!("ai-proxy-server: {}", e);
        std::process::exit(1);
    }
}
