#[tokio::main]
async fn main() {
    if let Err(e) = retinascope::run().await {
        eprintln!("retinascope: {e}");
        std::process::exit(1);
    }
}
