#[tokio::main]
async fn main() {
    if let Err(e) = lib_meridian::init().await {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
}
