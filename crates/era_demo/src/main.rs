use tracing::error;

fn main() {
    if let Err(e) = lib_era_demo::init() {
        error!("❌ Demo failed: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
