#[tokio::main]
async fn main() {
    if let Err(e) = ssc_call::run().await {
        eprintln!("ssc-call: {e}");
        std::process::exit(1);
    }
}
