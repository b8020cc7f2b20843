#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = duet::run(args).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
