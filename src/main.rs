#[tokio::main]
async fn main() {
    reveal::start_server().await;
}
