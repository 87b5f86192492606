#[tokio::main]
async fn main() -> std::io::Result<()> {
    spdm_client::run().await
}
