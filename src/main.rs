#[tokio::main]
async fn main() -> anyhow::Result<()> {
    quantum_link_lib::run().await
}
