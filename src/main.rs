#[tokio::main]
async fn main() -> anyhow::Result<()> {
    camwatch_lib::run().await
}
