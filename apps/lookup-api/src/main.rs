#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lookup_api::run_server().await
}
