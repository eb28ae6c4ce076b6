use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    treejar_server::run().await
}
