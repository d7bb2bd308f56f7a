#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = gat_grader::run().await {
        eprintln!("gat-grader fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
