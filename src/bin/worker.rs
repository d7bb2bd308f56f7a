#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = gat_grader::run_worker().await {
        eprintln!("gat-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
