// src/main.rs

use seqdag::{SeqError, cli, logging, run};

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        match err.downcast_ref::<SeqError>() {
            Some(seq_err) => {
                let payload = seq_err.to_payload(true);
                match serde_json::to_string_pretty(&payload) {
                    Ok(json) => eprintln!("{json}"),
                    Err(_) => eprintln!("seqdag error: {seq_err}"),
                }
                if matches!(seq_err, SeqError::ConfirmationRequired(_)) {
                    eprintln!("re-run with --yes to confirm");
                }
            }
            None => eprintln!("seqdag error: {err:?}"),
        }
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await?;
    Ok(())
}
