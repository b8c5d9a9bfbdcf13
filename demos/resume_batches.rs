use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use echo_batch::*;

struct SlowUpper {
    stop_after: usize,
    cancel: Arc<AtomicBool>,
}

impl RecordProcessor<String> for SlowUpper {
    type Output = String;

    async fn process(&self, record: &Record<String>) -> anyhow::Result<String> {
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        if record.index + 1 == self.stop_after {
            // Simulate Ctrl-C arriving mid-run
            self.cancel.store(true, Ordering::Relaxed);
        }
        if record.data.is_empty() {
            anyhow::bail!("empty caption");
        }
        Ok(record.data.to_uppercase())
    }

    fn resource_key(&self) -> &str {
        "demo-model"
    }
}

fn captions() -> Vec<Record<String>> {
    ["apical four chamber", "", "parasternal long axis", "subcostal", "suprasternal", "apical two chamber", "psax"]
        .iter()
        .enumerate()
        .map(|(i, c)| Record::new(i, format!("img-{}", i), c.to_string()))
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let out = std::env::temp_dir().join("echo-batch-demo");
    let _ = std::fs::remove_dir_all(&out);
    let records = captions();

    // First attempt gets interrupted during the second batch.
    let cancel = Arc::new(AtomicBool::new(false));
    let first = BatchRunner::new(
        SlowUpper {
            stop_after: 3,
            cancel: Arc::clone(&cancel),
        },
        BatchWriter::for_dataset(&out, "demo"),
        RunnerConfig::default().with_batch_size(2),
    )?
    .with_cancellation(cancel);

    let summary = first.run(&records, 0, None).await?;
    println!(
        "first run: {:?}, {} batches written, resume from {}",
        summary.state.status,
        summary.batches.len(),
        summary.next_start_idx
    );

    // Second attempt picks up where the first left off.
    let second = BatchRunner::new(
        SlowUpper {
            stop_after: usize::MAX,
            cancel: Arc::new(AtomicBool::new(false)),
        },
        BatchWriter::for_dataset(&out, "demo"),
        RunnerConfig::default().with_batch_size(2),
    )?;
    let summary = second.run(&records, summary.next_start_idx, None).await?;
    println!(
        "second run: {:?}, {} ok, {} failed",
        summary.state.status, summary.state.succeeded, summary.state.failed
    );
    if let Some(path) = summary.combined_file {
        println!("combined output: {}", path.display());
    }
    Ok(())
}
