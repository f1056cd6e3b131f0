use stcp::simulation::{validate_file, Simulation};
use std::{path::PathBuf, time::Duration};

fn scratch_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("stcp-{name}-{}", std::process::id()))
}

#[tokio::test]
async fn default_simulation() -> anyhow::Result<()> {
    let log_dir = scratch_dir("default");
    let report = Simulation {
        log_dir: log_dir.clone(),
        ..Default::default()
    }
    .run()
    .await?;

    assert_eq!(report.delivered, 20_000);
    assert!(report.passed());
    assert_eq!(report.client_log, log_dir.join("client_log.txt"));
    assert_eq!(report.server_log, log_dir.join("server_log.txt"));
    assert!(std::fs::metadata(&report.client_log)?.len() > 0);
    // Only the client sends data
    assert_eq!(std::fs::metadata(&report.server_log)?.len(), 0);

    std::fs::remove_dir_all(&log_dir)?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn latent_simulation() -> anyhow::Result<()> {
    let log_dir = scratch_dir("latent");
    let report = Simulation {
        bytes: 3000,
        latency: Some(Duration::from_millis(50)),
        log_dir: log_dir.clone(),
    }
    .run()
    .await?;
    assert_eq!(report.delivered, 3000);
    assert!(report.passed());
    std::fs::remove_dir_all(&log_dir)?;
    Ok(())
}

#[tokio::test]
async fn corrupted_log_is_caught() -> anyhow::Result<()> {
    let log_dir = scratch_dir("corrupted");
    let report = Simulation {
        bytes: 4000,
        log_dir: log_dir.clone(),
        ..Default::default()
    }
    .run()
    .await?;
    assert!(report.passed());

    // Shrink the remainder on the second line
    let text = std::fs::read_to_string(&report.client_log)?;
    let mut lines: Vec<String> = text.lines().map(String::from).collect();
    assert_eq!(lines[1], "Recv:\t536\t0\t536");
    lines[1] = "Recv:\t536\t10\t536".into();
    let corrupted = log_dir.join("corrupted.txt");
    std::fs::write(&corrupted, lines.join("\n") + "\n")?;

    let mismatches = validate_file(&corrupted)?;
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].line, 2);
    assert_eq!(mismatches[0].expected, 0);
    assert_eq!(mismatches[0].actual, 10);

    std::fs::remove_dir_all(&log_dir)?;
    Ok(())
}

#[tokio::test]
async fn empty_transfer() -> anyhow::Result<()> {
    let log_dir = scratch_dir("empty");
    let report = Simulation {
        bytes: 0,
        log_dir: log_dir.clone(),
        ..Default::default()
    }
    .run()
    .await?;
    assert_eq!(report.delivered, 0);
    assert!(report.passed());
    std::fs::remove_dir_all(&log_dir)?;
    Ok(())
}
